#![allow(clippy::unwrap_used, clippy::expect_used)]

/// Register/release rollback
///
/// A failing phase is compensated in reverse. When every compensation
/// succeeds the store is exactly as before (recovered); when one fails the
/// error says the store is compromised.
mod common;

use common::{add_content, add_foo_view, catalog_store, ids, result_members, FailingHandler};
use contentdb_core::{
    Action, ContentInstance, Controller, EntityError, ErrorKind, Event, GraphError, Integrity,
    Phase, Transaction,
};
use std::cell::RefCell;
use std::rc::Rc;

fn integrity(err: &GraphError) -> (Integrity, usize) {
    match err {
        GraphError::Entity(
            EntityError::NotRegistered {
                integrity,
                compensation_failures,
                ..
            }
            | EntityError::NotReleased {
                integrity,
                compensation_failures,
                ..
            },
        ) => (*integrity, compensation_failures.len()),
        other => panic!("not a rollback error: {other:?}"),
    }
}

fn ci1() -> ContentInstance {
    ContentInstance::new("c-sub")
        .with_id("CI1")
        .with_attributes(ids(&["CI0-title"]))
}

#[test]
fn test_failed_leaf_phase_is_recovered() {
    // GIVEN a view over existing content and a leaf handler that fails for CI1
    let mut store = catalog_store();
    add_foo_view(&mut store);
    add_content(&mut store, "CI0", "MyFoo", 1);
    let failing = FailingHandler::install(&mut store, Phase::ContentInstance, "CI1");
    failing.fail_register.set(true);
    let before = store.stats();

    // WHEN CI1 registers
    let err = store.register(ci1()).unwrap_err();

    // THEN the error is recovered and every table is as before
    assert_eq!(err.kind(), ErrorKind::NotRegistered);
    assert_eq!(integrity(&err), (Integrity::Recovered, 0));
    assert_eq!(err.root_cause().kind(), ErrorKind::Unexpected);
    assert!(!err.is_compromised());
    assert_eq!(store.stats(), before);
    assert!(!store.contains(&"CI1".into()));
    assert_eq!(result_members(&store, "vr"), ids(&["CI0"]));
}

#[test]
fn test_failed_compensation_is_compromised() {
    let mut store = catalog_store();
    let leaf = FailingHandler::install(&mut store, Phase::ContentInstance, "CI1");
    let instance = FailingHandler::install(&mut store, Phase::Instance, "CI1");
    leaf.fail_register.set(true);
    instance.fail_release.set(true);

    let err = store.register(ci1()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Compromised);
    assert_eq!(err.code(), "ERR_COMPROMISED");
    assert!(err.is_compromised());
    assert_eq!(integrity(&err), (Integrity::Compromised, 1));
    // the entity still leaves the arena
    assert!(!store.contains(&"CI1".into()));
}

#[test]
fn test_failed_release_is_recovered() {
    // GIVEN CI0 in the view and a resource handler that refuses to release it
    let mut store = catalog_store();
    add_foo_view(&mut store);
    add_content(&mut store, "CI0", "MyFoo", 1);
    let failing = FailingHandler::install(&mut store, Phase::Resource, "CI0");
    failing.fail_release.set(true);
    let before = store.stats();

    // WHEN CI0 is released
    let err = store.release(&"CI0".into()).unwrap_err();

    // THEN the leaf and instance phases were re-registered
    assert_eq!(err.kind(), ErrorKind::NotReleased);
    assert_eq!(integrity(&err), (Integrity::Recovered, 0));
    assert_eq!(store.stats(), before);
    assert!(store.is_joined(&"CI0".into()));
    assert_eq!(result_members(&store, "vr"), ids(&["CI0"]));
}

#[test]
fn test_failed_release_compensation_is_compromised() {
    let mut store = catalog_store();
    add_content(&mut store, "CI0", "MyFoo", 1);
    let resource = FailingHandler::install(&mut store, Phase::Resource, "CI0");
    let leaf = FailingHandler::install(&mut store, Phase::ContentInstance, "CI0");
    resource.fail_release.set(true);
    leaf.fail_register.set(true);

    let err = store.release(&"CI0".into()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Compromised);
    assert_eq!(integrity(&err), (Integrity::Compromised, 1));
    assert!(store.contains(&"CI0".into()));
}

#[test]
fn test_handler_can_be_restored() {
    let mut store = catalog_store();
    let original = store.handler(Phase::ContentInstance);
    let failing = FailingHandler::install(&mut store, Phase::ContentInstance, "CI1");
    failing.fail_register.set(true);
    assert!(store.register(ci1()).is_err());

    store.override_handler(Phase::ContentInstance, original);

    store.register(ci1()).unwrap();
    assert!(store.is_joined(&"CI1".into()));
}

#[test]
fn test_delete_transaction_reports_compromise_through_wrapper() {
    let mut store = catalog_store();
    add_content(&mut store, "CI0", "MyFoo", 1);
    let resource = FailingHandler::install(&mut store, Phase::Resource, "CI0");
    let leaf = FailingHandler::install(&mut store, Phase::ContentInstance, "CI0");
    resource.fail_release.set(true);
    leaf.fail_register.set(true);

    let mut controller = Controller::new(store);
    let seen: Rc<RefCell<Vec<Event>>> = Rc::default();
    for event in Event::ALL {
        let sink = Rc::clone(&seen);
        controller
            .handlers_mut()
            .register(event, Some(Action::Delete), None, move |event, _| {
                sink.borrow_mut().push(event)
            })
            .unwrap_or_else(|_| {
                // events that never fire for a delete are rejected
                assert!(!event.occurs_with(Action::Delete));
            });
    }

    let tx = controller.process(Transaction::delete("CI0"));

    assert_eq!(tx.errors.len(), 1);
    let err = &tx.errors[0];
    assert_eq!(err.kind(), ErrorKind::NotDeleted);
    assert!(err.is_compromised());
    assert_eq!(err.root_cause().kind(), ErrorKind::Unexpected);
    assert_eq!(
        *seen.borrow(),
        vec![
            Event::TransactionOpened,
            Event::ResourceResolved,
            Event::ResourceNotDeleted,
            Event::TransactionFailed,
            Event::TransactionClosing,
        ]
    );
}
