#![allow(clippy::unwrap_used, clippy::expect_used)]

use contentdb_core::core_types::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};
use contentdb_core::logging_facility::{capture, init_test_capture};
use contentdb_core::{
    log_op_end, log_op_error, log_op_start, ContentType, EntityError, GraphError, Store,
};

#[test]
fn test_log_op_start_macro() {
    let ((), logs) = capture(|| {
        log_op_start!("test_start");
    });

    logs.assert_event_exists("test_start", EVENT_START);
    assert_eq!(logs.events_for("test_start").len(), 1);
}

#[test]
fn test_log_op_end_macro() {
    let ((), logs) = capture(|| {
        log_op_end!("test_end", duration_ms = 42);
    });

    let events = logs.events_for("test_end");
    assert_eq!(events.len(), 1, "Should have exactly one end event");
    assert!(events[0].is("test_end", EVENT_END));
    assert_eq!(events[0].field("duration_ms"), Some("42"));
}

#[test]
fn test_log_op_error_includes_code() {
    let err: GraphError = EntityError::NotFound {
        id: Some("c1".into()),
    }
    .into();

    let ((), logs) = capture(|| {
        log_op_error!("test_error", &err, duration_ms = 10);
    });

    let events = logs.events_for("test_error");
    assert_eq!(events.len(), 1, "Should have exactly one error event");
    assert!(events[0].is("test_error", EVENT_END_ERROR));
    assert_eq!(events[0].field("err_code"), Some("ERR_NOT_FOUND"));
    assert_eq!(events[0].field("err_kind"), Some("NotFound"));
}

#[test]
fn test_log_macros_with_multiple_fields() {
    let ((), logs) = capture(|| {
        log_op_start!("test_fields", entity_id = "c123", entity_kind = "content_type");
    });

    let start = &logs.events_for("test_fields")[0];
    assert_eq!(start.field("entity_id"), Some("c123"));
    assert_eq!(start.field("entity_kind"), Some("content_type"));
}

#[test]
fn test_register_logs_single_start_and_end() {
    let mut store = Store::new();

    let (result, logs) = capture(|| store.register(ContentType::new("Base").with_id("c1")));

    result.unwrap();
    let starts = logs.count_events(|e| e.is("register", EVENT_START));
    let ends = logs.count_events(|e| e.is("register", EVENT_END));
    assert_eq!(starts, 1, "Should have exactly one start event");
    assert_eq!(ends, 1, "Should have exactly one end event");
    logs.assert_event_absent("register", EVENT_END_ERROR);
}

#[test]
fn test_failed_register_logs_error_code() {
    let mut store = Store::new();
    store.register(ContentType::new("Base").with_id("c1")).unwrap();

    let (result, logs) = capture(|| store.register(ContentType::new("Again").with_id("c1")));

    assert!(result.is_err());
    let failure = logs
        .events_for("register")
        .into_iter()
        .find(|e| e.is("register", EVENT_END_ERROR))
        .expect("Should have error event");
    assert_eq!(failure.field("err_code"), Some("ERR_COLLISION"));
    assert_eq!(failure.field("entity_id"), Some("c1"));
    logs.assert_event_absent("register", EVENT_END);
}

#[test]
fn test_capture_clear_and_count() {
    let ((), logs) = capture(|| {
        log_op_start!("test_count_a");
        log_op_start!("test_count_b");
        log_op_end!("test_count_a", duration_ms = 1);
    });

    assert_eq!(logs.count_events(|e| e.event.as_deref() == Some(EVENT_START)), 2);
    assert_eq!(logs.count_events(|e| e.event.as_deref() == Some(EVENT_END)), 1);

    logs.clear();
    assert!(logs.events().is_empty());
}

#[test]
#[should_panic(expected = "Expected event")]
fn test_capture_assert_event_exists_fails() {
    let ((), logs) = capture(|| {
        log_op_start!("test_present");
    });

    logs.assert_event_exists("nonexistent_op_truly_unique_999", EVENT_START);
}

#[test]
fn test_global_capture_sees_events_from_this_thread() {
    let logs = init_test_capture();
    let op_name = "test_global_capture_unique_1";

    log_op_start!(op_name);

    logs.assert_event_exists(op_name, EVENT_START);
}
