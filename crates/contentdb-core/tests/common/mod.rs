#![allow(clippy::unwrap_used, clippy::expect_used)]

use contentdb_core::{
    compute_view, AttributeInstance, AttributeType, ContentInstance, ContentType, EntityId,
    FilterInstance, FilterType, GraphError, Kind, Phase, Resource, ResourceHandler,
    SorterInstance, SorterType, Store, ViewInstance, ViewResult, ViewType,
};
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;

/// Build a list of entity ids
#[allow(dead_code)]
pub fn ids(raw: &[&str]) -> Vec<EntityId> {
    raw.iter().map(|id| EntityId::from(*id)).collect()
}

/// Store holding the two attribute types and the content type pair every
/// scenario starts from
///
/// - `a-title` (text), `a-rank` (number)
/// - `c-base` and `c-sub` (inherits `c-base`, uses both attribute types)
#[allow(dead_code)]
pub fn catalog_store() -> Store {
    let mut store = Store::new();
    store
        .register(AttributeType::new("title", "text").with_id("a-title"))
        .unwrap();
    store
        .register(AttributeType::new("rank", "number").with_id("a-rank"))
        .unwrap();
    store
        .register(ContentType::new("Base").with_id("c-base"))
        .unwrap();
    store
        .register(
            ContentType::new("Sub")
                .with_id("c-sub")
                .with_bases(ids(&["c-base"]))
                .with_attribute_types(ids(&["a-title", "a-rank"])),
        )
        .unwrap();
    store
}

/// Register a `c-sub` content instance with a title and a rank attribute
///
/// Attribute ids are `<id>-title` and `<id>-rank`.
#[allow(dead_code)]
pub fn add_content(store: &mut Store, id: &str, title: &str, rank: i64) -> EntityId {
    let title_id = format!("{id}-title");
    let rank_id = format!("{id}-rank");
    store
        .register(AttributeInstance::new("a-title", json!(title)).with_id(title_id.as_str()))
        .unwrap();
    store
        .register(AttributeInstance::new("a-rank", json!(rank)).with_id(rank_id.as_str()))
        .unwrap();
    store
        .register(
            ContentInstance::new("c-sub")
                .with_id(id)
                .with_attributes(ids(&[title_id.as_str(), rank_id.as_str()])),
        )
        .unwrap()
}

/// Register the "titles containing Foo, by rank" view over `c-sub`
///
/// Entities: `f-title`/`fi-foo` (filter), `s-rank`/`si-rank` (sorter),
/// `vt` (view type), `vr` (result) and `vi` (view instance).
#[allow(dead_code)]
pub fn add_foo_view(store: &mut Store) -> EntityId {
    store
        .register(FilterType::new(ids(&["a-title"])).with_id("f-title"))
        .unwrap();
    store
        .register(FilterInstance::new("f-title", json!({"match": ".*Foo.*"})).with_id("fi-foo"))
        .unwrap();
    store
        .register(SorterType::new(ids(&["a-rank"])).with_id("s-rank"))
        .unwrap();
    store
        .register(SorterInstance::new("s-rank", json!({})).with_id("si-rank"))
        .unwrap();
    store
        .register(
            ViewType::new(ids(&["c-sub"]))
                .with_id("vt")
                .with_filter_types(ids(&["f-title"]))
                .with_sorter_types(ids(&["s-rank"])),
        )
        .unwrap();
    store.register(ViewResult::new().with_id("vr")).unwrap();
    store
        .register(
            ViewInstance::new("vt")
                .with_id("vi")
                .with_filters(ids(&["fi-foo"]))
                .with_sorters(ids(&["si-rank"]))
                .with_result("vr"),
        )
        .unwrap()
}

/// Members as stored in a ViewResult
#[allow(dead_code)]
pub fn result_members(store: &Store, result_id: &str) -> Vec<EntityId> {
    store
        .retrieve_as(&result_id.into(), Kind::ViewResult)
        .unwrap()
        .as_view_result()
        .unwrap()
        .content_instance_ids
        .get()
        .clone()
}

/// Assert the materialized members of `view_id` equal a full recomputation
#[allow(dead_code)]
pub fn assert_view_consistent(store: &Store, view_id: &str) {
    let view_id = EntityId::from(view_id);
    let incremental = store.view_members(&view_id).unwrap();
    let rebuilt = compute_view(store, &view_id).unwrap();
    assert_eq!(incremental, rebuilt, "view {view_id} drifted from a rebuild");
}

/// Handler that delegates to the handler it replaced, failing on request
///
/// `fail_register` makes `on_register` fail for `target`; `fail_release`
/// does the same for `on_release`, which is how tests break a compensation.
#[allow(dead_code)]
pub struct FailingHandler {
    inner: Rc<dyn ResourceHandler>,
    target: EntityId,
    pub fail_register: Cell<bool>,
    pub fail_release: Cell<bool>,
}

#[allow(dead_code)]
impl FailingHandler {
    /// Install on `phase`, wrapping the handler currently serving it
    pub fn install(store: &mut Store, phase: Phase, target: &str) -> Rc<FailingHandler> {
        let inner = store.handler(phase);
        let handler = Rc::new(FailingHandler {
            inner,
            target: target.into(),
            fail_register: Cell::new(false),
            fail_release: Cell::new(false),
        });
        store.override_handler(phase, handler.clone());
        handler
    }

    fn injected(&self, id: &EntityId) -> GraphError {
        contentdb_core::TransactionError::Unexpected {
            message: format!("injected failure for {id}"),
        }
        .into()
    }
}

impl ResourceHandler for FailingHandler {
    fn on_register(&self, store: &mut Store, id: &EntityId) -> contentdb_core::Result<()> {
        if self.fail_register.get() && id == &self.target {
            return Err(self.injected(id));
        }
        self.inner.on_register(store, id)
    }

    fn on_release(&self, store: &mut Store, id: &EntityId) -> contentdb_core::Result<()> {
        if self.fail_release.get() && id == &self.target {
            return Err(self.injected(id));
        }
        self.inner.on_release(store, id)
    }
}

/// Every entity of a small graph touching all eleven kinds, in an order
/// that registers cleanly
#[allow(dead_code)]
pub fn full_graph() -> Vec<Resource> {
    vec![
        AttributeType::new("title", "text").with_id("a-title").into(),
        AttributeType::new("rank", "number").with_id("a-rank").into(),
        ContentType::new("Base").with_id("c-base").into(),
        ContentType::new("Sub")
            .with_id("c-sub")
            .with_bases(ids(&["c-base"]))
            .with_attribute_types(ids(&["a-title", "a-rank"]))
            .into(),
        AttributeInstance::new("a-title", json!("MyFoo"))
            .with_id("t1")
            .into(),
        AttributeInstance::new("a-rank", json!(3)).with_id("r1").into(),
        AttributeInstance::new("a-title", serde_json::Value::Null)
            .with_id("t2")
            .with_source("t1")
            .into(),
        ContentInstance::new("c-sub")
            .with_id("ci1")
            .with_attributes(ids(&["t1", "r1"]))
            .into(),
        ContentInstance::new("c-sub")
            .with_id("ci2")
            .with_attributes(ids(&["t2"]))
            .into(),
        FilterType::new(ids(&["a-title"])).with_id("f-title").into(),
        FilterInstance::new("f-title", json!({"match": "Foo"}))
            .with_id("fi-foo")
            .into(),
        SorterType::new(ids(&["a-rank"])).with_id("s-rank").into(),
        SorterInstance::new("s-rank", json!({"descending": true}))
            .with_id("si-rank")
            .into(),
        ViewType::new(ids(&["c-sub"]))
            .with_id("vt")
            .with_filter_types(ids(&["f-title"]))
            .with_sorter_types(ids(&["s-rank"]))
            .into(),
        ViewResult::new().with_id("vr").into(),
        ViewInstance::new("vt")
            .with_id("vi")
            .with_filters(ids(&["fi-foo"]))
            .with_sorters(ids(&["si-rank"]))
            .with_result("vr")
            .into(),
    ]
}

