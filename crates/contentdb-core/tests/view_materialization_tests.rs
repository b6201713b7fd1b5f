#![allow(clippy::unwrap_used, clippy::expect_used)]

/// View materialization
///
/// Incremental maintenance must always agree with a from-scratch
/// computation, and linked ViewResults must mirror the members.
mod common;

use common::{
    add_content, add_foo_view, assert_view_consistent, catalog_store, ids, result_members,
};
use contentdb_core::{
    AttributeInstance, AttributeType, ContentInstance, EntityId, Field, FilterInstance,
    FilterType, GraphConfig, Notice, Observer, Store, ViewInstance, ViewType,
};
use proptest::prelude::*;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

const CONTENTS: usize = 4;

fn content_id(i: usize) -> EntityId {
    EntityId::from(format!("ci{i}"))
}

fn title_id(i: usize) -> EntityId {
    EntityId::from(format!("ci{i}-title"))
}

/// Foo view plus four `c-sub` contents and one `c-base` content `cb`
///
/// Also holds `a-label` (text, default "Foo label") and a `src-label`
/// attribute of that type with no value, which titles may alias.
fn populated_store() -> Store {
    let mut store = catalog_store();
    add_foo_view(&mut store);
    store
        .register(
            AttributeType::new("label", "text")
                .with_id("a-label")
                .with_default(json!("Foo label")),
        )
        .unwrap();
    store
        .register(AttributeInstance::new("a-label", serde_json::Value::Null).with_id("src-label"))
        .unwrap();
    for (i, (title, rank)) in [("MyFoo", 4), ("Bar", 3), ("Foo", 2), ("Food", 1)]
        .into_iter()
        .enumerate()
    {
        add_content(&mut store, &format!("ci{i}"), title, rank);
    }
    store
        .register(AttributeInstance::new("a-title", json!("BaseFoo")).with_id("cb-title"))
        .unwrap();
    store
        .register(
            ContentInstance::new("c-base")
                .with_id("cb")
                .with_attributes(ids(&["cb-title"])),
        )
        .unwrap();
    store
}

#[test]
fn test_initial_members_sorted_by_rank() {
    let store = populated_store();

    assert_eq!(
        store.view_members(&"vi".into()).unwrap(),
        ids(&["ci3", "ci2", "ci0"])
    );
    assert_eq!(result_members(&store, "vr"), ids(&["ci3", "ci2", "ci0"]));
    assert_view_consistent(&store, "vi");
}

#[test]
fn test_descending_sorter_reverses_order() {
    let mut store = populated_store();

    store
        .set_sorter_params(&"si-rank".into(), json!({"descending": true}))
        .unwrap();

    assert_eq!(result_members(&store, "vr"), ids(&["ci0", "ci2", "ci3"]));
    assert_view_consistent(&store, "vi");
}

#[test]
fn test_missing_sort_value_goes_last() {
    let mut store = populated_store();

    store
        .set_attribute_value(&"ci3-rank".into(), serde_json::Value::Null)
        .unwrap();

    assert_eq!(result_members(&store, "vr"), ids(&["ci2", "ci0", "ci3"]));
    assert_view_consistent(&store, "vi");
}

#[test]
fn test_pool_is_direct_membership_only() {
    let mut store = populated_store();
    assert!(!store.view_members(&"vi".into()).unwrap().contains(&"cb".into()));

    store
        .set_view_type_content_types(&"vt".into(), ids(&["c-sub", "c-base"]))
        .unwrap();
    assert!(store.view_members(&"vi".into()).unwrap().contains(&"cb".into()));

    store
        .set_view_type_content_types(&"vt".into(), ids(&["c-base"]))
        .unwrap();
    assert_eq!(store.view_members(&"vi".into()).unwrap(), ids(&["cb"]));
    assert_view_consistent(&store, "vi");
}

#[test]
fn test_unfiltered_view_after_filters_cleared() {
    let mut store = populated_store();

    store.set_view_filters(&"vi".into(), Vec::new()).unwrap();

    assert_eq!(
        store.view_members(&"vi".into()).unwrap(),
        ids(&["ci3", "ci2", "ci1", "ci0"])
    );
    assert_view_consistent(&store, "vi");
}

#[test]
fn test_filter_registered_late_narrows_view() {
    let mut store = catalog_store();
    add_content(&mut store, "ci0", "MyFoo", 1);
    add_content(&mut store, "ci1", "Bar", 2);
    add_foo_view(&mut store);
    store.release(&"fi-foo".into()).unwrap();
    assert_eq!(result_members(&store, "vr"), ids(&["ci0", "ci1"]));

    store
        .register(
            contentdb_core::FilterInstance::new("f-title", json!({"match": "Bar"}))
                .with_id("fi-foo"),
        )
        .unwrap();

    assert_eq!(result_members(&store, "vr"), ids(&["ci1"]));
    assert_view_consistent(&store, "vi");
}

#[test]
fn test_alias_reads_source_value() {
    let mut store = populated_store();
    assert!(!store.view_members(&"vi".into()).unwrap().contains(&"ci1".into()));

    // ci1 ("Bar") now reads ci0's title
    store
        .set_attribute_source(&title_id(1), Some(title_id(0)))
        .unwrap();
    assert!(store.view_members(&"vi".into()).unwrap().contains(&"ci1".into()));

    // a change at the source reaches the alias
    store
        .set_attribute_value(&title_id(0), json!("Nothing"))
        .unwrap();
    let members = store.view_members(&"vi".into()).unwrap();
    assert!(!members.contains(&"ci0".into()));
    assert!(!members.contains(&"ci1".into()));

    // dropping the alias restores the attribute's own value
    store.set_attribute_source(&title_id(1), None).unwrap();
    assert!(!store.view_members(&"vi".into()).unwrap().contains(&"ci1".into()));
    assert_view_consistent(&store, "vi");
}

#[test]
fn test_released_source_falls_back_to_own_value() {
    let mut store = populated_store();
    store
        .set_attribute_source(&title_id(1), Some(title_id(0)))
        .unwrap();

    store.release(&"ci0".into()).unwrap();
    store.release(&title_id(0)).unwrap();

    assert!(!store.view_members(&"vi".into()).unwrap().contains(&"ci1".into()));
    assert_view_consistent(&store, "vi");
}

#[test]
fn test_result_observer_sees_each_change() {
    let mut store = populated_store();
    let seen: Rc<RefCell<Vec<Notice>>> = Rc::default();
    let sink = Rc::clone(&seen);
    store
        .observe(
            &"vr".into(),
            Field::ContentInstanceIds,
            &"test-observer".into(),
            Observer::new(move |notice| sink.borrow_mut().push(notice.clone())),
        )
        .unwrap();

    store
        .set_attribute_value(&title_id(1), json!("Foo too"))
        .unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].original.ids(), ids(&["ci3", "ci2", "ci0"]));
    assert_eq!(seen[0].current.ids(), ids(&["ci3", "ci2", "ci1", "ci0"]));
}

#[test]
fn test_result_shared_by_two_views_follows_last_writer() {
    let mut store = populated_store();
    store
        .register(contentdb_core::ViewInstance::new("vt").with_id("vi-all").with_result("vr"))
        .unwrap();
    assert_eq!(
        result_members(&store, "vr"),
        store.view_members(&"vi-all".into()).unwrap()
    );

    // clearing the second link hands the result back to the first view
    store.set_view_result(&"vi-all".into(), None).unwrap();
    assert_eq!(result_members(&store, "vr"), ids(&["ci3", "ci2", "ci0"]));
}

/// `s` (type `t`, no value, default 1) aliased by `a1`..`a<chain>`;
/// content `c` holds the last alias and `vi-min` keeps values of at least 5
fn alias_chain_store(chain: usize, max_alias_depth: usize) -> Store {
    let mut store = Store::with_config(GraphConfig {
        max_alias_depth,
        ..GraphConfig::default()
    });
    store
        .register(AttributeType::new("t", "number").with_id("t").with_default(json!(1)))
        .unwrap();
    store
        .register(contentdb_core::ContentType::new("Holder").with_id("ct"))
        .unwrap();
    store
        .register(AttributeInstance::new("t", serde_json::Value::Null).with_id("s"))
        .unwrap();
    let mut source = EntityId::from("s");
    for hop in 1..=chain {
        let alias = EntityId::from(format!("a{hop}"));
        store
            .register(
                AttributeInstance::new("t", serde_json::Value::Null)
                    .with_id(alias.clone())
                    .with_source(source),
            )
            .unwrap();
        source = alias;
    }
    store
        .register(
            ContentInstance::new("ct")
                .with_id("c")
                .with_attributes(vec![source]),
        )
        .unwrap();
    store
        .register(FilterType::new(ids(&["t"])).with_id("f-min"))
        .unwrap();
    store
        .register(FilterInstance::new("f-min", json!({"min": 5})).with_id("fi-min"))
        .unwrap();
    store
        .register(
            ViewType::new(ids(&["ct"]))
                .with_id("vt-min")
                .with_filter_types(ids(&["f-min"])),
        )
        .unwrap();
    store
        .register(
            ViewInstance::new("vt-min")
                .with_id("vi-min")
                .with_filters(ids(&["fi-min"])),
        )
        .unwrap();
    store
}

#[test]
fn test_type_default_reaches_end_of_longest_alias_chain() {
    for depth in [1, GraphConfig::default().max_alias_depth] {
        let mut store = alias_chain_store(depth, depth);
        assert!(store.view_members(&"vi-min".into()).unwrap().is_empty());

        store
            .set_attribute_type_default(&"t".into(), json!(10))
            .unwrap();

        assert_eq!(
            store.view_members(&"vi-min".into()).unwrap(),
            ids(&["c"]),
            "chain of {depth} aliases"
        );
        assert_view_consistent(&store, "vi-min");
    }
}

#[test]
fn test_type_kind_change_reaches_end_of_longest_alias_chain() {
    let depth = GraphConfig::default().max_alias_depth;
    let mut store = alias_chain_store(depth, depth);

    // text ignores `min`, so the default of 1 passes
    store.set_attribute_type_kind(&"t".into(), "text").unwrap();
    assert_eq!(store.view_members(&"vi-min".into()).unwrap(), ids(&["c"]));

    // an unknown kind cannot filter, so the content is rejected
    store.set_attribute_type_kind(&"t".into(), "colour").unwrap();
    assert!(store.view_members(&"vi-min".into()).unwrap().is_empty());
    assert_view_consistent(&store, "vi-min");
}

#[test]
fn test_chain_longer_than_limit_agrees_with_rebuild() {
    let depth = GraphConfig::default().max_alias_depth;
    let mut store = alias_chain_store(depth + 1, depth);

    // `c` stops one hop short of `s`, so neither change reaches it
    store.set_attribute_value(&"s".into(), json!(9)).unwrap();
    assert!(store.view_members(&"vi-min".into()).unwrap().is_empty());
    store
        .set_attribute_type_default(&"t".into(), json!(10))
        .unwrap();
    assert_view_consistent(&store, "vi-min");
}

#[derive(Debug, Clone)]
enum Op {
    SetTitle(usize, Option<&'static str>),
    SetRank(usize, Option<i64>),
    SetLabel(Option<&'static str>),
    Alias(usize, Option<usize>),
    Toggle(usize),
    Retype(usize, bool),
    Attributes(usize, usize),
    FilterPattern(&'static str),
    Descending(bool),
    Filtered(bool),
    PoolBase(bool),
    ViewFilterTypes(bool),
    ViewSorterTypes(bool),
    FilterTypeAttributes(Vec<&'static str>),
    SorterTypeAttributes(Vec<&'static str>),
    TypeKind(&'static str, &'static str),
    TypeDefault(&'static str, serde_json::Value),
    TypeProperties(&'static str, bool),
}

const ATTRIBUTE_TYPES: [&str; 3] = ["a-title", "a-rank", "a-label"];

fn op_strategy() -> impl Strategy<Value = Op> {
    let content = 0..CONTENTS;
    let attribute_type = prop::sample::select(ATTRIBUTE_TYPES.to_vec());
    prop_oneof![
        (
            content.clone(),
            prop::option::of(prop::sample::select(vec!["Foo", "MyFoo", "Bar", "food", "Foo Bar"]))
        )
            .prop_map(|(i, t)| Op::SetTitle(i, t)),
        (content.clone(), prop::option::of(-3i64..3)).prop_map(|(i, r)| Op::SetRank(i, r)),
        prop::option::of(prop::sample::select(vec!["Foo", "Bar"])).prop_map(Op::SetLabel),
        // index CONTENTS stands for `src-label`
        (content.clone(), prop::option::of(0..=CONTENTS)).prop_map(|(i, s)| Op::Alias(i, s)),
        content.clone().prop_map(Op::Toggle),
        (content.clone(), any::<bool>()).prop_map(|(i, b)| Op::Retype(i, b)),
        (content, 0..4usize).prop_map(|(i, v)| Op::Attributes(i, v)),
        prop::sample::select(vec!["Foo", "^Bar", "o", "^$"]).prop_map(Op::FilterPattern),
        any::<bool>().prop_map(Op::Descending),
        any::<bool>().prop_map(Op::Filtered),
        any::<bool>().prop_map(Op::PoolBase),
        any::<bool>().prop_map(Op::ViewFilterTypes),
        any::<bool>().prop_map(Op::ViewSorterTypes),
        prop::sample::select(vec![
            vec!["a-title"],
            vec!["a-label", "a-title"],
            vec!["a-rank"],
        ])
        .prop_map(Op::FilterTypeAttributes),
        prop::sample::select(vec![vec!["a-rank"], vec!["a-title", "a-rank"], vec!["a-label"]])
            .prop_map(Op::SorterTypeAttributes),
        (
            attribute_type.clone(),
            prop::sample::select(vec!["text", "number", "colour"])
        )
            .prop_map(|(t, k)| Op::TypeKind(t, k)),
        (
            attribute_type.clone(),
            prop::sample::select(vec![
                serde_json::Value::Null,
                json!("Foo default"),
                json!("Bar"),
                json!(0),
                json!(7),
            ])
        )
            .prop_map(|(t, v)| Op::TypeDefault(t, v)),
        (attribute_type, any::<bool>()).prop_map(|(t, b)| Op::TypeProperties(t, b)),
    ]
}

fn optional(value: Option<serde_json::Value>) -> serde_json::Value {
    value.unwrap_or(serde_json::Value::Null)
}

fn apply(store: &mut Store, op: &Op) {
    match op {
        // a value may not fit a type whose kind changed; a rejected write
        // leaves the store untouched
        Op::SetTitle(i, title) => {
            let _ = store.set_attribute_value(&title_id(*i), optional(title.map(|t| json!(t))));
        }
        Op::SetRank(i, rank) => {
            let _ = store.set_attribute_value(
                &format!("ci{i}-rank").into(),
                optional(rank.map(|r| json!(r))),
            );
        }
        Op::SetLabel(label) => {
            let _ = store.set_attribute_value(&"src-label".into(), optional(label.map(|l| json!(l))));
        }
        Op::Alias(i, source) => {
            // only alias to a different attribute
            let source = source.filter(|s| s != i).map(|s| {
                if s == CONTENTS {
                    EntityId::from("src-label")
                } else {
                    title_id(s)
                }
            });
            store.set_attribute_source(&title_id(*i), source).unwrap()
        }
        Op::Toggle(i) => {
            let id = content_id(*i);
            if store.contains(&id) {
                store.release(&id).unwrap();
            } else {
                store
                    .register(
                        ContentInstance::new("c-sub")
                            .with_id(id)
                            .with_attributes(vec![title_id(*i), format!("ci{i}-rank").into()]),
                    )
                    .unwrap();
            }
        }
        Op::Retype(i, to_base) => {
            let id = content_id(*i);
            if store.contains(&id) {
                let type_id = if *to_base { "c-base" } else { "c-sub" };
                store.set_instance_type(&id, type_id).unwrap();
            }
        }
        Op::Attributes(i, variant) => {
            let id = content_id(*i);
            if store.contains(&id) {
                let (title, rank) = (title_id(*i), EntityId::from(format!("ci{i}-rank")));
                let attributes = match variant {
                    0 => vec![title, rank],
                    1 => vec![rank, title],
                    2 => vec![rank],
                    _ => vec!["src-label".into(), title, rank],
                };
                store.set_content_attributes(&id, attributes).unwrap();
            }
        }
        Op::FilterPattern(pattern) => store
            .set_filter_params(&"fi-foo".into(), json!({ "match": pattern }))
            .unwrap(),
        Op::Descending(descending) => store
            .set_sorter_params(&"si-rank".into(), json!({ "descending": descending }))
            .unwrap(),
        Op::Filtered(filtered) => {
            let filters = if *filtered { ids(&["fi-foo"]) } else { Vec::new() };
            store.set_view_filters(&"vi".into(), filters).unwrap()
        }
        Op::PoolBase(with_base) => {
            let pool = if *with_base {
                ids(&["c-sub", "c-base"])
            } else {
                ids(&["c-sub"])
            };
            store.set_view_type_content_types(&"vt".into(), pool).unwrap()
        }
        Op::ViewFilterTypes(on) => {
            let types = if *on { ids(&["f-title"]) } else { Vec::new() };
            store.set_view_type_filter_types(&"vt".into(), types).unwrap()
        }
        Op::ViewSorterTypes(on) => {
            let types = if *on { ids(&["s-rank"]) } else { Vec::new() };
            store.set_view_type_sorter_types(&"vt".into(), types).unwrap()
        }
        Op::FilterTypeAttributes(types) => store
            .set_filter_type_attributes(&"f-title".into(), ids(types))
            .unwrap(),
        Op::SorterTypeAttributes(types) => store
            .set_sorter_type_attributes(&"s-rank".into(), ids(types))
            .unwrap(),
        Op::TypeKind(type_id, kind_id) => store
            .set_attribute_type_kind(&(*type_id).into(), *kind_id)
            .unwrap(),
        Op::TypeDefault(type_id, value) => store
            .set_attribute_type_default(&(*type_id).into(), value.clone())
            .unwrap(),
        Op::TypeProperties(type_id, limited) => {
            let properties = if *limited {
                json!({"max_length": 3})
            } else {
                json!({})
            };
            store
                .set_attribute_type_properties(&(*type_id).into(), properties)
                .unwrap()
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_incremental_view_matches_rebuild(ops in prop::collection::vec(op_strategy(), 1..32)) {
        let mut store = populated_store();
        let view_id = EntityId::from("vi");
        for op in &ops {
            apply(&mut store, op);
            let incremental = store.view_members(&view_id).unwrap();
            prop_assert_eq!(
                &incremental,
                &contentdb_core::compute_view(&store, &view_id).unwrap(),
                "after {:?}",
                op
            );
            prop_assert_eq!(&result_members(&store, "vr"), &incremental);
        }
    }
}
