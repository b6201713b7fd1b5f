//! Reactive properties and the subscription registry
//!
//! A [`Property`] holds one observable field of an entity. Writing a value
//! that differs from the current one hands back the original so the owning
//! store can notify subscribers with `(owner, original, current)`.
//!
//! Subscriptions do not live inside the property. They are kept in an
//! explicit [`Subscribers`] registry owned by the store and keyed by the
//! owner's id, so releasing either side drops them deterministically and no
//! callback ever outlives the entities it connects.
//!
//! # Invariants
//!
//! 1. `set` with a value equal to the current one is a no-op.
//! 2. Subscribers of one `(owner, field)` pair are kept in subscription order.
//! 3. Subscribing the same `(subscriber, callback)` twice keeps one entry.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use crate::model::EntityId;

/// Observable field wrapper
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Property<T> {
    value: T,
}

impl<T: PartialEq> Property<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Store `value`, returning the original when it actually changed
    pub fn set(&mut self, value: T) -> Option<T> {
        if self.value == value {
            return None;
        }
        Some(std::mem::replace(&mut self.value, value))
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> From<T> for Property<T> {
    fn from(value: T) -> Self {
        Self { value }
    }
}

/// Names of the reactive fields across all entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    BaseIds,
    AttributeTypeIds,
    KindId,
    KindProperties,
    DefaultValue,
    TypeId,
    AttributeIds,
    Value,
    SourceId,
    KindParams,
    ContentTypeIds,
    FilterTypeIds,
    SorterTypeIds,
    FilterIds,
    SorterIds,
    ResultId,
    ContentInstanceIds,
}

/// Untyped snapshot of a field value carried by a [`Notice`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Json(JsonValue),
    Id(Option<EntityId>),
    Ids(Vec<EntityId>),
}

impl FieldValue {
    /// Id list carried by the value, empty for non-id values
    pub fn ids(&self) -> Vec<EntityId> {
        match self {
            FieldValue::Ids(ids) => ids.clone(),
            FieldValue::Id(Some(id)) => vec![id.clone()],
            _ => Vec::new(),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        FieldValue::Json(value)
    }
}

impl From<Option<EntityId>> for FieldValue {
    fn from(value: Option<EntityId>) -> Self {
        FieldValue::Id(value)
    }
}

impl From<EntityId> for FieldValue {
    fn from(value: EntityId) -> Self {
        FieldValue::Id(Some(value))
    }
}

impl From<Vec<EntityId>> for FieldValue {
    fn from(value: Vec<EntityId>) -> Self {
        FieldValue::Ids(value)
    }
}

/// A value change delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub owner: EntityId,
    pub field: Field,
    pub original: FieldValue,
    pub current: FieldValue,
}

/// Caller-supplied change callback
///
/// Equality is pointer identity, so the same `Observer` value can later be
/// passed to `unobserve`.
#[derive(Clone)]
pub struct Observer(Rc<dyn Fn(&Notice)>);

impl Observer {
    pub fn new(callback: impl Fn(&Notice) + 'static) -> Self {
        Self(Rc::new(callback))
    }

    pub fn call(&self, notice: &Notice) {
        (self.0)(notice)
    }
}

impl PartialEq for Observer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observer(..)")
    }
}

/// One registered subscription
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription<C> {
    pub subscriber: EntityId,
    pub callback: C,
}

/// Ordered subscription registry keyed by `(owner, field)`
#[derive(Debug, Clone)]
pub struct Subscribers<F, C> {
    entries: HashMap<(EntityId, F), Vec<Subscription<C>>>,
}

impl<F, C> Default for Subscribers<F, C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<F: Copy + Eq + Hash, C: Clone + PartialEq> Subscribers<F, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscription; returns false if the same one already exists
    pub fn subscribe(&mut self, owner: &EntityId, field: F, subscriber: &EntityId, callback: C) -> bool {
        let list = self.entries.entry((owner.clone(), field)).or_default();
        if list
            .iter()
            .any(|s| &s.subscriber == subscriber && s.callback == callback)
        {
            return false;
        }
        list.push(Subscription {
            subscriber: subscriber.clone(),
            callback,
        });
        true
    }

    /// Remove one subscription; returns whether it existed
    pub fn unsubscribe(&mut self, owner: &EntityId, field: F, subscriber: &EntityId, callback: &C) -> bool {
        let key = (owner.clone(), field);
        let Some(list) = self.entries.get_mut(&key) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| !(&s.subscriber == subscriber && &s.callback == callback));
        let removed = list.len() != before;
        if list.is_empty() {
            self.entries.remove(&key);
        }
        removed
    }

    /// Drop every subscription held by `subscriber`
    pub fn drop_subscriber(&mut self, subscriber: &EntityId) {
        self.entries.retain(|_, list| {
            list.retain(|s| &s.subscriber != subscriber);
            !list.is_empty()
        });
    }

    /// Drop every subscription on fields owned by `owner`
    pub fn drop_owner(&mut self, owner: &EntityId) {
        self.entries.retain(|(key_owner, _), _| key_owner != owner);
    }

    /// Snapshot of the subscribers of `(owner, field)` in subscription order
    pub fn snapshot(&self, owner: &EntityId, field: F) -> Vec<Subscription<C>> {
        self.entries
            .get(&(owner.clone(), field))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, owner: &EntityId, field: F, subscriber: &EntityId) -> bool {
        self.entries
            .get(&(owner.clone(), field))
            .is_some_and(|list| list.iter().any(|s| &s.subscriber == subscriber))
    }

    /// Total number of subscriptions
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
