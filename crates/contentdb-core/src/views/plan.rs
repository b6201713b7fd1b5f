//! Evaluation plan of one view instance
//!
//! A [`ViewPlan`] snapshots everything a view needs from the graph (pool,
//! applicable filters, applicable sorters) so membership and ordering of any
//! content instance can be decided without holding a borrow on the store.

use serde_json::Value as JsonValue;
use std::cmp::Ordering;

use crate::errors::Result;
use crate::kinds::KindRegistry;
use crate::model::{AttributeInstance, EntityId, Kind, Resource};
use crate::ops::Store;

/// A materialized view entry and the sort key it was placed with
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Member {
    pub(crate) id: EntityId,
    pub(crate) key: Vec<SortCell>,
}

/// One sorter's key for one content instance; `value` is `None` when the
/// content has no value to sort on
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SortCell {
    value: Option<JsonValue>,
    kind_id: Option<String>,
}

#[derive(Debug, Clone)]
struct FilterPlan {
    attribute_type_ids: Vec<EntityId>,
    params: JsonValue,
}

#[derive(Debug, Clone)]
struct SorterPlan {
    attribute_type_ids: Vec<EntityId>,
    descending: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ViewPlan {
    /// Joined content types of the view type, deduplicated
    pool: Vec<EntityId>,
    filters: Vec<FilterPlan>,
    sorters: Vec<SorterPlan>,
}

impl ViewPlan {
    /// Snapshot the plan of `view_id`
    ///
    /// A view whose type is not joined has an empty pool. Filter and sorter
    /// instances are used only when they and their type are joined and the
    /// view type allows that type; the rest are skipped until they resolve.
    pub(crate) fn build(store: &Store, view_id: &EntityId) -> Result<Self> {
        let view = store.expect(view_id, Kind::ViewInstance, Resource::as_view_instance)?;
        let type_id = view.type_id.get();
        if !store.is_joined_as(type_id, Kind::ViewType) {
            return Ok(Self::default());
        }
        let view_type = store.expect(type_id, Kind::ViewType, Resource::as_view_type)?;

        let mut pool: Vec<EntityId> = Vec::new();
        for ct in view_type.content_type_ids.get() {
            if store.is_joined_as(ct, Kind::ContentType) && !pool.contains(ct) {
                pool.push(ct.clone());
            }
        }

        let mut filters = Vec::new();
        for fi in view.filter_ids.get() {
            if !store.is_joined_as(fi, Kind::FilterInstance) {
                continue;
            }
            let instance = store.expect(fi, Kind::FilterInstance, Resource::as_filter_instance)?;
            let ft = instance.type_id.get();
            if !store.is_joined_as(ft, Kind::FilterType)
                || !view_type.filter_type_ids.get().contains(ft)
            {
                continue;
            }
            let filter_type = store.expect(ft, Kind::FilterType, Resource::as_filter_type)?;
            filters.push(FilterPlan {
                attribute_type_ids: filter_type.attribute_type_ids.get().clone(),
                params: instance.kind_params.get().clone(),
            });
        }

        let mut sorters = Vec::new();
        for si in view.sorter_ids.get() {
            if !store.is_joined_as(si, Kind::SorterInstance) {
                continue;
            }
            let instance = store.expect(si, Kind::SorterInstance, Resource::as_sorter_instance)?;
            let st = instance.type_id.get();
            if !store.is_joined_as(st, Kind::SorterType)
                || !view_type.sorter_type_ids.get().contains(st)
            {
                continue;
            }
            let sorter_type = store.expect(st, Kind::SorterType, Resource::as_sorter_type)?;
            sorters.push(SorterPlan {
                attribute_type_ids: sorter_type.attribute_type_ids.get().clone(),
                descending: instance
                    .kind_params
                    .get()
                    .get("descending")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false),
            });
        }

        Ok(Self {
            pool,
            filters,
            sorters,
        })
    }

    pub(crate) fn pool(&self) -> &[EntityId] {
        &self.pool
    }

    /// The member entry for `content_id`, or `None` if the view excludes it
    pub(crate) fn admit(&self, store: &Store, content_id: &EntityId) -> Option<Member> {
        if !store.is_joined_as(content_id, Kind::ContentInstance) {
            return None;
        }
        let content = store
            .expect(content_id, Kind::ContentInstance, Resource::as_content_instance)
            .ok()?;
        if !self.pool.contains(content.type_id.get()) {
            return None;
        }

        let attributes: Vec<&AttributeInstance> = content
            .attribute_ids
            .get()
            .iter()
            .filter(|a| store.is_joined_as(a, Kind::AttributeInstance))
            .filter_map(|a| {
                store
                    .expect(a, Kind::AttributeInstance, Resource::as_attribute_instance)
                    .ok()
            })
            .collect();

        for filter in &self.filters {
            let attribute = first_match(&attributes, &filter.attribute_type_ids)?;
            let (_, kind) = store.attribute_kind(attribute.type_id.get())?;
            let value = store.effective_value(attribute);
            match kind.filter(&value, &filter.params) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(reason) => {
                    tracing::debug!(
                        content_id = content_id.as_str(),
                        attribute_id = attribute.id().as_str(),
                        reason = %reason,
                        "filter rejected content"
                    );
                    return None;
                }
            }
        }

        let key = self
            .sorters
            .iter()
            .map(|sorter| match first_match(&attributes, &sorter.attribute_type_ids) {
                Some(attribute) => {
                    let value = store.effective_value(attribute);
                    SortCell {
                        value: (!value.is_null()).then_some(value),
                        kind_id: store
                            .attribute_kind(attribute.type_id.get())
                            .map(|(kind_id, _)| kind_id),
                    }
                }
                None => SortCell {
                    value: None,
                    kind_id: None,
                },
            })
            .collect();

        Some(Member {
            id: content_id.clone(),
            key,
        })
    }

    /// Total order: sorters in sequence, missing values last, then id
    pub(crate) fn compare(&self, a: &Member, b: &Member, kinds: &KindRegistry) -> Ordering {
        for (sorter, (x, y)) in self.sorters.iter().zip(a.key.iter().zip(b.key.iter())) {
            let ordering = match (&x.value, &y.value) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(xv), Some(yv)) => {
                    let ordering = match (&x.kind_id, &y.kind_id) {
                        (Some(xk), Some(yk)) if xk == yk => kinds
                            .get(xk)
                            .map_or(Ordering::Equal, |kind| kind.compare(xv, yv)),
                        (xk, yk) => xk.cmp(yk),
                    };
                    if sorter.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    }
}

/// First attribute whose type is listed, honouring the list's order
fn first_match<'a>(
    attributes: &[&'a AttributeInstance],
    type_ids: &[EntityId],
) -> Option<&'a AttributeInstance> {
    type_ids.iter().find_map(|type_id| {
        attributes
            .iter()
            .find(|a| a.type_id.get() == type_id)
            .copied()
    })
}
