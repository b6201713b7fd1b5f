//! View materialization
//!
//! Every joined view instance owns an ordered member list. The list is kept
//! equal to [`compute_view`] (the from-scratch computation) by incremental
//! updates scoped to what changed:
//!
//! - a content instance, or an attribute it holds, changed: re-place that one
//!   content in every view;
//! - a view type's content types changed: re-place the contents of the added
//!   and removed types;
//! - anything that changes the filter or sorter set of a view: rebuild it.
//!
//! Members are stored with the sort key they were placed with. Re-placing
//! one content therefore never depends on other members' keys being current,
//! and once every affected content is re-placed the list matches a rebuild.
//!
//! Pool membership is direct: a view type pools the instances of the content
//! types it lists, not of their descendants.

mod plan;

use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::errors::Result;
use crate::kinds::{KindRegistry, ValueKind};
use crate::model::{AttributeInstance, EntityId, Kind, Resource};
use crate::ops::{Store, TypeKey};
use crate::reactive::{Field, FieldValue};

pub(crate) use plan::{Member, ViewPlan};

/// Materialized members of one view instance, in view order
#[derive(Debug, Clone, Default)]
pub(crate) struct ViewState {
    members: Vec<Member>,
}

impl ViewState {
    pub(crate) fn ids(&self) -> Vec<EntityId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    fn remove(&mut self, id: &EntityId) -> Option<Member> {
        let position = self.members.iter().position(|m| &m.id == id)?;
        Some(self.members.remove(position))
    }

    fn insert(&mut self, member: Member, plan: &ViewPlan, kinds: &KindRegistry) {
        let position = self
            .members
            .partition_point(|m| plan.compare(m, &member, kinds) == Ordering::Less);
        self.members.insert(position, member);
    }
}

fn materialize(store: &Store, plan: &ViewPlan) -> Vec<Member> {
    let mut members: Vec<Member> = plan
        .pool()
        .iter()
        .flat_map(|ct| store.instances_of(ct, Kind::ContentInstance))
        .filter_map(|c| plan.admit(store, &c))
        .collect();
    members.sort_by(|a, b| plan.compare(a, b, &store.value_kinds));
    members
}

/// Compute the members of a view instance from scratch
///
/// Pure: reads the store, changes nothing. The result is what
/// [`Store::view_members`] must report at all times.
///
/// # Errors
///
/// `NotFound` or `KindMismatch` if `view_id` is not a registered view
/// instance.
pub fn compute_view(store: &Store, view_id: &EntityId) -> Result<Vec<EntityId>> {
    let plan = ViewPlan::build(store, view_id)?;
    Ok(materialize(store, &plan)
        .into_iter()
        .map(|m| m.id)
        .collect())
}

impl Store {
    /// Current members of a view instance, in view order
    ///
    /// # Errors
    ///
    /// `NotFound` or `KindMismatch` if `view_id` is not a registered view
    /// instance.
    pub fn view_members(&self, view_id: &EntityId) -> Result<Vec<EntityId>> {
        self.expect(view_id, Kind::ViewInstance, Resource::as_view_instance)?;
        Ok(self.views.get(view_id).map(ViewState::ids).unwrap_or_default())
    }

    /// Discard and recompute a view's members
    ///
    /// # Errors
    ///
    /// `NotFound` or `KindMismatch` if `view_id` is not a registered view
    /// instance.
    pub fn rebuild_view(&mut self, view_id: &EntityId) -> Result<()> {
        self.expect(view_id, Kind::ViewInstance, Resource::as_view_instance)?;
        self.rebuild(view_id);
        Ok(())
    }

    /// Kind id and behaviour of a joined attribute type, if its kind is known
    pub(crate) fn attribute_kind(&self, type_id: &EntityId) -> Option<(String, Rc<dyn ValueKind>)> {
        if !self.is_joined_as(type_id, Kind::AttributeType) {
            return None;
        }
        let attribute_type = self
            .expect(type_id, Kind::AttributeType, Resource::as_attribute_type)
            .ok()?;
        let kind_id = attribute_type.kind_id.get();
        let kind = self.value_kinds.get(kind_id)?;
        Some((kind_id.clone(), kind))
    }

    /// The value a view sees for an attribute
    ///
    /// Follows `source_id` while it resolves (at most `max_alias_depth`
    /// hops), then takes that attribute's own value, falling back to its
    /// type's default when the value is null.
    pub(crate) fn effective_value(&self, attribute: &AttributeInstance) -> JsonValue {
        let mut current = attribute;
        for _ in 0..self.config.max_alias_depth {
            let next = current
                .source_id
                .get()
                .as_ref()
                .filter(|source| self.is_joined_as(source, Kind::AttributeInstance))
                .and_then(|source| {
                    self.expect(source, Kind::AttributeInstance, Resource::as_attribute_instance)
                        .ok()
                });
            match next {
                Some(source) => current = source,
                None => break,
            }
        }

        let value = current.value.get();
        if !value.is_null() {
            return value.clone();
        }
        let type_id = current.type_id.get();
        if !self.is_joined_as(type_id, Kind::AttributeType) {
            return JsonValue::Null;
        }
        self.expect(type_id, Kind::AttributeType, Resource::as_attribute_type)
            .map(|t| t.default_value.get().clone())
            .unwrap_or(JsonValue::Null)
    }

    /// Full rebuild of one joined view
    pub(crate) fn rebuild(&mut self, view_id: &EntityId) {
        if !self.views.contains_key(view_id) {
            return;
        }
        let members = match ViewPlan::build(self, view_id) {
            Ok(plan) => materialize(self, &plan),
            Err(e) => {
                tracing::debug!(view_id = view_id.as_str(), error = %e, "view not rebuilt");
                return;
            }
        };
        if let Some(state) = self.views.get_mut(view_id) {
            state.members = members;
        }
        tracing::debug!(view_id = view_id.as_str(), "view rebuilt");
        self.sync_result(view_id);
    }

    /// Re-place one content instance in every joined view
    pub(crate) fn refresh_content(&mut self, content_id: &EntityId) {
        let mut view_ids: Vec<EntityId> = self.views.keys().cloned().collect();
        view_ids.sort();
        for view_id in &view_ids {
            self.refresh_in_view(view_id, content_id);
        }
    }

    /// Re-place one content instance in one joined view
    pub(crate) fn refresh_in_view(&mut self, view_id: &EntityId, content_id: &EntityId) {
        if !self.views.contains_key(view_id) {
            return;
        }
        let Ok(plan) = ViewPlan::build(self, view_id) else {
            return;
        };
        let member = plan.admit(self, content_id);

        let kinds = &self.value_kinds;
        let Some(state) = self.views.get_mut(view_id) else {
            return;
        };
        let previous = state.remove(content_id);
        let changed = match member {
            Some(member) => {
                let unchanged = previous.as_ref() == Some(&member);
                state.insert(member, &plan, kinds);
                !unchanged
            }
            None => previous.is_some(),
        };
        if changed {
            self.sync_result(view_id);
        }
    }

    /// Re-place the contents of the content types added to or removed from
    /// a view type
    pub(crate) fn repool(&mut self, view_id: &EntityId, original: &FieldValue, current: &FieldValue) {
        let (before, after) = (original.ids(), current.ids());
        let delta: Vec<EntityId> = before
            .iter()
            .filter(|id| !after.contains(id))
            .chain(after.iter().filter(|id| !before.contains(id)))
            .cloned()
            .collect();
        for type_id in &delta {
            let contents: Vec<EntityId> = self
                .instances_by_type
                .iter(&TypeKey::Declared(type_id.clone()))
                .cloned()
                .collect();
            for content_id in &contents {
                self.refresh_in_view(view_id, content_id);
            }
        }
    }

    /// Re-place every content that reads `attribute_id`, directly or
    /// through aliases
    pub(crate) fn refresh_attribute(&mut self, attribute_id: &EntityId) {
        let mut pending = vec![(attribute_id.clone(), 0usize)];
        let mut seen: Vec<EntityId> = Vec::new();
        while let Some((current, depth)) = pending.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current.clone());
            let contents: Vec<EntityId> = self.contents_by_attribute.iter(&current).cloned().collect();
            for content_id in &contents {
                self.refresh_content(content_id);
            }
            if depth < self.config.max_alias_depth {
                pending.extend(
                    self.aliases_by_source
                        .iter(&current)
                        .map(|alias| (alias.clone(), depth + 1)),
                );
            }
        }
    }

    /// Re-place the contents of every joined instance of an attribute type
    pub(crate) fn refresh_attribute_type(&mut self, type_id: &EntityId) {
        for attribute_id in self.instances_of(type_id, Kind::AttributeInstance) {
            self.refresh_attribute(&attribute_id);
        }
    }

    /// Rebuild every joined view that references `part_id` as a filter or sorter
    pub(crate) fn rebuild_views_using(&mut self, part_id: &EntityId) {
        let view_ids: Vec<EntityId> = self.view_parts.iter(part_id).cloned().collect();
        for view_id in &view_ids {
            self.rebuild(view_id);
        }
    }

    /// Rebuild every joined view of a view type
    pub(crate) fn rebuild_views_of(&mut self, view_type_id: &EntityId) {
        for view_id in self.instances_of(view_type_id, Kind::ViewInstance) {
            self.rebuild(&view_id);
        }
    }

    /// Copy a view's members into its linked, joined ViewResult
    pub(crate) fn sync_result(&mut self, view_id: &EntityId) {
        let Some(members) = self.views.get(view_id).map(ViewState::ids) else {
            return;
        };
        let result_id = match self.expect(view_id, Kind::ViewInstance, Resource::as_view_instance) {
            Ok(view) => view.result_id.get().clone(),
            Err(_) => return,
        };
        if let Some(result_id) = result_id {
            self.publish_result(&result_id, members);
        }
    }

    /// Overwrite a joined ViewResult's members and notify its observers
    pub(crate) fn publish_result(&mut self, result_id: &EntityId, members: Vec<EntityId>) {
        if !self.is_joined_as(result_id, Kind::ViewResult) {
            return;
        }
        let Ok(result) = self.expect_mut(result_id, Kind::ViewResult, Resource::as_view_result_mut)
        else {
            return;
        };
        if let Some(original) = result.content_instance_ids.set(members.clone()) {
            self.notify(
                result_id,
                Field::ContentInstanceIds,
                original.into(),
                members.into(),
            );
        }
    }
}
