//! Built-in phase effects
//!
//! `join_*` and `leave_*` are exact inverses. Every join that can fail does
//! all of its checking before its first side effect, so a failed phase never
//! needs compensating itself.
//!
//! Internal subscriptions are derived, never stored separately: what an
//! entity subscribes to follows from its own relationship fields
//! ([`Store::subscriptions_held`]), and what others hold on it is found by
//! asking each joined dependent ([`Store::subscriptions_offered`]).

use serde_json::Value as JsonValue;

use super::mutate::Reaction;
use super::store::{Store, TypeKey};
use crate::errors::{EntityError, Result};
use crate::model::{EntityId, Kind, Relation, Resource};
use crate::reactive::Field;
use crate::views::ViewState;

/// `(owner, field, subscriber, reaction)`
pub(crate) type Wire = (EntityId, Field, EntityId, Reaction);

const ATTRIBUTE_TYPE_FIELDS: [Field; 3] = [Field::KindId, Field::KindProperties, Field::DefaultValue];

impl Store {
    // ===== Shared phases =====

    pub(crate) fn join_resource(&mut self, id: &EntityId) -> Result<()> {
        let resource = self.entities.get_mut(id).ok_or_else(|| EntityError::NotFound {
            id: Some(id.clone()),
        })?;
        resource.identity_mut().lock();
        let kind = resource.kind();
        self.by_kind.push(kind, id.clone());
        Ok(())
    }

    pub(crate) fn leave_resource(&mut self, id: &EntityId) -> Result<()> {
        let kind = self.entity(id)?.kind();
        self.by_kind.pop_value(&kind, id)?;
        self.subscriptions.drop_owner(id);
        self.subscriptions.drop_subscriber(id);
        if let Some(resource) = self.entities.get_mut(id) {
            resource.identity_mut().unlock();
        }
        Ok(())
    }

    pub(crate) fn join_type(&mut self, id: &EntityId) -> Result<()> {
        self.entity(id)?;
        self.instances_by_type
            .pin(TypeKey::Declared(id.clone()), TypeKey::Registered(id.clone()))?;
        Ok(())
    }

    pub(crate) fn leave_type(&mut self, id: &EntityId) -> Result<()> {
        self.entity(id)?;
        self.instances_by_type
            .unpin(&TypeKey::Registered(id.clone()), &TypeKey::Declared(id.clone()))?;
        Ok(())
    }

    pub(crate) fn join_instance(&mut self, id: &EntityId) -> Result<()> {
        let type_id = self.declared_type(id)?;
        self.instances_by_type
            .push(TypeKey::Declared(type_id), id.clone());
        Ok(())
    }

    pub(crate) fn leave_instance(&mut self, id: &EntityId) -> Result<()> {
        let type_id = self.declared_type(id)?;
        self.instances_by_type
            .pop_value(&TypeKey::Declared(type_id), id)?;
        Ok(())
    }

    fn declared_type(&self, id: &EntityId) -> Result<EntityId> {
        let resource = self.entity(id)?;
        resource.type_id().cloned().ok_or_else(|| {
            EntityError::NotCreated {
                kind: resource.kind(),
                reason: "instance has no type_id".to_string(),
            }
            .into()
        })
    }

    // ===== Leaf phases =====

    pub(crate) fn join_content_type(&mut self, id: &EntityId) -> Result<()> {
        let bases = self
            .expect(id, Kind::ContentType, Resource::as_content_type)?
            .base_ids
            .get()
            .clone();
        if self.closes_cycle(id, &bases) {
            return Err(EntityError::InheritanceCycle { id: id.clone() }.into());
        }
        self.join(id);
        for content_id in self.instances_of(id, Kind::ContentInstance) {
            self.refresh_content(&content_id);
        }
        Ok(())
    }

    pub(crate) fn leave_content_type(&mut self, id: &EntityId) -> Result<()> {
        self.expect(id, Kind::ContentType, Resource::as_content_type)?;
        let contents = self.instances_of(id, Kind::ContentInstance);
        self.leave(id);
        for content_id in &contents {
            self.refresh_content(content_id);
        }
        Ok(())
    }

    pub(crate) fn join_attribute_type(&mut self, id: &EntityId) -> Result<()> {
        self.expect(id, Kind::AttributeType, Resource::as_attribute_type)?;
        let offered = self.subscriptions_offered(id)?;
        self.wire(offered);
        self.join(id);
        self.refresh_attribute_type(id);
        Ok(())
    }

    pub(crate) fn leave_attribute_type(&mut self, id: &EntityId) -> Result<()> {
        self.expect(id, Kind::AttributeType, Resource::as_attribute_type)?;
        let offered = self.subscriptions_offered(id)?;
        self.leave(id);
        self.unwire(&offered);
        self.refresh_attribute_type(id);
        Ok(())
    }

    pub(crate) fn join_content_instance(&mut self, id: &EntityId) -> Result<()> {
        let attribute_ids = self
            .expect(id, Kind::ContentInstance, Resource::as_content_instance)?
            .attribute_ids
            .get()
            .clone();
        for attribute_id in attribute_ids {
            self.contents_by_attribute.push(attribute_id, id.clone());
        }
        let held = self.subscriptions_held(id)?;
        self.wire(held);
        self.join(id);
        self.refresh_content(id);
        Ok(())
    }

    pub(crate) fn leave_content_instance(&mut self, id: &EntityId) -> Result<()> {
        let attribute_ids = self
            .expect(id, Kind::ContentInstance, Resource::as_content_instance)?
            .attribute_ids
            .get()
            .clone();
        self.leave(id);
        self.refresh_content(id);
        let held = self.subscriptions_held(id)?;
        self.unwire(&held);
        for attribute_id in &attribute_ids {
            self.contents_by_attribute.pop_value(attribute_id, id)?;
        }
        Ok(())
    }

    pub(crate) fn join_attribute_instance(&mut self, id: &EntityId) -> Result<()> {
        let attribute = self.expect(id, Kind::AttributeInstance, Resource::as_attribute_instance)?;
        let type_id = attribute.type_id.get().clone();
        let value = attribute.value.get().clone();
        let source = attribute.source_id.get().clone();

        let processed = self.checked_value(id, &type_id, value)?;
        if let Ok(attribute) =
            self.expect_mut(id, Kind::AttributeInstance, Resource::as_attribute_instance_mut)
        {
            attribute.value.set(processed);
        }

        if let Some(source) = source {
            self.aliases_by_source.push(source, id.clone());
        }
        let held = self.subscriptions_held(id)?;
        let offered = self.subscriptions_offered(id)?;
        self.wire(held);
        self.wire(offered);
        self.join(id);
        self.refresh_attribute(id);
        Ok(())
    }

    pub(crate) fn leave_attribute_instance(&mut self, id: &EntityId) -> Result<()> {
        let source = self
            .expect(id, Kind::AttributeInstance, Resource::as_attribute_instance)?
            .source_id
            .get()
            .clone();
        self.leave(id);
        self.refresh_attribute(id);
        let held = self.subscriptions_held(id)?;
        let offered = self.subscriptions_offered(id)?;
        self.unwire(&held);
        self.unwire(&offered);
        if let Some(source) = source {
            self.aliases_by_source.pop_value(&source, id)?;
        }
        Ok(())
    }

    /// Join phase of filter and sorter types
    pub(crate) fn join_part_type(&mut self, id: &EntityId) -> Result<()> {
        let instance_kind = self.part_instance_kind(id)?;
        let offered = self.subscriptions_offered(id)?;
        self.wire(offered);
        self.join(id);
        for instance_id in self.instances_of(id, instance_kind) {
            self.rebuild_views_using(&instance_id);
        }
        Ok(())
    }

    pub(crate) fn leave_part_type(&mut self, id: &EntityId) -> Result<()> {
        let instance_kind = self.part_instance_kind(id)?;
        let offered = self.subscriptions_offered(id)?;
        self.leave(id);
        self.unwire(&offered);
        for instance_id in self.instances_of(id, instance_kind) {
            self.rebuild_views_using(&instance_id);
        }
        Ok(())
    }

    fn part_instance_kind(&self, id: &EntityId) -> Result<Kind> {
        match self.entity(id)?.kind() {
            Kind::FilterType => Ok(Kind::FilterInstance),
            Kind::SorterType => Ok(Kind::SorterInstance),
            actual => Err(EntityError::KindMismatch {
                id: id.clone(),
                expected: Kind::FilterType,
                actual,
            }
            .into()),
        }
    }

    /// Join phase of filter and sorter instances
    pub(crate) fn join_part_instance(&mut self, id: &EntityId) -> Result<()> {
        let held = self.subscriptions_held(id)?;
        let offered = self.subscriptions_offered(id)?;
        self.wire(held);
        self.wire(offered);
        self.join(id);
        self.rebuild_views_using(id);
        Ok(())
    }

    pub(crate) fn leave_part_instance(&mut self, id: &EntityId) -> Result<()> {
        let held = self.subscriptions_held(id)?;
        let offered = self.subscriptions_offered(id)?;
        self.leave(id);
        self.rebuild_views_using(id);
        self.unwire(&held);
        self.unwire(&offered);
        Ok(())
    }

    pub(crate) fn join_view_type(&mut self, id: &EntityId) -> Result<()> {
        self.expect(id, Kind::ViewType, Resource::as_view_type)?;
        let offered = self.subscriptions_offered(id)?;
        self.wire(offered);
        self.join(id);
        self.rebuild_views_of(id);
        Ok(())
    }

    pub(crate) fn leave_view_type(&mut self, id: &EntityId) -> Result<()> {
        self.expect(id, Kind::ViewType, Resource::as_view_type)?;
        let offered = self.subscriptions_offered(id)?;
        self.leave(id);
        self.unwire(&offered);
        self.rebuild_views_of(id);
        Ok(())
    }

    pub(crate) fn join_view_instance(&mut self, id: &EntityId) -> Result<()> {
        let parts = self.view_part_ids(id)?;
        for part_id in parts {
            self.view_parts.push(part_id, id.clone());
        }
        let held = self.subscriptions_held(id)?;
        self.wire(held);
        self.join(id);
        self.views.insert(id.clone(), ViewState::default());
        self.rebuild(id);
        Ok(())
    }

    pub(crate) fn leave_view_instance(&mut self, id: &EntityId) -> Result<()> {
        let parts = self.view_part_ids(id)?;
        let result_id = self
            .expect(id, Kind::ViewInstance, Resource::as_view_instance)?
            .result_id
            .get()
            .clone();
        self.leave(id);
        self.views.remove(id);
        if let Some(result_id) = result_id {
            self.publish_result(&result_id, Vec::new());
        }
        let held = self.subscriptions_held(id)?;
        self.unwire(&held);
        for part_id in &parts {
            self.view_parts.pop_value(part_id, id)?;
        }
        Ok(())
    }

    /// Filter, sorter and result ids a view instance is indexed under
    pub(crate) fn view_part_ids(&self, id: &EntityId) -> Result<Vec<EntityId>> {
        let view = self.expect(id, Kind::ViewInstance, Resource::as_view_instance)?;
        Ok(view
            .filter_ids
            .get()
            .iter()
            .chain(view.sorter_ids.get())
            .chain(view.result_id.get())
            .cloned()
            .collect())
    }

    pub(crate) fn join_view_result(&mut self, id: &EntityId) -> Result<()> {
        self.expect(id, Kind::ViewResult, Resource::as_view_result)?;
        self.join(id);
        let views: Vec<EntityId> = self.view_parts.iter(id).cloned().collect();
        for view_id in &views {
            self.sync_result(view_id);
        }
        Ok(())
    }

    pub(crate) fn leave_view_result(&mut self, id: &EntityId) -> Result<()> {
        self.expect(id, Kind::ViewResult, Resource::as_view_result)?;
        self.leave(id);
        Ok(())
    }

    // ===== Helpers =====

    /// Open the entity's resolver slot
    fn join(&mut self, id: &EntityId) {
        if let Some(resource) = self.entities.get(id) {
            self.resolvers
                .insert(id.clone(), Relation::declared_for(resource.kind()));
        }
    }

    fn leave(&mut self, id: &EntityId) {
        self.resolvers.remove(id);
    }

    /// Whether giving `id` these bases would let it reach itself
    pub(crate) fn closes_cycle(&self, id: &EntityId, bases: &[EntityId]) -> bool {
        let mut pending: Vec<EntityId> = bases.to_vec();
        let mut seen: Vec<EntityId> = Vec::new();
        while let Some(current) = pending.pop() {
            if &current == id {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            if let Some(Resource::ContentType(ct)) = self.entities.get(&current) {
                pending.extend(ct.base_ids.get().iter().cloned());
            }
            seen.push(current);
        }
        false
    }

    /// Normalize and validate a value against its attribute type
    ///
    /// Values of attributes whose type is not joined yet are taken as is.
    pub(crate) fn checked_value(
        &self,
        id: &EntityId,
        type_id: &EntityId,
        value: JsonValue,
    ) -> Result<JsonValue> {
        if !self.is_joined_as(type_id, Kind::AttributeType) {
            return Ok(value);
        }
        let attribute_type = self.expect(type_id, Kind::AttributeType, Resource::as_attribute_type)?;
        let kind_id = attribute_type.kind_id.get();
        let kind = self
            .value_kinds
            .get(kind_id)
            .ok_or_else(|| EntityError::UnknownValueKind {
                id: id.clone(),
                kind_id: kind_id.clone(),
            })?;
        let properties = attribute_type.kind_properties.get();
        let processed = kind.process(value, properties);
        kind.validate(&processed, properties)
            .map_err(|reason| EntityError::InvalidValue {
                id: id.clone(),
                kind_id: kind_id.clone(),
                reason,
            })?;
        Ok(processed)
    }

    /// Internal subscriptions `id` holds, derived from its own fields
    pub(crate) fn subscriptions_held(&self, id: &EntityId) -> Result<Vec<Wire>> {
        let mut wires = Vec::new();
        match self.entity(id)? {
            Resource::ContentInstance(c) => {
                for attribute_id in c.attribute_ids.get() {
                    wires.push((attribute_id.clone(), Field::Value, id.clone(), Reaction::Reevaluate));
                }
            }
            Resource::AttributeInstance(a) => {
                if let Some(source) = a.source_id.get() {
                    wires.push((source.clone(), Field::Value, id.clone(), Reaction::Relay(Field::Value)));
                }
                for field in ATTRIBUTE_TYPE_FIELDS {
                    wires.push((a.type_id.get().clone(), field, id.clone(), Reaction::Relay(Field::Value)));
                }
            }
            Resource::FilterInstance(_) | Resource::SorterInstance(_) => {
                let type_id = self.declared_type(id)?;
                wires.push((type_id, Field::AttributeTypeIds, id.clone(), Reaction::Relay(Field::KindParams)));
            }
            Resource::ViewInstance(v) => {
                for part_id in v.filter_ids.get().iter().chain(v.sorter_ids.get()) {
                    wires.push((part_id.clone(), Field::KindParams, id.clone(), Reaction::Rebuild));
                }
                let type_id = v.type_id.get();
                wires.push((type_id.clone(), Field::ContentTypeIds, id.clone(), Reaction::Repool));
                wires.push((type_id.clone(), Field::FilterTypeIds, id.clone(), Reaction::Rebuild));
                wires.push((type_id.clone(), Field::SorterTypeIds, id.clone(), Reaction::Rebuild));
            }
            _ => {}
        }
        Ok(wires)
    }

    /// Internal subscriptions joined dependents hold on `id`
    pub(crate) fn subscriptions_offered(&self, id: &EntityId) -> Result<Vec<Wire>> {
        let dependents: Vec<EntityId> = match self.entity(id)?.kind() {
            Kind::AttributeInstance => self
                .contents_by_attribute
                .iter(id)
                .chain(self.aliases_by_source.iter(id))
                .cloned()
                .collect(),
            Kind::AttributeType => self.instances_of(id, Kind::AttributeInstance),
            Kind::FilterType => self.instances_of(id, Kind::FilterInstance),
            Kind::SorterType => self.instances_of(id, Kind::SorterInstance),
            Kind::FilterInstance | Kind::SorterInstance => {
                self.view_parts.iter(id).cloned().collect()
            }
            Kind::ViewType => self.instances_of(id, Kind::ViewInstance),
            _ => Vec::new(),
        };

        let mut wires = Vec::new();
        for dependent in dependents.iter().filter(|d| self.is_joined(d)) {
            wires.extend(
                self.subscriptions_held(dependent)?
                    .into_iter()
                    .filter(|(owner, ..)| owner == id),
            );
        }
        Ok(wires)
    }

    pub(crate) fn wire(&mut self, wires: Vec<Wire>) {
        for (owner, field, subscriber, reaction) in wires {
            self.subscriptions.subscribe(&owner, field, &subscriber, reaction);
        }
    }

    pub(crate) fn unwire(&mut self, wires: &[Wire]) {
        for (owner, field, subscriber, reaction) in wires {
            self.subscriptions.unsubscribe(owner, *field, subscriber, reaction);
        }
    }
}
