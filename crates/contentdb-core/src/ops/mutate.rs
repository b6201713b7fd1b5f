//! Field mutation and change propagation
//!
//! Every mutator writes through the entity's [`Property`](crate::reactive::Property),
//! keeps the secondary indexes and internal subscriptions in step with the
//! new field value, then notifies subscribers of the change. Internal
//! subscriptions carry a [`Reaction`] that drives view recomputation;
//! caller observers receive the [`Notice`] itself.
//!
//! Mutators validate before their first write, so a failed call leaves the
//! store untouched.

use serde_json::Value as JsonValue;
use std::time::Instant;

use super::phases::Wire;
use super::store::{Store, TypeKey};
use crate::errors::{EntityError, Result};
use crate::model::{EntityId, Kind, Resource};
use crate::reactive::{Field, FieldValue, Notice, Observer};
use crate::{log_op_end, log_op_error, log_op_start};

/// What a subscription does when the field it watches changes
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Re-place the subscribing content instance in every view
    Reevaluate,
    /// Re-announce the change as the subscriber's own field
    Relay(Field),
    /// Fully rebuild the subscribing view instance
    Rebuild,
    /// Re-place the contents of content types entering or leaving the pool
    Repool,
    /// Caller-supplied callback
    Observer(Observer),
}

impl Store {
    // ===== Propagation =====

    /// Deliver a change of `owner`'s `field` to its subscribers
    pub(crate) fn notify(
        &mut self,
        owner: &EntityId,
        field: Field,
        original: FieldValue,
        current: FieldValue,
    ) {
        let notice = Notice {
            owner: owner.clone(),
            field,
            original,
            current,
        };
        self.dispatch(&notice, 0);
    }

    fn dispatch(&mut self, notice: &Notice, depth: usize) {
        for subscription in self.subscriptions.snapshot(&notice.owner, notice.field) {
            // an earlier reaction may have dropped this one
            if !self
                .subscriptions
                .is_subscribed(&notice.owner, notice.field, &subscription.subscriber)
            {
                continue;
            }
            let subscriber = &subscription.subscriber;
            match subscription.callback {
                Reaction::Reevaluate => self.refresh_content(subscriber),
                Reaction::Relay(field) => {
                    // only alias hops count against the limit
                    let depth = if matches!(
                        self.entities.get(&notice.owner),
                        Some(Resource::AttributeInstance(_))
                    ) {
                        depth + 1
                    } else {
                        depth
                    };
                    if depth > self.config.max_alias_depth {
                        tracing::debug!(
                            owner = notice.owner.as_str(),
                            subscriber = subscriber.as_str(),
                            depth,
                            "relay depth exhausted"
                        );
                        continue;
                    }
                    let relayed = Notice {
                        owner: subscriber.clone(),
                        field,
                        original: notice.original.clone(),
                        current: notice.current.clone(),
                    };
                    self.dispatch(&relayed, depth);
                }
                Reaction::Rebuild => self.rebuild(subscriber),
                Reaction::Repool => self.repool(subscriber, &notice.original, &notice.current),
                Reaction::Observer(observer) => observer.call(notice),
            }
        }
    }

    fn announce<T: Into<FieldValue>>(
        &mut self,
        id: &EntityId,
        field: Field,
        original: Option<T>,
        current: T,
    ) {
        if let Some(original) = original {
            self.notify(id, field, original.into(), current.into());
        }
    }

    /// Swap the subscriptions `id` holds from `before` to `after`
    fn rewire(&mut self, before: Vec<Wire>, after: Vec<Wire>) {
        let dropped: Vec<Wire> = before.iter().filter(|w| !after.contains(w)).cloned().collect();
        let added: Vec<Wire> = after.into_iter().filter(|w| !before.contains(w)).collect();
        self.unwire(&dropped);
        self.wire(added);
    }

    // ===== Shared fields =====

    /// Rename a type
    ///
    /// # Errors
    ///
    /// `NotFound`, or `KindMismatch` for instances and view results.
    pub fn set_name(&mut self, id: &EntityId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let resource = self.entities.get_mut(id).ok_or_else(|| EntityError::NotFound {
            id: Some(id.clone()),
        })?;
        let actual = resource.kind();
        let property = resource.name_mut().ok_or_else(|| EntityError::KindMismatch {
            id: id.clone(),
            expected: Kind::ContentType,
            actual,
        })?;
        let original = property.set(name.clone());
        self.announce(id, Field::Name, original, name);
        Ok(())
    }

    /// Point an instance at another type
    ///
    /// Attribute instances re-validate their value against the new type.
    ///
    /// # Errors
    ///
    /// `NotFound`; `KindMismatch` for types and view results;
    /// `InvalidValue` or `UnknownValueKind` when an attribute's value does
    /// not fit the new type.
    pub fn set_instance_type(&mut self, id: &EntityId, type_id: impl Into<EntityId>) -> Result<()> {
        let type_id = type_id.into();
        let resource = self.entity(id)?;
        let kind = resource.kind();
        if let Resource::AttributeInstance(attribute) = resource {
            let value = attribute.value.get().clone();
            return self.assign_attribute(id, type_id, value);
        }
        let Some(old_type) = resource.type_id().cloned() else {
            return Err(EntityError::KindMismatch {
                id: id.clone(),
                expected: Kind::ContentInstance,
                actual: kind,
            }
            .into());
        };
        if old_type == type_id {
            return Ok(());
        }

        let before = self.subscriptions_held(id)?;
        self.instances_by_type.move_value(
            id,
            &TypeKey::Declared(old_type),
            TypeKey::Declared(type_id.clone()),
        )?;
        let original = self
            .entities
            .get_mut(id)
            .and_then(Resource::type_id_mut)
            .and_then(|property| property.set(type_id.clone()));
        let after = self.subscriptions_held(id)?;
        self.rewire(before, after);
        self.announce(id, Field::TypeId, original, type_id);

        match kind {
            Kind::ContentInstance => self.refresh_content(id),
            Kind::FilterInstance | Kind::SorterInstance => self.rebuild_views_using(id),
            Kind::ViewInstance => self.rebuild(id),
            _ => {}
        }
        Ok(())
    }

    /// Point a content instance at another content type
    ///
    /// # Errors
    ///
    /// `NotFound`, or `KindMismatch` if `id` is not a content instance.
    pub fn set_content_type(&mut self, id: &EntityId, type_id: impl Into<EntityId>) -> Result<()> {
        self.expect(id, Kind::ContentInstance, Resource::as_content_instance)?;
        self.set_instance_type(id, type_id)
    }

    // ===== Content types and instances =====

    /// # Errors
    ///
    /// `InheritanceCycle` if `id` would become its own ancestor.
    pub fn set_content_type_bases(&mut self, id: &EntityId, base_ids: Vec<EntityId>) -> Result<()> {
        self.expect(id, Kind::ContentType, Resource::as_content_type)?;
        if self.closes_cycle(id, &base_ids) {
            return Err(EntityError::InheritanceCycle { id: id.clone() }.into());
        }
        let original = self
            .expect_mut(id, Kind::ContentType, Resource::as_content_type_mut)?
            .base_ids
            .set(base_ids.clone());
        self.announce(id, Field::BaseIds, original, base_ids);
        Ok(())
    }

    pub fn set_content_type_attribute_types(
        &mut self,
        id: &EntityId,
        attribute_type_ids: Vec<EntityId>,
    ) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::ContentType, Resource::as_content_type_mut)?
            .attribute_type_ids
            .set(attribute_type_ids.clone());
        self.announce(id, Field::AttributeTypeIds, original, attribute_type_ids);
        Ok(())
    }

    /// Replace the attributes a content instance holds
    pub fn set_content_attributes(&mut self, id: &EntityId, attribute_ids: Vec<EntityId>) -> Result<()> {
        let current = self
            .expect(id, Kind::ContentInstance, Resource::as_content_instance)?
            .attribute_ids
            .get();
        if current == &attribute_ids {
            return Ok(());
        }
        let before = self.subscriptions_held(id)?;
        let Some(original) = self
            .expect_mut(id, Kind::ContentInstance, Resource::as_content_instance_mut)?
            .attribute_ids
            .set(attribute_ids.clone())
        else {
            return Ok(());
        };
        for attribute_id in &original {
            self.contents_by_attribute.pop_value(attribute_id, id)?;
        }
        for attribute_id in &attribute_ids {
            self.contents_by_attribute.push(attribute_id.clone(), id.clone());
        }
        let after = self.subscriptions_held(id)?;
        self.rewire(before, after);
        self.notify(id, Field::AttributeIds, original.into(), attribute_ids.into());
        self.refresh_content(id);
        Ok(())
    }

    // ===== Attribute types and instances =====

    pub fn set_attribute_type_kind(&mut self, id: &EntityId, kind_id: impl Into<String>) -> Result<()> {
        let kind_id = kind_id.into();
        let original = self
            .expect_mut(id, Kind::AttributeType, Resource::as_attribute_type_mut)?
            .kind_id
            .set(kind_id.clone());
        self.announce(id, Field::KindId, original, kind_id);
        Ok(())
    }

    pub fn set_attribute_type_properties(&mut self, id: &EntityId, properties: JsonValue) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::AttributeType, Resource::as_attribute_type_mut)?
            .kind_properties
            .set(properties.clone());
        self.announce(id, Field::KindProperties, original, properties);
        Ok(())
    }

    pub fn set_attribute_type_default(&mut self, id: &EntityId, default_value: JsonValue) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::AttributeType, Resource::as_attribute_type_mut)?
            .default_value
            .set(default_value.clone());
        self.announce(id, Field::DefaultValue, original, default_value);
        Ok(())
    }

    /// Write an attribute's value
    ///
    /// The value is processed and validated by the attribute type's value
    /// kind when that type is registered.
    ///
    /// # Errors
    ///
    /// `NotFound`, `KindMismatch`, `UnknownValueKind` or `InvalidValue`.
    pub fn set_attribute_value(&mut self, id: &EntityId, value: JsonValue) -> Result<()> {
        let type_id = self
            .expect(id, Kind::AttributeInstance, Resource::as_attribute_instance)?
            .type_id
            .get()
            .clone();
        self.assign_attribute(id, type_id, value)
    }

    /// Type and value of an attribute, validated together
    fn assign_attribute(&mut self, id: &EntityId, type_id: EntityId, value: JsonValue) -> Result<()> {
        let old_type = self
            .expect(id, Kind::AttributeInstance, Resource::as_attribute_instance)?
            .type_id
            .get()
            .clone();
        let processed = self.checked_value(id, &type_id, value)?;

        let retyped = old_type != type_id;
        let mut type_change = None;
        if retyped {
            let before = self.subscriptions_held(id)?;
            self.instances_by_type.move_value(
                id,
                &TypeKey::Declared(old_type),
                TypeKey::Declared(type_id.clone()),
            )?;
            type_change = self
                .expect_mut(id, Kind::AttributeInstance, Resource::as_attribute_instance_mut)?
                .type_id
                .set(type_id.clone());
            let after = self.subscriptions_held(id)?;
            self.rewire(before, after);
        }
        let value_change = self
            .expect_mut(id, Kind::AttributeInstance, Resource::as_attribute_instance_mut)?
            .value
            .set(processed.clone());

        self.announce(id, Field::TypeId, type_change, type_id);
        self.announce(id, Field::Value, value_change, processed);
        if retyped {
            self.refresh_attribute(id);
        }
        Ok(())
    }

    /// Make an attribute alias another one, or stop aliasing with `None`
    pub fn set_attribute_source(&mut self, id: &EntityId, source_id: Option<EntityId>) -> Result<()> {
        let before = self.subscriptions_held(id)?;
        let Some(original) = self
            .expect_mut(id, Kind::AttributeInstance, Resource::as_attribute_instance_mut)?
            .source_id
            .set(source_id.clone())
        else {
            return Ok(());
        };
        if let Some(old_source) = &original {
            self.aliases_by_source.pop_value(old_source, id)?;
        }
        if let Some(new_source) = &source_id {
            self.aliases_by_source.push(new_source.clone(), id.clone());
        }
        let after = self.subscriptions_held(id)?;
        self.rewire(before, after);
        self.notify(id, Field::SourceId, original.into(), source_id.into());
        self.refresh_attribute(id);
        Ok(())
    }

    // ===== Filters and sorters =====

    pub fn set_filter_params(&mut self, id: &EntityId, kind_params: JsonValue) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::FilterInstance, Resource::as_filter_instance_mut)?
            .kind_params
            .set(kind_params.clone());
        self.announce(id, Field::KindParams, original, kind_params);
        Ok(())
    }

    pub fn set_sorter_params(&mut self, id: &EntityId, kind_params: JsonValue) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::SorterInstance, Resource::as_sorter_instance_mut)?
            .kind_params
            .set(kind_params.clone());
        self.announce(id, Field::KindParams, original, kind_params);
        Ok(())
    }

    pub fn set_filter_type_attributes(
        &mut self,
        id: &EntityId,
        attribute_type_ids: Vec<EntityId>,
    ) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::FilterType, Resource::as_filter_type_mut)?
            .attribute_type_ids
            .set(attribute_type_ids.clone());
        self.announce(id, Field::AttributeTypeIds, original, attribute_type_ids);
        Ok(())
    }

    pub fn set_sorter_type_attributes(
        &mut self,
        id: &EntityId,
        attribute_type_ids: Vec<EntityId>,
    ) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::SorterType, Resource::as_sorter_type_mut)?
            .attribute_type_ids
            .set(attribute_type_ids.clone());
        self.announce(id, Field::AttributeTypeIds, original, attribute_type_ids);
        Ok(())
    }

    // ===== Views =====

    /// Replace the content types pooled by a view type
    ///
    /// Only the contents of the added and removed types are re-placed.
    pub fn set_view_type_content_types(
        &mut self,
        id: &EntityId,
        content_type_ids: Vec<EntityId>,
    ) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::ViewType, Resource::as_view_type_mut)?
            .content_type_ids
            .set(content_type_ids.clone());
        self.announce(id, Field::ContentTypeIds, original, content_type_ids);
        Ok(())
    }

    pub fn set_view_type_filter_types(
        &mut self,
        id: &EntityId,
        filter_type_ids: Vec<EntityId>,
    ) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::ViewType, Resource::as_view_type_mut)?
            .filter_type_ids
            .set(filter_type_ids.clone());
        self.announce(id, Field::FilterTypeIds, original, filter_type_ids);
        Ok(())
    }

    pub fn set_view_type_sorter_types(
        &mut self,
        id: &EntityId,
        sorter_type_ids: Vec<EntityId>,
    ) -> Result<()> {
        let original = self
            .expect_mut(id, Kind::ViewType, Resource::as_view_type_mut)?
            .sorter_type_ids
            .set(sorter_type_ids.clone());
        self.announce(id, Field::SorterTypeIds, original, sorter_type_ids);
        Ok(())
    }

    /// Replace a view's filters and rebuild it
    pub fn set_view_filters(&mut self, id: &EntityId, filter_ids: Vec<EntityId>) -> Result<()> {
        self.set_view_parts(id, Field::FilterIds, filter_ids)
    }

    /// Replace a view's sorters and rebuild it
    pub fn set_view_sorters(&mut self, id: &EntityId, sorter_ids: Vec<EntityId>) -> Result<()> {
        self.set_view_parts(id, Field::SorterIds, sorter_ids)
    }

    fn set_view_parts(&mut self, id: &EntityId, field: Field, part_ids: Vec<EntityId>) -> Result<()> {
        let before = self.subscriptions_held(id)?;
        let view = self.expect_mut(id, Kind::ViewInstance, Resource::as_view_instance_mut)?;
        let property = match field {
            Field::FilterIds => &mut view.filter_ids,
            _ => &mut view.sorter_ids,
        };
        let Some(original) = property.set(part_ids.clone()) else {
            return Ok(());
        };
        for part_id in &original {
            self.view_parts.pop_value(part_id, id)?;
        }
        for part_id in &part_ids {
            self.view_parts.push(part_id.clone(), id.clone());
        }
        let after = self.subscriptions_held(id)?;
        self.rewire(before, after);
        self.notify(id, field, original.into(), part_ids.into());
        self.rebuild(id);
        Ok(())
    }

    /// Link a view to a result, or unlink it with `None`
    ///
    /// The previous result is cleared unless another view still publishes
    /// to it.
    pub fn set_view_result(&mut self, id: &EntityId, result_id: Option<EntityId>) -> Result<()> {
        let Some(original) = self
            .expect_mut(id, Kind::ViewInstance, Resource::as_view_instance_mut)?
            .result_id
            .set(result_id.clone())
        else {
            return Ok(());
        };
        if let Some(old_result) = &original {
            self.view_parts.pop_value(old_result, id)?;
        }
        if let Some(new_result) = &result_id {
            self.view_parts.push(new_result.clone(), id.clone());
        }
        self.notify(id, Field::ResultId, original.clone().into(), result_id.into());

        if let Some(old_result) = &original {
            self.publish_result(old_result, Vec::new());
            let others: Vec<EntityId> = self.view_parts.iter(old_result).cloned().collect();
            for view_id in &others {
                self.sync_result(view_id);
            }
        }
        self.sync_result(id);
        Ok(())
    }

    // ===== Whole-resource update =====

    /// Bring a registered entity in line with `replacement`
    ///
    /// Every field that differs is written through its mutator, so indexes,
    /// subscriptions and views follow. Members of a view result are derived
    /// and never taken from the replacement.
    ///
    /// # Errors
    ///
    /// * `IdImmutable` - `replacement` carries another id
    /// * `KindMismatch` - `replacement` is of another kind
    /// * `NotUpdated` - a new value was rejected; nothing was changed
    pub fn update(&mut self, id: &EntityId, replacement: impl Into<Resource>) -> Result<()> {
        let replacement = replacement.into();
        log_op_start!("update", entity_id = id.as_str());
        let start = Instant::now();

        self.update_impl(id, replacement).map_err(|e| {
            log_op_error!(
                "update",
                &e,
                duration_ms = start.elapsed().as_millis() as u64,
                entity_id = id.as_str()
            );
            e
        })?;

        log_op_end!(
            "update",
            duration_ms = start.elapsed().as_millis() as u64,
            entity_id = id.as_str()
        );
        Ok(())
    }

    fn update_impl(&mut self, id: &EntityId, replacement: Resource) -> Result<()> {
        let current = self.entity(id)?.clone();
        if replacement.id() != id {
            return Err(EntityError::IdImmutable {
                id: id.clone(),
                attempted: replacement.id().clone(),
            }
            .into());
        }
        if replacement.kind() != current.kind() {
            return Err(EntityError::KindMismatch {
                id: id.clone(),
                expected: current.kind(),
                actual: replacement.kind(),
            }
            .into());
        }
        self.validate_update(id, &replacement).map_err(|cause| EntityError::NotUpdated {
            id: id.clone(),
            cause: Box::new(cause),
        })?;

        if let (Some(old), Some(new)) = (current.name(), replacement.name()) {
            if old != new {
                self.set_name(id, new)?;
            }
        }

        match (current, replacement) {
            (Resource::ContentType(old), Resource::ContentType(new)) => {
                if old.base_ids != new.base_ids {
                    self.set_content_type_bases(id, new.base_ids.into_inner())?;
                }
                self.set_content_type_attribute_types(id, new.attribute_type_ids.into_inner())?;
            }
            (Resource::AttributeType(_), Resource::AttributeType(new)) => {
                self.set_attribute_type_kind(id, new.kind_id.into_inner())?;
                self.set_attribute_type_properties(id, new.kind_properties.into_inner())?;
                self.set_attribute_type_default(id, new.default_value.into_inner())?;
            }
            (Resource::ContentInstance(_), Resource::ContentInstance(new)) => {
                self.set_instance_type(id, new.type_id.into_inner())?;
                self.set_content_attributes(id, new.attribute_ids.into_inner())?;
            }
            (Resource::AttributeInstance(old), Resource::AttributeInstance(new)) => {
                self.set_attribute_source(id, new.source_id.into_inner())?;
                if old.type_id != new.type_id || old.value != new.value {
                    self.assign_attribute(id, new.type_id.into_inner(), new.value.into_inner())?;
                }
            }
            (Resource::FilterType(_), Resource::FilterType(new)) => {
                self.set_filter_type_attributes(id, new.attribute_type_ids.into_inner())?;
            }
            (Resource::SorterType(_), Resource::SorterType(new)) => {
                self.set_sorter_type_attributes(id, new.attribute_type_ids.into_inner())?;
            }
            (Resource::FilterInstance(_), Resource::FilterInstance(new)) => {
                self.set_instance_type(id, new.type_id.into_inner())?;
                self.set_filter_params(id, new.kind_params.into_inner())?;
            }
            (Resource::SorterInstance(_), Resource::SorterInstance(new)) => {
                self.set_instance_type(id, new.type_id.into_inner())?;
                self.set_sorter_params(id, new.kind_params.into_inner())?;
            }
            (Resource::ViewType(_), Resource::ViewType(new)) => {
                self.set_view_type_content_types(id, new.content_type_ids.into_inner())?;
                self.set_view_type_filter_types(id, new.filter_type_ids.into_inner())?;
                self.set_view_type_sorter_types(id, new.sorter_type_ids.into_inner())?;
            }
            (Resource::ViewInstance(_), Resource::ViewInstance(new)) => {
                self.set_instance_type(id, new.type_id.into_inner())?;
                self.set_view_filters(id, new.filter_ids.into_inner())?;
                self.set_view_sorters(id, new.sorter_ids.into_inner())?;
                self.set_view_result(id, new.result_id.into_inner())?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Checks that can reject an update, run before anything is written
    fn validate_update(&self, id: &EntityId, replacement: &Resource) -> Result<()> {
        match replacement {
            Resource::ContentType(new) => {
                if self.closes_cycle(id, new.base_ids.get()) {
                    return Err(EntityError::InheritanceCycle { id: id.clone() }.into());
                }
            }
            Resource::AttributeInstance(new) => {
                let current = self.expect(id, Kind::AttributeInstance, Resource::as_attribute_instance)?;
                if current.type_id != new.type_id || current.value != new.value {
                    self.checked_value(id, new.type_id.get(), new.value.get().clone())?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
