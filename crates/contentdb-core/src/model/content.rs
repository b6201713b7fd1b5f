use serde::Serialize;

use super::identity::{EntityId, Identity, Kind};
use crate::reactive::Property;

/// ContentType - a schema for content instances
///
/// `base_ids` form an inheritance DAG over content types; the store rejects
/// registrations and updates that would close a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentType {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub name: Property<String>,
    pub base_ids: Property<Vec<EntityId>>,
    pub attribute_type_ids: Property<Vec<EntityId>>,
}

impl ContentType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            identity: Identity::new(Kind::ContentType),
            name: Property::new(name.into()),
            base_ids: Property::default(),
            attribute_type_ids: Property::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::ContentType, id.into());
        self
    }

    pub fn with_bases(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.base_ids = Property::new(ids.into_iter().collect());
        self
    }

    pub fn with_attribute_types(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.attribute_type_ids = Property::new(ids.into_iter().collect());
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

/// ContentInstance - one piece of content, typed by a ContentType
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentInstance {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub type_id: Property<EntityId>,
    pub attribute_ids: Property<Vec<EntityId>>,
}

impl ContentInstance {
    pub fn new(type_id: impl Into<EntityId>) -> Self {
        Self {
            identity: Identity::new(Kind::ContentInstance),
            type_id: Property::new(type_id.into()),
            attribute_ids: Property::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::ContentInstance, id.into());
        self
    }

    pub fn with_attributes(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.attribute_ids = Property::new(ids.into_iter().collect());
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}
