use serde::Serialize;
use serde_json::Value as JsonValue;

use super::identity::{EntityId, Identity, Kind};
use crate::reactive::Property;

/// AttributeType - a named, kinded attribute slot
///
/// `kind_id` selects the value kind (`text`, `number`, `boolean`, or any
/// kind registered at startup) that validates, filters and compares the
/// values of its instances.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeType {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub name: Property<String>,
    pub kind_id: Property<String>,
    pub kind_properties: Property<JsonValue>,
    pub default_value: Property<JsonValue>,
}

impl AttributeType {
    pub fn new(name: impl Into<String>, kind_id: impl Into<String>) -> Self {
        Self {
            identity: Identity::new(Kind::AttributeType),
            name: Property::new(name.into()),
            kind_id: Property::new(kind_id.into()),
            kind_properties: Property::new(JsonValue::Null),
            default_value: Property::new(JsonValue::Null),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::AttributeType, id.into());
        self
    }

    pub fn with_properties(mut self, properties: JsonValue) -> Self {
        self.kind_properties = Property::new(properties);
        self
    }

    pub fn with_default(mut self, value: JsonValue) -> Self {
        self.default_value = Property::new(value);
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

/// AttributeInstance - one attribute value attached to content
///
/// When `source_id` resolves to another attribute instance, that
/// attribute's value is read instead of the local one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeInstance {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub type_id: Property<EntityId>,
    pub value: Property<JsonValue>,
    pub source_id: Property<Option<EntityId>>,
}

impl AttributeInstance {
    pub fn new(type_id: impl Into<EntityId>, value: JsonValue) -> Self {
        Self {
            identity: Identity::new(Kind::AttributeInstance),
            type_id: Property::new(type_id.into()),
            value: Property::new(value),
            source_id: Property::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::AttributeInstance, id.into());
        self
    }

    pub fn with_source(mut self, source_id: impl Into<EntityId>) -> Self {
        self.source_id = Property::new(Some(source_id.into()));
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}
