//! Query-side entities: filters, sorters, views and their results

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::identity::{EntityId, Identity, Kind};
use crate::reactive::Property;

/// FilterType - the attribute types a filter may match against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterType {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub name: Property<String>,
    pub attribute_type_ids: Property<Vec<EntityId>>,
}

impl FilterType {
    pub fn new(attribute_type_ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            identity: Identity::new(Kind::FilterType),
            name: Property::default(),
            attribute_type_ids: Property::new(attribute_type_ids.into_iter().collect()),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::FilterType, id.into());
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

/// FilterInstance - a parameterised filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterInstance {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub type_id: Property<EntityId>,
    pub kind_params: Property<JsonValue>,
}

impl FilterInstance {
    pub fn new(type_id: impl Into<EntityId>, kind_params: JsonValue) -> Self {
        Self {
            identity: Identity::new(Kind::FilterInstance),
            type_id: Property::new(type_id.into()),
            kind_params: Property::new(kind_params),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::FilterInstance, id.into());
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

/// SorterType - the attribute types a sorter may read its key from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SorterType {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub name: Property<String>,
    pub attribute_type_ids: Property<Vec<EntityId>>,
}

impl SorterType {
    pub fn new(attribute_type_ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            identity: Identity::new(Kind::SorterType),
            name: Property::default(),
            attribute_type_ids: Property::new(attribute_type_ids.into_iter().collect()),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::SorterType, id.into());
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

/// SorterInstance - a parameterised sort key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SorterInstance {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub type_id: Property<EntityId>,
    pub kind_params: Property<JsonValue>,
}

impl SorterInstance {
    pub fn new(type_id: impl Into<EntityId>, kind_params: JsonValue) -> Self {
        Self {
            identity: Identity::new(Kind::SorterInstance),
            type_id: Property::new(type_id.into()),
            kind_params: Property::new(kind_params),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::SorterInstance, id.into());
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

/// ViewType - base pool plus the filter and sorter types a view may use
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewType {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub name: Property<String>,
    pub content_type_ids: Property<Vec<EntityId>>,
    pub filter_type_ids: Property<Vec<EntityId>>,
    pub sorter_type_ids: Property<Vec<EntityId>>,
}

impl ViewType {
    pub fn new(content_type_ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            identity: Identity::new(Kind::ViewType),
            name: Property::default(),
            content_type_ids: Property::new(content_type_ids.into_iter().collect()),
            filter_type_ids: Property::default(),
            sorter_type_ids: Property::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::ViewType, id.into());
        self
    }

    pub fn with_filter_types(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.filter_type_ids = Property::new(ids.into_iter().collect());
        self
    }

    pub fn with_sorter_types(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.sorter_type_ids = Property::new(ids.into_iter().collect());
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

/// ViewInstance - a concrete query: filters, sorters and where to publish
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewInstance {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub type_id: Property<EntityId>,
    pub filter_ids: Property<Vec<EntityId>>,
    pub sorter_ids: Property<Vec<EntityId>>,
    pub result_id: Property<Option<EntityId>>,
}

impl ViewInstance {
    pub fn new(type_id: impl Into<EntityId>) -> Self {
        Self {
            identity: Identity::new(Kind::ViewInstance),
            type_id: Property::new(type_id.into()),
            filter_ids: Property::default(),
            sorter_ids: Property::default(),
            result_id: Property::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::ViewInstance, id.into());
        self
    }

    pub fn with_filters(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.filter_ids = Property::new(ids.into_iter().collect());
        self
    }

    pub fn with_sorters(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.sorter_ids = Property::new(ids.into_iter().collect());
        self
    }

    pub fn with_result(mut self, id: impl Into<EntityId>) -> Self {
        self.result_id = Property::new(Some(id.into()));
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

/// ViewResult - the published, ordered output of a view instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewResult {
    #[serde(rename = "id")]
    pub identity: Identity,
    pub content_instance_ids: Property<Vec<EntityId>>,
}

impl ViewResult {
    pub fn new() -> Self {
        Self {
            identity: Identity::new(Kind::ViewResult),
            content_instance_ids: Property::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.identity = Identity::with_id(Kind::ViewResult, id.into());
        self
    }

    pub fn id(&self) -> &EntityId {
        self.identity.id()
    }
}

impl Default for ViewResult {
    fn default() -> Self {
        Self::new()
    }
}
