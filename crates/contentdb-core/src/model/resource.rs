//! The tagged union over every entity kind, and its declared relationships

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::attribute::{AttributeInstance, AttributeType};
use super::content::{ContentInstance, ContentType};
use super::identity::{EntityId, Identity, Kind};
use super::view::{
    FilterInstance, FilterType, SorterInstance, SorterType, ViewInstance, ViewResult, ViewType,
};
use crate::reactive::Property;

/// Any entity that can live in a store
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resource {
    ContentType(ContentType),
    AttributeType(AttributeType),
    ContentInstance(ContentInstance),
    AttributeInstance(AttributeInstance),
    FilterType(FilterType),
    FilterInstance(FilterInstance),
    SorterType(SorterType),
    SorterInstance(SorterInstance),
    ViewType(ViewType),
    ViewInstance(ViewInstance),
    ViewResult(ViewResult),
}

macro_rules! resource_variants {
    ($($variant:ident => $as_ref:ident, $as_mut:ident;)*) => {
        $(
            impl From<$variant> for Resource {
                fn from(value: $variant) -> Self {
                    Resource::$variant(value)
                }
            }
        )*

        impl Resource {
            pub fn identity(&self) -> &Identity {
                match self {
                    $(Resource::$variant(inner) => &inner.identity,)*
                }
            }

            pub fn identity_mut(&mut self) -> &mut Identity {
                match self {
                    $(Resource::$variant(inner) => &mut inner.identity,)*
                }
            }

            $(
                pub fn $as_ref(&self) -> Option<&$variant> {
                    match self {
                        Resource::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                pub(crate) fn $as_mut(&mut self) -> Option<&mut $variant> {
                    match self {
                        Resource::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            )*
        }
    };
}

resource_variants! {
    ContentType => as_content_type, as_content_type_mut;
    AttributeType => as_attribute_type, as_attribute_type_mut;
    ContentInstance => as_content_instance, as_content_instance_mut;
    AttributeInstance => as_attribute_instance, as_attribute_instance_mut;
    FilterType => as_filter_type, as_filter_type_mut;
    FilterInstance => as_filter_instance, as_filter_instance_mut;
    SorterType => as_sorter_type, as_sorter_type_mut;
    SorterInstance => as_sorter_instance, as_sorter_instance_mut;
    ViewType => as_view_type, as_view_type_mut;
    ViewInstance => as_view_instance, as_view_instance_mut;
    ViewResult => as_view_result, as_view_result_mut;
}

impl Resource {
    /// A fresh, empty entity of `kind` with a generated id
    ///
    /// Instances start with an empty `type_id`; decoders fill it in.
    pub fn blank(kind: Kind) -> Self {
        let no_type = EntityId::from("");
        match kind {
            Kind::ContentType => ContentType::new("").into(),
            Kind::AttributeType => AttributeType::new("", "").into(),
            Kind::ContentInstance => ContentInstance::new(no_type).into(),
            Kind::AttributeInstance => AttributeInstance::new(no_type, JsonValue::Null).into(),
            Kind::FilterType => FilterType::new([]).into(),
            Kind::FilterInstance => FilterInstance::new(no_type, JsonValue::Null).into(),
            Kind::SorterType => SorterType::new([]).into(),
            Kind::SorterInstance => SorterInstance::new(no_type, JsonValue::Null).into(),
            Kind::ViewType => ViewType::new([]).into(),
            Kind::ViewInstance => ViewInstance::new(no_type).into(),
            Kind::ViewResult => ViewResult::new().into(),
        }
    }

    pub fn id(&self) -> &EntityId {
        self.identity().id()
    }

    pub fn kind(&self) -> Kind {
        self.identity().kind()
    }

    /// The `type_id` of an instance, `None` for types and view results
    pub fn type_id(&self) -> Option<&EntityId> {
        match self {
            Resource::ContentInstance(e) => Some(e.type_id.get()),
            Resource::AttributeInstance(e) => Some(e.type_id.get()),
            Resource::FilterInstance(e) => Some(e.type_id.get()),
            Resource::SorterInstance(e) => Some(e.type_id.get()),
            Resource::ViewInstance(e) => Some(e.type_id.get()),
            _ => None,
        }
    }

    pub(crate) fn type_id_mut(&mut self) -> Option<&mut Property<EntityId>> {
        match self {
            Resource::ContentInstance(e) => Some(&mut e.type_id),
            Resource::AttributeInstance(e) => Some(&mut e.type_id),
            Resource::FilterInstance(e) => Some(&mut e.type_id),
            Resource::SorterInstance(e) => Some(&mut e.type_id),
            Resource::ViewInstance(e) => Some(&mut e.type_id),
            _ => None,
        }
    }

    /// The `name` of a type, `None` for instances and view results
    pub fn name(&self) -> Option<&str> {
        match self {
            Resource::ContentType(e) => Some(e.name.get()),
            Resource::AttributeType(e) => Some(e.name.get()),
            Resource::FilterType(e) => Some(e.name.get()),
            Resource::SorterType(e) => Some(e.name.get()),
            Resource::ViewType(e) => Some(e.name.get()),
            _ => None,
        }
    }

    pub(crate) fn name_mut(&mut self) -> Option<&mut Property<String>> {
        match self {
            Resource::ContentType(e) => Some(&mut e.name),
            Resource::AttributeType(e) => Some(&mut e.name),
            Resource::FilterType(e) => Some(&mut e.name),
            Resource::SorterType(e) => Some(&mut e.name),
            Resource::ViewType(e) => Some(&mut e.name),
            _ => None,
        }
    }

    /// Ids held by one declared relationship, with the kind they must resolve to
    ///
    /// Returns `None` when `relation` is not declared for this entity's kind.
    pub fn references(&self, relation: Relation) -> Option<(Kind, Vec<EntityId>)> {
        use Relation as R;
        let (kind, ids) = match (self, relation) {
            (Resource::ContentType(e), R::Bases) => (Kind::ContentType, e.base_ids.get().clone()),
            (Resource::ContentType(e), R::AttributeTypes) => {
                (Kind::AttributeType, e.attribute_type_ids.get().clone())
            }
            (Resource::ContentInstance(e), R::Attributes) => {
                (Kind::AttributeInstance, e.attribute_ids.get().clone())
            }
            (Resource::AttributeInstance(e), R::Source) => (
                Kind::AttributeInstance,
                e.source_id.get().iter().cloned().collect(),
            ),
            (Resource::FilterType(e), R::AttributeTypes) => {
                (Kind::AttributeType, e.attribute_type_ids.get().clone())
            }
            (Resource::SorterType(e), R::AttributeTypes) => {
                (Kind::AttributeType, e.attribute_type_ids.get().clone())
            }
            (Resource::ViewType(e), R::ContentTypes) => {
                (Kind::ContentType, e.content_type_ids.get().clone())
            }
            (Resource::ViewType(e), R::FilterTypes) => {
                (Kind::FilterType, e.filter_type_ids.get().clone())
            }
            (Resource::ViewType(e), R::SorterTypes) => {
                (Kind::SorterType, e.sorter_type_ids.get().clone())
            }
            (Resource::ViewInstance(e), R::Filters) => {
                (Kind::FilterInstance, e.filter_ids.get().clone())
            }
            (Resource::ViewInstance(e), R::Sorters) => {
                (Kind::SorterInstance, e.sorter_ids.get().clone())
            }
            (Resource::ViewInstance(e), R::Result) => (
                Kind::ViewResult,
                e.result_id.get().iter().cloned().collect(),
            ),
            (Resource::ViewResult(e), R::ContentInstances) => {
                (Kind::ContentInstance, e.content_instance_ids.get().clone())
            }
            (_, R::Type) => {
                let kind = self.kind().type_kind()?;
                (kind, self.type_id().cloned().into_iter().collect())
            }
            _ => return None,
        };
        Some((kind, ids))
    }
}

/// Declared relationship fields, resolved lazily through a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    Type,
    Bases,
    AttributeTypes,
    Attributes,
    Source,
    ContentTypes,
    FilterTypes,
    SorterTypes,
    Filters,
    Sorters,
    Result,
    ContentInstances,
}

impl Relation {
    /// Relationships declared by entities of `kind`
    pub fn declared_for(kind: Kind) -> &'static [Relation] {
        use Relation as R;
        match kind {
            Kind::ContentType => &[R::Bases, R::AttributeTypes],
            Kind::AttributeType => &[],
            Kind::ContentInstance => &[R::Type, R::Attributes],
            Kind::AttributeInstance => &[R::Type, R::Source],
            Kind::FilterType | Kind::SorterType => &[R::AttributeTypes],
            Kind::FilterInstance | Kind::SorterInstance => &[R::Type],
            Kind::ViewType => &[R::ContentTypes, R::FilterTypes, R::SorterTypes],
            Kind::ViewInstance => &[R::Type, R::Filters, R::Sorters, R::Result],
            Kind::ViewResult => &[R::ContentInstances],
        }
    }
}
