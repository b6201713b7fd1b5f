//! Entity identity: ids, kinds and the lock that freezes an id on registration

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::EntityError;
use crate::ops::handlers::Phase;

/// Globally unique identifier of an entity inside a store
///
/// Ids are unique across the whole store, not per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generate a fresh time-ordered id (UUIDv7)
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Closed enumeration of entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    ContentType,
    AttributeType,
    ContentInstance,
    AttributeInstance,
    FilterType,
    FilterInstance,
    SorterType,
    SorterInstance,
    ViewType,
    ViewInstance,
    ViewResult,
}

impl Kind {
    pub const ALL: [Kind; 11] = [
        Kind::ContentType,
        Kind::AttributeType,
        Kind::ContentInstance,
        Kind::AttributeInstance,
        Kind::FilterType,
        Kind::FilterInstance,
        Kind::SorterType,
        Kind::SorterInstance,
        Kind::ViewType,
        Kind::ViewInstance,
        Kind::ViewResult,
    ];

    /// Stable lowercase name, also used as the codec key component
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::ContentType => "content_type",
            Kind::AttributeType => "attribute_type",
            Kind::ContentInstance => "content_instance",
            Kind::AttributeInstance => "attribute_instance",
            Kind::FilterType => "filter_type",
            Kind::FilterInstance => "filter_instance",
            Kind::SorterType => "sorter_type",
            Kind::SorterInstance => "sorter_instance",
            Kind::ViewType => "view_type",
            Kind::ViewInstance => "view_instance",
            Kind::ViewResult => "view_result",
        }
    }

    /// True for the kinds other entities are instances of
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            Kind::ContentType
                | Kind::AttributeType
                | Kind::FilterType
                | Kind::SorterType
                | Kind::ViewType
        )
    }

    /// The kind an instance's `type_id` must resolve to
    pub fn type_kind(&self) -> Option<Kind> {
        match self {
            Kind::ContentInstance => Some(Kind::ContentType),
            Kind::AttributeInstance => Some(Kind::AttributeType),
            Kind::FilterInstance => Some(Kind::FilterType),
            Kind::SorterInstance => Some(Kind::SorterType),
            Kind::ViewInstance => Some(Kind::ViewType),
            _ => None,
        }
    }

    pub fn is_instance(&self) -> bool {
        self.type_kind().is_some()
    }

    /// Registration phases, ordered from the most general capability to the
    /// most specific one. Release walks the same slice backwards.
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            Kind::ContentType => &[Phase::Resource, Phase::Type, Phase::ContentType],
            Kind::AttributeType => &[Phase::Resource, Phase::Type, Phase::AttributeType],
            Kind::FilterType => &[Phase::Resource, Phase::Type, Phase::FilterType],
            Kind::SorterType => &[Phase::Resource, Phase::Type, Phase::SorterType],
            Kind::ViewType => &[Phase::Resource, Phase::Type, Phase::ViewType],
            Kind::ContentInstance => &[Phase::Resource, Phase::Instance, Phase::ContentInstance],
            Kind::AttributeInstance => {
                &[Phase::Resource, Phase::Instance, Phase::AttributeInstance]
            }
            Kind::FilterInstance => &[Phase::Resource, Phase::Instance, Phase::FilterInstance],
            Kind::SorterInstance => &[Phase::Resource, Phase::Instance, Phase::SorterInstance],
            Kind::ViewInstance => &[Phase::Resource, Phase::Instance, Phase::ViewInstance],
            Kind::ViewResult => &[Phase::Resource, Phase::ViewResult],
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or(EntityError::UnknownKind {
                name: s.to_string(),
            })
    }
}

/// Id and kind of an entity, plus the lock set while it is registered
///
/// Serializes as the bare id string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: EntityId,
    kind: Kind,
    locked: bool,
}

impl Identity {
    pub fn new(kind: Kind) -> Self {
        Self::with_id(kind, EntityId::generate())
    }

    pub fn with_id(kind: Kind, id: EntityId) -> Self {
        Self {
            id,
            kind,
            locked: false,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Whether the id is frozen by a store registration
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Replace the id of an unregistered entity
    ///
    /// # Errors
    ///
    /// Returns `IdImmutable` when the entity is registered and `id` differs
    /// from the current one. Nothing is changed in that case.
    pub fn assign(&mut self, id: EntityId) -> Result<(), EntityError> {
        if self.id == id {
            return Ok(());
        }
        if self.locked {
            return Err(EntityError::IdImmutable {
                id: self.id.clone(),
                attempted: id,
            });
        }
        self.id = id;
        Ok(())
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in Kind::ALL {
            assert_eq!(kind.as_str().parse::<Kind>().unwrap(), kind);
        }
        assert!(matches!(
            "widget".parse::<Kind>(),
            Err(EntityError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_phases_start_with_resource_and_end_with_leaf() {
        for kind in Kind::ALL {
            let phases = kind.phases();
            assert_eq!(phases[0], Phase::Resource);
            assert_eq!(phases[phases.len() - 1].leaf_kind(), Some(kind));
        }
    }

    #[test]
    fn test_locked_identity_rejects_new_id() {
        let mut identity = Identity::with_id(Kind::ContentType, "c1".into());
        identity.assign("c2".into()).unwrap();
        identity.lock();

        let err = identity.assign("c3".into()).unwrap_err();
        assert!(matches!(err, EntityError::IdImmutable { .. }));
        assert_eq!(identity.id().as_str(), "c2");

        // Re-assigning the same id is not a change
        identity.assign("c2".into()).unwrap();
    }
}
