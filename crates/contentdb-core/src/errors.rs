use thiserror::Error;

use crate::model::{EntityId, Kind};

/// Result type alias using GraphError
pub type Result<T> = std::result::Result<T, GraphError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every [`GraphError`] maps to exactly one kind, and every kind to a stable
/// code usable in logs, tests and external responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Entity
    NotFound,
    KindMismatch,
    NotCreated,
    Collision,
    NotRegistered,
    NotUpdated,
    NotDeleted,
    NotReleased,
    /// A rollback compensation failed; the store must be rebuilt
    Compromised,
    IdImmutable,
    InvalidValue,
    UnknownValueKind,
    CycleDetected,
    UnknownKind,

    // Codec
    SerializerNotFound,
    DeserializerNotFound,
    InvalidCodecKey,
    Malformed,

    // Handler
    InvalidHandlerKey,

    // Transaction
    InvalidAction,
    Unexpected,

    // Internal
    Index,
    Config,
}

impl ErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "ERR_NOT_FOUND",
            ErrorKind::KindMismatch => "ERR_KIND_MISMATCH",
            ErrorKind::NotCreated => "ERR_NOT_CREATED",
            ErrorKind::Collision => "ERR_COLLISION",
            ErrorKind::NotRegistered => "ERR_NOT_REGISTERED",
            ErrorKind::NotUpdated => "ERR_NOT_UPDATED",
            ErrorKind::NotDeleted => "ERR_NOT_DELETED",
            ErrorKind::NotReleased => "ERR_NOT_RELEASED",
            ErrorKind::Compromised => "ERR_COMPROMISED",
            ErrorKind::IdImmutable => "ERR_ID_IMMUTABLE",
            ErrorKind::InvalidValue => "ERR_INVALID_VALUE",
            ErrorKind::UnknownValueKind => "ERR_UNKNOWN_VALUE_KIND",
            ErrorKind::CycleDetected => "ERR_CYCLE_DETECTED",
            ErrorKind::UnknownKind => "ERR_UNKNOWN_KIND",
            ErrorKind::SerializerNotFound => "ERR_SERIALIZER_NOT_FOUND",
            ErrorKind::DeserializerNotFound => "ERR_DESERIALIZER_NOT_FOUND",
            ErrorKind::InvalidCodecKey => "ERR_INVALID_CODEC_KEY",
            ErrorKind::Malformed => "ERR_MALFORMED",
            ErrorKind::InvalidHandlerKey => "ERR_INVALID_HANDLER_KEY",
            ErrorKind::InvalidAction => "ERR_INVALID_ACTION",
            ErrorKind::Unexpected => "ERR_UNEXPECTED",
            ErrorKind::Index => "ERR_INDEX",
            ErrorKind::Config => "ERR_CONFIG",
        }
    }
}

/// Outcome of unwinding a failed multi-phase register or release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    /// Every compensation succeeded; the store is as it was before the call
    Recovered,
    /// A compensation failed; store consistency is no longer guaranteed
    Compromised,
}

impl std::fmt::Display for Integrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Integrity::Recovered => f.write_str("recovered"),
            Integrity::Compromised => f.write_str("compromised"),
        }
    }
}

// ========== End Error Facility ==========

/// Errors about entities and their lifecycle in a store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntityError {
    /// No entity with this id (or no id given at all)
    #[error("Entity not found: {}", .id.as_ref().map_or("<none>", |id| id.as_str()))]
    NotFound { id: Option<EntityId> },

    #[error("Entity {id} is a {actual}, expected {expected}")]
    KindMismatch {
        id: EntityId,
        expected: Kind,
        actual: Kind,
    },

    #[error("Could not create {kind}: {reason}")]
    NotCreated { kind: Kind, reason: String },

    /// Id already taken by another entity of any kind
    #[error("Id {id} collides with an existing {existing}")]
    Collision { id: EntityId, existing: Kind },

    #[error("Entity {id} not registered ({integrity}): {cause}")]
    NotRegistered {
        id: EntityId,
        cause: Box<GraphError>,
        integrity: Integrity,
        compensation_failures: Vec<GraphError>,
    },

    #[error("Entity {id} not updated: {cause}")]
    NotUpdated { id: EntityId, cause: Box<GraphError> },

    #[error("Entity {id} not deleted: {cause}")]
    NotDeleted { id: EntityId, cause: Box<GraphError> },

    #[error("Entity {id} not released ({integrity}): {cause}")]
    NotReleased {
        id: EntityId,
        cause: Box<GraphError>,
        integrity: Integrity,
        compensation_failures: Vec<GraphError>,
    },

    /// Ids are frozen once an entity is registered
    #[error("Cannot change id of registered entity {id} to {attempted}")]
    IdImmutable { id: EntityId, attempted: EntityId },

    #[error("Invalid value for attribute {id} of kind {kind_id}: {reason}")]
    InvalidValue {
        id: EntityId,
        kind_id: String,
        reason: String,
    },

    #[error("Attribute {id} uses unknown value kind: {kind_id}")]
    UnknownValueKind { id: EntityId, kind_id: String },

    /// Setting these bases would close a cycle in the content type DAG
    #[error("Inheritance cycle through content type {id}")]
    InheritanceCycle { id: EntityId },

    #[error("Unknown entity kind: {name}")]
    UnknownKind { name: String },
}

/// Errors resolving or running serializers and deserializers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("No serializer for {kind} in format {format}")]
    SerializerNotFound { kind: Kind, format: String },

    #[error("No deserializer for {kind} in format {format}")]
    DeserializerNotFound { kind: Kind, format: String },

    #[error("Invalid codec format key: {format:?}")]
    InvalidCodecKey { format: String },

    #[error("Malformed {format} payload for {kind}: {message}")]
    Malformed {
        kind: Kind,
        format: String,
        message: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// The action filter can never co-occur with the event
    #[error("Invalid handler key: event {event} never fires for action {action}")]
    InvalidHandlerKey { event: String, action: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("Invalid action: {action}")]
    InvalidAction { action: String },

    /// A callback failed outside the error taxonomy
    #[error("Unexpected failure: {message}")]
    Unexpected { message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Key {key} is pinned to a canonical key")]
    KeyPinned { key: String },

    #[error("Key {key} is already pinned")]
    AlreadyPinned { key: String },

    #[error("Key {key} is not pinned")]
    NotPinned { key: String },

    #[error("No bucket for key {key}")]
    BucketNotFound { key: String },

    #[error("Value {value} not found under key {key}")]
    ValueNotFound { key: String, value: String },
}

/// Umbrella error for every store, codec and pipeline operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Entity(e) => match e {
                EntityError::NotFound { .. } => ErrorKind::NotFound,
                EntityError::KindMismatch { .. } => ErrorKind::KindMismatch,
                EntityError::NotCreated { .. } => ErrorKind::NotCreated,
                EntityError::Collision { .. } => ErrorKind::Collision,
                EntityError::NotRegistered { .. } if self.is_compromised() => {
                    ErrorKind::Compromised
                }
                EntityError::NotRegistered { .. } => ErrorKind::NotRegistered,
                EntityError::NotUpdated { .. } => ErrorKind::NotUpdated,
                EntityError::NotDeleted { .. } => ErrorKind::NotDeleted,
                EntityError::NotReleased { .. } if self.is_compromised() => ErrorKind::Compromised,
                EntityError::NotReleased { .. } => ErrorKind::NotReleased,
                EntityError::IdImmutable { .. } => ErrorKind::IdImmutable,
                EntityError::InvalidValue { .. } => ErrorKind::InvalidValue,
                EntityError::UnknownValueKind { .. } => ErrorKind::UnknownValueKind,
                EntityError::InheritanceCycle { .. } => ErrorKind::CycleDetected,
                EntityError::UnknownKind { .. } => ErrorKind::UnknownKind,
            },
            GraphError::Codec(e) => match e {
                CodecError::SerializerNotFound { .. } => ErrorKind::SerializerNotFound,
                CodecError::DeserializerNotFound { .. } => ErrorKind::DeserializerNotFound,
                CodecError::InvalidCodecKey { .. } => ErrorKind::InvalidCodecKey,
                CodecError::Malformed { .. } => ErrorKind::Malformed,
            },
            GraphError::Handler(HandlerError::InvalidHandlerKey { .. }) => {
                ErrorKind::InvalidHandlerKey
            }
            GraphError::Transaction(e) => match e {
                TransactionError::InvalidAction { .. } => ErrorKind::InvalidAction,
                TransactionError::Unexpected { .. } => ErrorKind::Unexpected,
            },
            GraphError::Index(_) => ErrorKind::Index,
            GraphError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// True if a rollback anywhere in this error's chain left the store
    /// inconsistent
    pub fn is_compromised(&self) -> bool {
        match self {
            GraphError::Entity(
                EntityError::NotRegistered {
                    integrity, cause, ..
                }
                | EntityError::NotReleased {
                    integrity, cause, ..
                },
            ) => *integrity == Integrity::Compromised || cause.is_compromised(),
            GraphError::Entity(
                EntityError::NotUpdated { cause, .. } | EntityError::NotDeleted { cause, .. },
            ) => cause.is_compromised(),
            _ => false,
        }
    }

    /// True for registration failures, collisions included
    pub fn is_not_registered(&self) -> bool {
        matches!(
            self,
            GraphError::Entity(EntityError::NotRegistered { .. } | EntityError::Collision { .. })
        )
    }

    /// The innermost cause, skipping lifecycle wrappers
    pub fn root_cause(&self) -> &GraphError {
        match self {
            GraphError::Entity(
                EntityError::NotRegistered { cause, .. }
                | EntityError::NotReleased { cause, .. }
                | EntityError::NotUpdated { cause, .. }
                | EntityError::NotDeleted { cause, .. },
            ) => cause.root_cause(),
            _ => self,
        }
    }
}
