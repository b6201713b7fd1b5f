//! ContentDB Core - In-memory content graph
//!
//! This crate holds the data layer of a content management system:
//! - Content types and instances, attribute types and values, filters,
//!   sorters and views, all stored as a single [`Resource`] arena
//! - Reactive properties with change notices and field subscriptions
//! - A [`Store`] whose register/release phases roll back on failure
//! - Incremental view materialization, checked against [`compute_view`]
//! - Pluggable codecs and a transactional CRUD pipeline with lifecycle events

pub mod codec;
pub mod config;
pub mod errors;
pub mod index;
pub mod kinds;
pub mod logging_facility;
pub mod model;
pub mod ops;
pub mod reactive;
pub mod transaction;
pub mod views;

pub use contentdb_core_types as core_types;

// Re-export commonly used types
pub use codec::CodecRegistry;
pub use config::GraphConfig;
pub use errors::{
    CodecError, EntityError, ErrorKind, GraphError, HandlerError, IndexError, Integrity, Result,
    TransactionError,
};
pub use kinds::{KindRegistry, ValueKind};
pub use model::{
    AttributeInstance, AttributeType, ContentInstance, ContentType, EntityId, FilterInstance,
    FilterType, Identity, Kind, Relation, Resource, SorterInstance, SorterType, ViewInstance,
    ViewResult, ViewType,
};
pub use ops::{BuiltinHandler, Phase, Reaction, ResourceHandler, Store, StoreStats, TypeKey};
pub use reactive::{Field, FieldValue, Notice, Observer, Property};
pub use transaction::{Action, Controller, Event, EventHandlers, JournalEntry, Transaction};
pub use views::compute_view;
