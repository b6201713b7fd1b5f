//! Transactional CRUD pipeline
//!
//! A [`Transaction`] describes one create, read, update or delete request.
//! The [`Controller`] runs it through a fixed step list against its store,
//! fires lifecycle [`Event`]s to registered handlers, and records every
//! failure in the transaction instead of returning it.

mod controller;
mod events;

pub use controller::{Controller, JournalEntry};
pub use events::{Event, EventCallback, EventHandlers};

use std::fmt;
use std::str::FromStr;

use crate::core_types::RequestContext;
use crate::errors::{GraphError, TransactionError};
use crate::model::{EntityId, Kind, Resource};

/// CRUD verb of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| TransactionError::InvalidAction {
                action: s.to_string(),
            })
    }
}

/// One CRUD request and everything the pipeline learned while running it
#[derive(Debug, Clone)]
pub struct Transaction {
    pub action: Action,
    /// Kind to create, or the kind the target resolved to
    pub kind: Option<Kind>,
    pub resource_id: Option<EntityId>,
    pub inbound_format: Option<String>,
    pub inbound_payload: Option<Vec<u8>>,
    pub outbound_format: Option<String>,
    pub outbound_payload: Option<Vec<u8>>,
    /// Snapshot of the target after the last successful step
    pub resource: Option<Resource>,
    pub errors: Vec<GraphError>,
    pub context: RequestContext,
}

impl Transaction {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            kind: None,
            resource_id: None,
            inbound_format: None,
            inbound_payload: None,
            outbound_format: None,
            outbound_payload: None,
            resource: None,
            errors: Vec::new(),
            context: RequestContext::new(),
        }
    }

    pub fn create(kind: Kind) -> Self {
        let mut tx = Self::new(Action::Create);
        tx.kind = Some(kind);
        tx
    }

    pub fn read(id: impl Into<EntityId>) -> Self {
        Self::new(Action::Read).with_resource_id(id)
    }

    pub fn update(id: impl Into<EntityId>) -> Self {
        Self::new(Action::Update).with_resource_id(id)
    }

    pub fn delete(id: impl Into<EntityId>) -> Self {
        Self::new(Action::Delete).with_resource_id(id)
    }

    pub fn with_resource_id(mut self, id: impl Into<EntityId>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Expect the target to be of `kind`
    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_inbound(mut self, format: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.inbound_format = Some(format.into());
        self.inbound_payload = Some(payload.into());
        self
    }

    pub fn with_outbound(mut self, format: impl Into<String>) -> Self {
        self.outbound_format = Some(format.into());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// Stable codes of the recorded errors, in order
    pub fn error_codes(&self) -> Vec<&'static str> {
        self.errors.iter().map(GraphError::code).collect()
    }
}
