use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use super::{Action, Transaction};
use crate::errors::{GraphError, HandlerError, Result, TransactionError};
use crate::model::Kind;

/// Lifecycle events fired by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    TransactionOpened,
    TransactionSucceeded,
    TransactionFailed,
    TransactionClosing,
    ResourceResolved,
    ResourceNotResolved,
    ResourceCreated,
    ResourceNotCreated,
    ResourceRegistered,
    ResourceNotRegistered,
    ResourceUpdated,
    ResourceNotUpdated,
    ResourceDeleted,
    ResourceNotDeleted,
}

impl Event {
    pub const ALL: [Event; 14] = [
        Event::TransactionOpened,
        Event::TransactionSucceeded,
        Event::TransactionFailed,
        Event::TransactionClosing,
        Event::ResourceResolved,
        Event::ResourceNotResolved,
        Event::ResourceCreated,
        Event::ResourceNotCreated,
        Event::ResourceRegistered,
        Event::ResourceNotRegistered,
        Event::ResourceUpdated,
        Event::ResourceNotUpdated,
        Event::ResourceDeleted,
        Event::ResourceNotDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Event::TransactionOpened => "transaction_opened",
            Event::TransactionSucceeded => "transaction_succeeded",
            Event::TransactionFailed => "transaction_failed",
            Event::TransactionClosing => "transaction_closing",
            Event::ResourceResolved => "resource_resolved",
            Event::ResourceNotResolved => "resource_not_resolved",
            Event::ResourceCreated => "resource_created",
            Event::ResourceNotCreated => "resource_not_created",
            Event::ResourceRegistered => "resource_registered",
            Event::ResourceNotRegistered => "resource_not_registered",
            Event::ResourceUpdated => "resource_updated",
            Event::ResourceNotUpdated => "resource_not_updated",
            Event::ResourceDeleted => "resource_deleted",
            Event::ResourceNotDeleted => "resource_not_deleted",
        }
    }

    /// Whether the pipeline can fire this event for `action`
    pub fn occurs_with(&self, action: Action) -> bool {
        match self {
            Event::TransactionOpened
            | Event::TransactionSucceeded
            | Event::TransactionFailed
            | Event::TransactionClosing => true,
            Event::ResourceResolved | Event::ResourceNotResolved => action != Action::Create,
            Event::ResourceCreated
            | Event::ResourceNotCreated
            | Event::ResourceRegistered
            | Event::ResourceNotRegistered => action == Action::Create,
            Event::ResourceUpdated | Event::ResourceNotUpdated => action == Action::Update,
            Event::ResourceDeleted | Event::ResourceNotDeleted => action == Action::Delete,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type EventCallback = Rc<dyn Fn(Event, &Transaction)>;

type HandlerKey = (Event, Option<Action>, Option<Kind>);

/// Event callbacks keyed by `(event, action?, kind?)`
///
/// `None` in the key matches any action or kind. Every matching key fires,
/// broad to narrow: `(e, *, *)`, `(e, action, *)`, `(e, *, kind)`,
/// `(e, action, kind)`. Callbacks under one key fire in registration order.
#[derive(Default, Clone)]
pub struct EventHandlers {
    handlers: HashMap<HandlerKey, Vec<EventCallback>>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&HandlerKey> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("EventHandlers").field("keys", &keys).finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback under `(event, action, kind)`
    ///
    /// # Errors
    ///
    /// `InvalidHandlerKey` if `event` never fires for `action`.
    pub fn register<F>(
        &mut self,
        event: Event,
        action: Option<Action>,
        kind: Option<Kind>,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(Event, &Transaction) + 'static,
    {
        if let Some(action) = action {
            if !event.occurs_with(action) {
                return Err(HandlerError::InvalidHandlerKey {
                    event: event.to_string(),
                    action: action.to_string(),
                }
                .into());
            }
        }
        self.handlers
            .entry((event, action, kind))
            .or_default()
            .push(Rc::new(callback));
        Ok(())
    }

    /// Callbacks matching `event` for `tx`, in firing order
    pub fn matching(&self, event: Event, tx: &Transaction) -> Vec<EventCallback> {
        let keys = [
            (event, None, None),
            (event, Some(tx.action), None),
            (event, None, tx.kind),
            (event, Some(tx.action), tx.kind),
        ];
        let mut callbacks = Vec::new();
        for (position, key) in keys.iter().enumerate() {
            // without a kind, keys 2 and 3 repeat keys 0 and 1
            if position >= 2 && tx.kind.is_none() {
                break;
            }
            if let Some(found) = self.handlers.get(key) {
                callbacks.extend(found.iter().cloned());
            }
        }
        callbacks
    }

    /// Run every callback matching `event`
    ///
    /// A panicking callback is reported as `Unexpected` in the returned
    /// list; the callbacks after it still run.
    pub fn fire(&self, event: Event, tx: &Transaction) -> Vec<GraphError> {
        tracing::debug!(
            event_name = event.as_str(),
            request_id = tx.context.request_id.as_str(),
            "lifecycle event"
        );
        let mut failures = Vec::new();
        for callback in self.matching(event, tx) {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(event, tx))) {
                let message = panic_message(payload.as_ref());
                tracing::warn!(
                    event_name = event.as_str(),
                    request_id = tx.context.request_id.as_str(),
                    message = message.as_str(),
                    "event handler panicked"
                );
                failures.push(
                    TransactionError::Unexpected {
                        message: format!("{event} handler panicked: {message}"),
                    }
                    .into(),
                );
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
