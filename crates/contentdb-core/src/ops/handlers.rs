//! Per-phase resource handlers
//!
//! Registration of an entity runs the ordered phases returned by
//! [`Kind::phases`](crate::model::Kind::phases), from the most general
//! capability (`Resource`) to the kind's own leaf phase. Each phase is served
//! by one [`ResourceHandler`]. The store ships a [`BuiltinHandler`] for every
//! phase; callers may swap any of them through
//! [`Store::override_handler`](crate::Store::override_handler).

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::store::Store;
use crate::errors::Result;
use crate::model::{EntityId, Kind};

/// One step of the register/release protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Identity table, per-kind table and the id lock
    Resource,
    /// Instance buckets keyed by this type
    Type,
    /// Membership in the instances-by-type index
    Instance,
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

impl Phase {
    pub const ALL: [Phase; 14] = [
        Phase::Resource,
        Phase::Type,
        Phase::Instance,
        Phase::ContentType,
        Phase::AttributeType,
        Phase::ContentInstance,
        Phase::AttributeInstance,
        Phase::FilterType,
        Phase::FilterInstance,
        Phase::SorterType,
        Phase::SorterInstance,
        Phase::ViewType,
        Phase::ViewInstance,
        Phase::ViewResult,
    ];

    /// The kind served by a leaf phase; `None` for shared phases
    pub fn leaf_kind(&self) -> Option<Kind> {
        match self {
            Phase::Resource | Phase::Type | Phase::Instance => None,
            Phase::ContentType => Some(Kind::ContentType),
            Phase::AttributeType => Some(Kind::AttributeType),
            Phase::ContentInstance => Some(Kind::ContentInstance),
            Phase::AttributeInstance => Some(Kind::AttributeInstance),
            Phase::FilterType => Some(Kind::FilterType),
            Phase::FilterInstance => Some(Kind::FilterInstance),
            Phase::SorterType => Some(Kind::SorterType),
            Phase::SorterInstance => Some(Kind::SorterInstance),
            Phase::ViewType => Some(Kind::ViewType),
            Phase::ViewInstance => Some(Kind::ViewInstance),
            Phase::ViewResult => Some(Kind::ViewResult),
        }
    }
}

/// Setup and teardown of one phase for an entity already in the arena
///
/// `on_register` and `on_release` must be exact inverses: the store uses
/// each as the compensation of the other when a later phase fails.
pub trait ResourceHandler {
    /// Apply this phase's effects for `id`
    ///
    /// # Errors
    ///
    /// Any error aborts the registration; phases that already ran are
    /// compensated in reverse order.
    fn on_register(&self, store: &mut Store, id: &EntityId) -> Result<()>;

    /// Undo this phase's effects for `id`
    ///
    /// # Errors
    ///
    /// Any error aborts the release; phases that already ran are
    /// compensated in reverse order.
    fn on_release(&self, store: &mut Store, id: &EntityId) -> Result<()>;

    /// Observe a read of `id`
    ///
    /// # Errors
    ///
    /// An error turns the read into a failure.
    fn on_retrieve(&self, _store: &Store, _id: &EntityId) -> Result<()> {
        Ok(())
    }
}

/// The store's own implementation of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinHandler {
    phase: Phase,
}

impl BuiltinHandler {
    pub fn new(phase: Phase) -> Self {
        Self { phase }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl ResourceHandler for BuiltinHandler {
    fn on_register(&self, store: &mut Store, id: &EntityId) -> Result<()> {
        match self.phase {
            Phase::Resource => store.join_resource(id),
            Phase::Type => store.join_type(id),
            Phase::Instance => store.join_instance(id),
            Phase::ContentType => store.join_content_type(id),
            Phase::AttributeType => store.join_attribute_type(id),
            Phase::ContentInstance => store.join_content_instance(id),
            Phase::AttributeInstance => store.join_attribute_instance(id),
            Phase::FilterType | Phase::SorterType => store.join_part_type(id),
            Phase::FilterInstance | Phase::SorterInstance => store.join_part_instance(id),
            Phase::ViewType => store.join_view_type(id),
            Phase::ViewInstance => store.join_view_instance(id),
            Phase::ViewResult => store.join_view_result(id),
        }
    }

    fn on_release(&self, store: &mut Store, id: &EntityId) -> Result<()> {
        match self.phase {
            Phase::Resource => store.leave_resource(id),
            Phase::Type => store.leave_type(id),
            Phase::Instance => store.leave_instance(id),
            Phase::ContentType => store.leave_content_type(id),
            Phase::AttributeType => store.leave_attribute_type(id),
            Phase::ContentInstance => store.leave_content_instance(id),
            Phase::AttributeInstance => store.leave_attribute_instance(id),
            Phase::FilterType | Phase::SorterType => store.leave_part_type(id),
            Phase::FilterInstance | Phase::SorterInstance => store.leave_part_instance(id),
            Phase::ViewType => store.leave_view_type(id),
            Phase::ViewInstance => store.leave_view_instance(id),
            Phase::ViewResult => store.leave_view_result(id),
        }
    }
}

/// Handler per phase, defaulting to [`BuiltinHandler`]
#[derive(Clone)]
pub(crate) struct HandlerTable {
    handlers: HashMap<Phase, Rc<dyn ResourceHandler>>,
}

impl Default for HandlerTable {
    fn default() -> Self {
        let handlers = Phase::ALL
            .into_iter()
            .map(|phase| {
                let handler: Rc<dyn ResourceHandler> = Rc::new(BuiltinHandler::new(phase));
                (phase, handler)
            })
            .collect();
        Self { handlers }
    }
}

impl HandlerTable {
    pub(crate) fn get(&self, phase: Phase) -> Rc<dyn ResourceHandler> {
        match self.handlers.get(&phase) {
            Some(handler) => Rc::clone(handler),
            None => Rc::new(BuiltinHandler::new(phase)),
        }
    }

    pub(crate) fn replace(
        &mut self,
        phase: Phase,
        handler: Rc<dyn ResourceHandler>,
    ) -> Rc<dyn ResourceHandler> {
        self.handlers
            .insert(phase, handler)
            .unwrap_or_else(|| Rc::new(BuiltinHandler::new(phase)))
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("phases", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_exactly_one_leaf_phase() {
        for kind in Kind::ALL {
            let leaves: Vec<_> = kind
                .phases()
                .iter()
                .filter(|p| p.leaf_kind().is_some())
                .collect();
            assert_eq!(leaves.len(), 1, "{kind}");
        }
    }

    #[test]
    fn test_shared_phases_follow_capabilities() {
        for kind in Kind::ALL {
            let phases = kind.phases();
            assert_eq!(phases.contains(&Phase::Type), kind.is_type(), "{kind}");
            assert_eq!(phases.contains(&Phase::Instance), kind.is_instance(), "{kind}");
        }
    }

    #[test]
    fn test_replace_returns_previous_handler() {
        let mut table = HandlerTable::default();
        let previous = table.replace(Phase::Type, Rc::new(BuiltinHandler::new(Phase::Resource)));
        let mut store = Store::new();
        // The builtin Type phase refuses ids that are not in the arena
        assert!(previous.on_register(&mut store, &"ghost".into()).is_err());
    }
}
