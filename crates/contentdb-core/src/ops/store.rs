use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use super::handlers::{HandlerTable, Phase, ResourceHandler};
use super::mutate::Reaction;
use crate::config::GraphConfig;
use crate::errors::{EntityError, GraphError, Integrity, Result};
use crate::index::Index;
use crate::kinds::KindRegistry;
use crate::model::{EntityId, Kind, Relation, Resource};
use crate::reactive::{Field, Observer, Subscribers};
use crate::views::ViewState;
use crate::{log_op_end, log_op_error, log_op_start};

/// Key of the instances-by-type index
///
/// Instances file themselves under `Declared(type_id)` as soon as they
/// register. When the type itself registers, that bucket is pinned to
/// `Registered(type_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKey {
    Declared(EntityId),
    Registered(EntityId),
}

/// In-memory resource graph
///
/// Owns every registered entity (the arena) plus the secondary indexes,
/// resolver slots, subscriptions and materialized views derived from them.
/// Single-threaded: no interior locking, callers serialize access.
pub struct Store {
    /// Arena of every registered entity, keyed by its globally unique id
    pub(crate) entities: HashMap<EntityId, Resource>,
    /// Ids per kind in registration order
    pub(crate) by_kind: Index<Kind, EntityId>,
    pub(crate) instances_by_type: Index<TypeKey, EntityId>,
    /// Attribute instance id -> content instances listing it
    pub(crate) contents_by_attribute: Index<EntityId, EntityId>,
    /// Source attribute id -> attribute instances aliasing it
    pub(crate) aliases_by_source: Index<EntityId, EntityId>,
    /// Filter, sorter or result id -> view instances referencing it
    pub(crate) view_parts: Index<EntityId, EntityId>,
    /// Relations resolvable through this store, per joined entity
    pub(crate) resolvers: HashMap<EntityId, &'static [Relation]>,
    pub(crate) subscriptions: Subscribers<Field, Reaction>,
    /// Materialized members per joined view instance
    pub(crate) views: HashMap<EntityId, ViewState>,
    pub(crate) value_kinds: KindRegistry,
    handlers: HandlerTable,
    pub(crate) config: GraphConfig,
}

/// Sizes of every table a [`Store`] maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub entities: usize,
    pub kind_buckets: usize,
    pub kind_entries: usize,
    pub instance_buckets: usize,
    pub instance_entries: usize,
    pub instance_pins: usize,
    pub attribute_links: usize,
    pub alias_links: usize,
    pub view_links: usize,
    pub resolvers: usize,
    pub subscriptions: usize,
    pub views: usize,
}

impl StoreStats {
    /// True when the store holds no entity and no residual bookkeeping
    pub fn is_empty(&self) -> bool {
        *self == StoreStats::default()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::with_config(GraphConfig::default())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("stats", &self.stats())
            .field("value_kinds", &self.value_kinds)
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .finish()
    }
}

impl Store {
    /// Create a new empty Store with the built-in value kinds
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            entities: HashMap::new(),
            by_kind: Index::new(),
            instances_by_type: Index::new(),
            contents_by_attribute: Index::new(),
            aliases_by_source: Index::new(),
            view_parts: Index::new(),
            resolvers: HashMap::new(),
            subscriptions: Subscribers::new(),
            views: HashMap::new(),
            value_kinds: KindRegistry::with_builtins(),
            handlers: HandlerTable::default(),
            config,
        }
    }

    /// Replace the value kind registry
    pub fn with_value_kinds(mut self, value_kinds: KindRegistry) -> Self {
        self.value_kinds = value_kinds;
        self
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn value_kinds(&self) -> &KindRegistry {
        &self.value_kinds
    }

    /// Swap the handler serving `phase`, returning the previous one
    ///
    /// The previous handler stays usable, so a replacement can wrap it.
    pub fn override_handler(
        &mut self,
        phase: Phase,
        handler: Rc<dyn ResourceHandler>,
    ) -> Rc<dyn ResourceHandler> {
        self.handlers.replace(phase, handler)
    }

    pub fn handler(&self, phase: Phase) -> Rc<dyn ResourceHandler> {
        self.handlers.get(phase)
    }

    // ===== Register / release =====

    /// Add an entity to the store
    ///
    /// Runs the kind's phases base-to-leaf. If a phase fails, the phases that
    /// already ran are released in reverse and the entity leaves the arena.
    ///
    /// # Errors
    ///
    /// * `Collision` - an entity with the same id (of any kind) exists; the
    ///   store is untouched
    /// * `NotRegistered` - a phase failed; carries the cause and whether the
    ///   rollback `Recovered` or left the store `Compromised`
    pub fn register(&mut self, resource: impl Into<Resource>) -> Result<EntityId> {
        let resource = resource.into();
        let id = resource.id().clone();
        let kind = resource.kind();
        log_op_start!("register", entity_id = id.as_str(), entity_kind = kind.as_str());
        let start = Instant::now();

        self.register_impl(resource).map_err(|e| {
            log_op_error!(
                "register",
                &e,
                duration_ms = start.elapsed().as_millis() as u64,
                entity_id = id.as_str()
            );
            e
        })?;

        log_op_end!(
            "register",
            duration_ms = start.elapsed().as_millis() as u64,
            entity_id = id.as_str()
        );
        Ok(id)
    }

    fn register_impl(&mut self, resource: Resource) -> Result<()> {
        let id = resource.id().clone();
        if let Some(existing) = self.entities.get(&id) {
            return Err(EntityError::Collision {
                id,
                existing: existing.kind(),
            }
            .into());
        }

        let kind = resource.kind();
        self.entities.insert(id.clone(), resource);

        let mut applied: Vec<Phase> = Vec::with_capacity(kind.phases().len());
        for &phase in kind.phases() {
            let handler = self.handlers.get(phase);
            if let Err(cause) = handler.on_register(self, &id) {
                let compensation_failures = self.compensate(&id, &applied, |h, store, id| {
                    h.on_release(store, id)
                });
                self.entities.remove(&id);
                return Err(EntityError::NotRegistered {
                    integrity: integrity_of(&compensation_failures),
                    id,
                    cause: Box::new(cause),
                    compensation_failures,
                }
                .into());
            }
            applied.push(phase);
        }
        Ok(())
    }

    /// Remove an entity from the store and hand it back unlocked
    ///
    /// Mirror of [`Store::register`]: phases run leaf-to-base and a failure is
    /// compensated by re-registering the phases already released.
    ///
    /// # Errors
    ///
    /// * `NotFound` - no entity with this id
    /// * `NotReleased` - a phase failed; carries the cause and the rollback
    ///   outcome
    pub fn release(&mut self, id: &EntityId) -> Result<Resource> {
        log_op_start!("release", entity_id = id.as_str());
        let start = Instant::now();

        let resource = self.release_impl(id).map_err(|e| {
            log_op_error!(
                "release",
                &e,
                duration_ms = start.elapsed().as_millis() as u64,
                entity_id = id.as_str()
            );
            e
        })?;

        log_op_end!(
            "release",
            duration_ms = start.elapsed().as_millis() as u64,
            entity_id = id.as_str(),
            entity_kind = resource.kind().as_str()
        );
        Ok(resource)
    }

    fn release_impl(&mut self, id: &EntityId) -> Result<Resource> {
        let kind = self.entity(id)?.kind();

        let mut applied: Vec<Phase> = Vec::with_capacity(kind.phases().len());
        for &phase in kind.phases().iter().rev() {
            let handler = self.handlers.get(phase);
            if let Err(cause) = handler.on_release(self, id) {
                let compensation_failures = self.compensate(id, &applied, |h, store, id| {
                    h.on_register(store, id)
                });
                return Err(EntityError::NotReleased {
                    integrity: integrity_of(&compensation_failures),
                    id: id.clone(),
                    cause: Box::new(cause),
                    compensation_failures,
                }
                .into());
            }
            applied.push(phase);
        }

        self.entities.remove(id).ok_or_else(|| {
            EntityError::NotFound {
                id: Some(id.clone()),
            }
            .into()
        })
    }

    /// Unwind `applied` (most recent first), collecting compensation errors
    fn compensate<F>(&mut self, id: &EntityId, applied: &[Phase], inverse: F) -> Vec<GraphError>
    where
        F: Fn(&dyn ResourceHandler, &mut Store, &EntityId) -> Result<()>,
    {
        let mut failures = Vec::new();
        for &phase in applied.iter().rev() {
            let handler = self.handlers.get(phase);
            if let Err(e) = inverse(handler.as_ref(), self, id) {
                tracing::warn!(
                    entity_id = id.as_str(),
                    phase = ?phase,
                    error = %e,
                    "compensation failed"
                );
                failures.push(e);
            }
        }
        failures
    }

    // ===== Reads =====

    /// Look up a registered entity
    ///
    /// # Errors
    ///
    /// `NotFound` if no entity has this id, or any error raised by a
    /// handler's `on_retrieve`.
    pub fn retrieve(&self, id: &EntityId) -> Result<&Resource> {
        let resource = self.entity(id)?;
        for &phase in resource.kind().phases() {
            self.handlers.get(phase).on_retrieve(self, id)?;
        }
        Ok(resource)
    }

    /// Look up a registered entity of a known kind
    ///
    /// # Errors
    ///
    /// `NotFound`, or `KindMismatch` if the entity is of another kind.
    pub fn retrieve_as(&self, id: &EntityId, kind: Kind) -> Result<&Resource> {
        let resource = self.retrieve(id)?;
        if resource.kind() != kind {
            return Err(EntityError::KindMismatch {
                id: id.clone(),
                expected: kind,
                actual: resource.kind(),
            }
            .into());
        }
        Ok(resource)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Ids of one kind in registration order
    pub fn list(&self, kind: Kind) -> Vec<EntityId> {
        self.by_kind.iter(&kind).cloned().collect()
    }

    /// Resolve a declared relationship of `owner` through this store
    ///
    /// Never fails: an owner that is not joined here, a relation it does not
    /// declare, and targets that are missing or of the wrong kind all read as
    /// empty.
    pub fn related(&self, owner: &EntityId, relation: Relation) -> Vec<EntityId> {
        let declared = self
            .resolvers
            .get(owner)
            .is_some_and(|relations| relations.contains(&relation));
        if !declared {
            return Vec::new();
        }
        let Some((kind, ids)) = self
            .entities
            .get(owner)
            .and_then(|resource| resource.references(relation))
        else {
            return Vec::new();
        };
        ids.into_iter()
            .filter(|id| self.is_joined_as(id, kind))
            .collect()
    }

    /// Content types that inherit from `type_id`, directly or transitively
    pub fn descendants(&self, type_id: &EntityId) -> Vec<EntityId> {
        let mut found: Vec<EntityId> = Vec::new();
        let mut frontier = vec![type_id.clone()];
        while let Some(current) = frontier.pop() {
            for candidate in self.by_kind.iter(&Kind::ContentType) {
                if candidate == type_id || found.contains(candidate) {
                    continue;
                }
                if self.related(candidate, Relation::Bases).contains(&current) {
                    found.push(candidate.clone());
                    frontier.push(candidate.clone());
                }
            }
        }
        found
    }

    /// Sizes of every internal table
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entities: self.entities.len(),
            kind_buckets: self.by_kind.len(),
            kind_entries: self.by_kind.value_count(),
            instance_buckets: self.instances_by_type.len(),
            instance_entries: self.instances_by_type.value_count(),
            instance_pins: self.instances_by_type.pin_count(),
            attribute_links: self.contents_by_attribute.value_count(),
            alias_links: self.aliases_by_source.value_count(),
            view_links: self.view_parts.value_count(),
            resolvers: self.resolvers.len(),
            subscriptions: self.subscriptions.len(),
            views: self.views.len(),
        }
    }

    // ===== Observers =====

    /// Call `observer` whenever `owner`'s `field` changes
    ///
    /// `subscriber` is a caller-chosen handle; the subscription is dropped
    /// when an entity with either id is released.
    ///
    /// # Errors
    ///
    /// `NotFound` if `owner` is not registered.
    pub fn observe(
        &mut self,
        owner: &EntityId,
        field: Field,
        subscriber: &EntityId,
        observer: Observer,
    ) -> Result<bool> {
        self.entity(owner)?;
        Ok(self
            .subscriptions
            .subscribe(owner, field, subscriber, Reaction::Observer(observer)))
    }

    pub fn unobserve(
        &mut self,
        owner: &EntityId,
        field: Field,
        subscriber: &EntityId,
        observer: &Observer,
    ) -> bool {
        self.subscriptions.unsubscribe(
            owner,
            field,
            subscriber,
            &Reaction::Observer(observer.clone()),
        )
    }

    // ===== Internal lookups =====

    pub(crate) fn entity(&self, id: &EntityId) -> Result<&Resource> {
        self.entities.get(id).ok_or_else(|| {
            EntityError::NotFound {
                id: Some(id.clone()),
            }
            .into()
        })
    }

    /// Typed view of an arena entry
    pub(crate) fn expect<'a, T>(
        &'a self,
        id: &EntityId,
        kind: Kind,
        pick: impl FnOnce(&'a Resource) -> Option<&'a T>,
    ) -> Result<&'a T> {
        let resource = self.entity(id)?;
        let actual = resource.kind();
        pick(resource).ok_or_else(|| {
            EntityError::KindMismatch {
                id: id.clone(),
                expected: kind,
                actual,
            }
            .into()
        })
    }

    pub(crate) fn expect_mut<'a, T>(
        &'a mut self,
        id: &EntityId,
        kind: Kind,
        pick: impl FnOnce(&'a mut Resource) -> Option<&'a mut T>,
    ) -> Result<&'a mut T> {
        let resource = self.entities.get_mut(id).ok_or_else(|| EntityError::NotFound {
            id: Some(id.clone()),
        })?;
        let actual = resource.kind();
        pick(resource).ok_or_else(|| {
            EntityError::KindMismatch {
                id: id.clone(),
                expected: kind,
                actual,
            }
            .into()
        })
    }

    /// Whether `id` completed its leaf phase in this store
    pub fn is_joined(&self, id: &EntityId) -> bool {
        self.resolvers.contains_key(id)
    }

    pub(crate) fn is_joined_as(&self, id: &EntityId, kind: Kind) -> bool {
        self.is_joined(id) && self.entities.get(id).is_some_and(|r| r.kind() == kind)
    }

    /// Joined instances of `type_id` whose kind matches `kind`
    pub(crate) fn instances_of(&self, type_id: &EntityId, kind: Kind) -> Vec<EntityId> {
        self.instances_by_type
            .iter(&TypeKey::Declared(type_id.clone()))
            .filter(|id| self.is_joined_as(id, kind))
            .cloned()
            .collect()
    }
}

fn integrity_of(compensation_failures: &[GraphError]) -> Integrity {
    if compensation_failures.is_empty() {
        Integrity::Recovered
    } else {
        Integrity::Compromised
    }
}
