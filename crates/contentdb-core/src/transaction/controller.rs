use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use super::events::{panic_message, Event, EventHandlers};
use super::{Action, Transaction};
use crate::codec::{CodecRegistry, Deserializer, Serializer};
use crate::config::GraphConfig;
use crate::core_types::RequestId;
use crate::errors::{EntityError, GraphError, Result, TransactionError};
use crate::index::Index;
use crate::model::{EntityId, Kind, Resource};
use crate::ops::Store;
use crate::{log_op_end, log_op_error, log_op_start};

/// Summary of one processed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub request_id: RequestId,
    pub action: Action,
    pub resource_id: Option<EntityId>,
    pub error_codes: Vec<&'static str>,
    pub completed_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn succeeded(&self) -> bool {
        self.error_codes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ResolveTarget,
    ResolveDecoder,
    ResolveEncoder,
    Construct,
    Populate,
    Register,
    Release,
}

impl Step {
    fn plan(action: Action) -> &'static [Step] {
        match action {
            Action::Create => &[
                Step::ResolveDecoder,
                Step::ResolveEncoder,
                Step::Construct,
                Step::Populate,
                Step::Register,
            ],
            Action::Read => &[Step::ResolveTarget, Step::ResolveEncoder],
            Action::Update => &[
                Step::ResolveTarget,
                Step::ResolveDecoder,
                Step::ResolveEncoder,
                Step::Populate,
            ],
            Action::Delete => &[Step::ResolveTarget, Step::ResolveEncoder, Step::Release],
        }
    }

    /// Events fired after this step succeeds or fails
    ///
    /// A read has nothing left to refuse once its target resolved, so its
    /// encoder failure fires only `transaction_failed`.
    fn events(&self, action: Action) -> (Option<Event>, Option<Event>) {
        let not_done = match action {
            Action::Create => Some(Event::ResourceNotCreated),
            Action::Read => None,
            Action::Update => Some(Event::ResourceNotUpdated),
            Action::Delete => Some(Event::ResourceNotDeleted),
        };
        match (self, action) {
            (Step::ResolveTarget, _) => (
                Some(Event::ResourceResolved),
                Some(Event::ResourceNotResolved),
            ),
            (Step::Populate, Action::Create) => (Some(Event::ResourceCreated), not_done),
            (Step::Populate, _) => (Some(Event::ResourceUpdated), not_done),
            (Step::Register, _) => (
                Some(Event::ResourceRegistered),
                Some(Event::ResourceNotRegistered),
            ),
            (Step::Release, _) => (Some(Event::ResourceDeleted), not_done),
            _ => (None, not_done),
        }
    }
}

/// Codecs and the entity under construction, for one run
#[derive(Default)]
struct Pipeline {
    decoder: Option<Deserializer>,
    encoder: Option<Serializer>,
    draft: Option<Resource>,
}

/// Runs transactions against a store
///
/// Owns the store, the codec registry, the event handlers and a bounded
/// journal of processed transactions per kind.
#[derive(Debug)]
pub struct Controller {
    store: Store,
    codecs: CodecRegistry,
    handlers: EventHandlers,
    journal: Index<Kind, JournalEntry>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(Store::new())
    }
}

impl Controller {
    /// Controller over `store` with the `json` codecs
    pub fn new(store: Store) -> Self {
        let journal = Index::with_capacity(store.config().journal_capacity);
        Self {
            store,
            codecs: CodecRegistry::with_json(),
            handlers: EventHandlers::new(),
            journal,
        }
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self::new(Store::with_config(config))
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn codecs_mut(&mut self) -> &mut CodecRegistry {
        &mut self.codecs
    }

    pub fn handlers_mut(&mut self) -> &mut EventHandlers {
        &mut self.handlers
    }

    /// Most recent transactions that touched `kind`, oldest first
    pub fn journal(&self, kind: Kind) -> Vec<JournalEntry> {
        self.journal.iter(&kind).cloned().collect()
    }

    // ===== Pipeline =====

    /// Run `tx` to completion
    ///
    /// Never fails: errors are recorded in the returned transaction. Steps
    /// stop at the first error. A panicking event handler is recorded as
    /// `Unexpected` and stops the remaining steps; `transaction_failed` and
    /// `transaction_closing` still fire.
    pub fn process(&mut self, mut tx: Transaction) -> Transaction {
        let request_id = tx.context.request_id.clone();
        log_op_start!(
            "process",
            request_id = request_id.as_str(),
            action = tx.action.as_str()
        );
        let start = Instant::now();

        let opened = self.fire(Event::TransactionOpened, &mut tx);
        let mut pipeline = Pipeline::default();
        for &step in Step::plan(tx.action) {
            if !opened {
                break;
            }
            let (done, not_done) = step.events(tx.action);
            match self.run_step(step, &mut tx, &mut pipeline) {
                Ok(()) => {
                    if let Some(event) = done {
                        if !self.fire(event, &mut tx) {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        request_id = request_id.as_str(),
                        step = ?step,
                        error = %e,
                        "step failed"
                    );
                    tx.errors.push(e);
                    if let Some(event) = not_done {
                        self.fire(event, &mut tx);
                    }
                    break;
                }
            }
        }

        if tx.errors.is_empty() {
            if let Err(e) = self.encode_outbound(&mut tx, &pipeline) {
                tx.errors.push(e);
            }
        }

        if tx.errors.is_empty() {
            self.fire(Event::TransactionSucceeded, &mut tx);
        } else {
            self.fire(Event::TransactionFailed, &mut tx);
        }
        self.fire(Event::TransactionClosing, &mut tx);
        self.record(&tx);

        let duration_ms = start.elapsed().as_millis() as u64;
        match tx.errors.first() {
            Some(e) => {
                log_op_error!(
                    "process",
                    e,
                    duration_ms = duration_ms,
                    request_id = request_id.as_str(),
                    error_count = tx.errors.len()
                );
            }
            None => {
                log_op_end!(
                    "process",
                    duration_ms = duration_ms,
                    request_id = request_id.as_str()
                );
            }
        }
        tx
    }

    /// Fire `event` and record handler panics in `tx`; false if any
    /// handler panicked
    fn fire(&self, event: Event, tx: &mut Transaction) -> bool {
        let failures = self.handlers.fire(event, tx);
        let clean = failures.is_empty();
        tx.errors.extend(failures);
        clean
    }

    fn run_step(&mut self, step: Step, tx: &mut Transaction, pipeline: &mut Pipeline) -> Result<()> {
        match step {
            Step::ResolveTarget => {
                let id = tx
                    .resource_id
                    .clone()
                    .ok_or(EntityError::NotFound { id: None })?;
                let resource = match tx.kind {
                    Some(kind) => self.store.retrieve_as(&id, kind)?,
                    None => self.store.retrieve(&id)?,
                };
                tx.kind = Some(resource.kind());
                tx.resource = Some(resource.clone());
            }
            Step::ResolveDecoder => {
                let kind = target_kind(tx)?;
                pipeline.decoder = match (&tx.inbound_format, &tx.inbound_payload) {
                    (Some(format), _) => Some(self.codecs.deserializer(kind, format)?),
                    (None, None) if tx.action == Action::Create => None,
                    (None, _) => return Err(missing_format(kind)),
                };
            }
            Step::ResolveEncoder => {
                let kind = target_kind(tx)?;
                if let Some(format) = &tx.outbound_format {
                    pipeline.encoder = Some(self.codecs.serializer(kind, format)?);
                }
            }
            Step::Construct => {
                pipeline.draft = Some(Resource::blank(target_kind(tx)?));
            }
            Step::Populate => self.populate(tx, pipeline)?,
            Step::Register => {
                let draft = pipeline.draft.take().ok_or_else(|| unexpected("nothing to register"))?;
                let id = self.store.register(draft)?;
                tx.resource = Some(self.store.retrieve(&id)?.clone());
                tx.resource_id = Some(id);
            }
            Step::Release => {
                let id = tx.resource_id.clone().ok_or(EntityError::NotFound { id: None })?;
                let released = self.store.release(&id).map_err(|cause| EntityError::NotDeleted {
                    id: id.clone(),
                    cause: Box::new(cause),
                })?;
                tx.resource = Some(released);
            }
        }
        Ok(())
    }

    /// Decode the inbound payload into the draft (create) or into a copy of
    /// the target that then replaces it in the store (update)
    fn populate(&mut self, tx: &mut Transaction, pipeline: &mut Pipeline) -> Result<()> {
        match tx.action {
            Action::Create => {
                let draft = pipeline.draft.as_mut().ok_or_else(|| unexpected("no draft"))?;
                if let (Some(decoder), Some(payload)) = (&pipeline.decoder, &tx.inbound_payload) {
                    guarded(|| decoder(payload.as_slice(), draft))?;
                }
                tx.resource_id = Some(draft.id().clone());
                Ok(())
            }
            _ => {
                let id = tx.resource_id.clone().ok_or(EntityError::NotFound { id: None })?;
                let decoder = pipeline.decoder.clone().ok_or_else(|| unexpected("no decoder"))?;
                let payload = tx.inbound_payload.clone().unwrap_or_default();
                let mut replacement = self.store.retrieve(&id)?.clone();
                guarded(|| decoder(payload.as_slice(), &mut replacement))
                    .map_err(|cause| not_updated(&id, cause))?;
                self.store
                    .update(&id, replacement)
                    .map_err(|cause| not_updated(&id, cause))?;
                tx.resource = Some(self.store.retrieve(&id)?.clone());
                Ok(())
            }
        }
    }

    fn encode_outbound(&self, tx: &mut Transaction, pipeline: &Pipeline) -> Result<()> {
        if let (Some(encoder), Some(resource)) = (&pipeline.encoder, &tx.resource) {
            let payload = guarded(|| encoder(resource))?;
            tx.outbound_payload = Some(payload);
        }
        Ok(())
    }

    fn record(&mut self, tx: &Transaction) {
        let Some(kind) = tx.kind else {
            return;
        };
        self.journal.push(
            kind,
            JournalEntry {
                request_id: tx.context.request_id.clone(),
                action: tx.action,
                resource_id: tx.resource_id.clone(),
                error_codes: tx.error_codes(),
                completed_at: Utc::now(),
            },
        );
    }

    // ===== Bulk import / export =====

    /// Decode and register one entity, bypassing events and the journal
    ///
    /// # Errors
    ///
    /// Codec lookup or decode errors, and any registration error.
    pub fn import_entity(&mut self, kind: Kind, payload: &[u8], format: &str) -> Result<EntityId> {
        let decoder = self.codecs.deserializer(kind, format)?;
        let mut resource = Resource::blank(kind);
        guarded(|| decoder(payload, &mut resource))?;
        self.store.register(resource)
    }

    /// Encode one registered entity, bypassing events and the journal
    ///
    /// # Errors
    ///
    /// `NotFound`, codec lookup errors, or encode errors.
    pub fn export_entity(&self, id: &EntityId, format: &str) -> Result<Vec<u8>> {
        let resource = self.store.retrieve(id)?;
        let encoder = self.codecs.serializer(resource.kind(), format)?;
        guarded(|| encoder(resource))
    }
}

fn target_kind(tx: &Transaction) -> Result<Kind> {
    tx.kind.ok_or_else(|| unexpected("transaction has no kind"))
}

fn missing_format(kind: Kind) -> GraphError {
    crate::errors::CodecError::InvalidCodecKey {
        format: format!("<missing inbound format for {kind}>"),
    }
    .into()
}

fn unexpected(message: &str) -> GraphError {
    TransactionError::Unexpected {
        message: message.to_string(),
    }
    .into()
}

fn not_updated(id: &EntityId, cause: GraphError) -> GraphError {
    match cause {
        GraphError::Entity(EntityError::NotUpdated { .. }) => cause,
        cause => EntityError::NotUpdated {
            id: id.clone(),
            cause: Box::new(cause),
        }
        .into(),
    }
}

/// Run a codec, turning a panic into `Unexpected`
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(TransactionError::Unexpected {
            message: panic_message(payload.as_ref()),
        }
        .into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentType;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(controller: &mut Controller) -> Rc<RefCell<Vec<Event>>> {
        let seen: Rc<RefCell<Vec<Event>>> = Rc::default();
        for event in Event::ALL {
            let sink = Rc::clone(&seen);
            controller
                .handlers_mut()
                .register(event, None, None, move |event, _| sink.borrow_mut().push(event))
                .unwrap();
        }
        seen
    }

    #[test]
    fn test_create_fires_events_in_step_order() {
        let mut controller = Controller::default();
        let seen = recorder(&mut controller);

        let tx = controller.process(
            Transaction::create(Kind::ContentType)
                .with_inbound("json", br#"{"id": "c1", "name": "Base"}"#.to_vec()),
        );
        assert!(tx.succeeded(), "{:?}", tx.errors);
        assert_eq!(tx.resource_id, Some(EntityId::from("c1")));
        assert_eq!(
            *seen.borrow(),
            vec![
                Event::TransactionOpened,
                Event::ResourceCreated,
                Event::ResourceRegistered,
                Event::TransactionSucceeded,
                Event::TransactionClosing,
            ]
        );
        assert_eq!(controller.journal(Kind::ContentType).len(), 1);
    }

    #[test]
    fn test_panicking_codec_is_unexpected() {
        let mut controller = Controller::default();
        controller
            .codecs_mut()
            .register_serializer(Kind::ContentType, "broken", |_| panic!("encoder exploded"))
            .unwrap();
        controller
            .store_mut()
            .register(ContentType::new("Base").with_id("c1"))
            .unwrap();

        let tx = controller.process(Transaction::read("c1").with_outbound("broken"));
        assert_eq!(tx.error_codes(), vec!["ERR_UNEXPECTED"]);
        assert!(tx.outbound_payload.is_none());
    }

    #[test]
    fn test_export_then_import_into_fresh_controller() {
        let mut source = Controller::default();
        source
            .store_mut()
            .register(ContentType::new("Base").with_id("c1"))
            .unwrap();
        let payload = source.export_entity(&"c1".into(), " JSON ").unwrap();

        let mut target = Controller::default();
        let id = target.import_entity(Kind::ContentType, &payload, "json").unwrap();
        assert_eq!(id.as_str(), "c1");
        assert_eq!(target.store().retrieve(&id).unwrap().name(), Some("Base"));
        assert!(target.journal(Kind::ContentType).is_empty());
    }
}
