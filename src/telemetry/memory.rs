//! In-memory telemetry core.
//!
//! [`InMemoryCore`] implements [`TelemetryCore`] without any platform SDK. It
//! keeps the shared context, baggage store, diagnostics and written batches in
//! memory and is used by the bundled binary and by tests.
//!
//! # Batching
//!
//! Events are grouped per feature into [`Batch`]es. A scoped write appends to the
//! feature's current batch unless `force_new_batch` was requested, in which case
//! a new batch is opened first.
//!
//! # Context Broadcasts
//!
//! [`TelemetryCore::set_baggage`] only updates the store. The new baggage reaches
//! receivers on the next broadcast ([`InMemoryCore::publish_context`] or
//! [`InMemoryCore::update_context`]), which keeps receivers free of reentrant
//! deliveries while they are publishing baggage themselves.

use crate::domain::error::{BridgeError, Result};
use crate::domain::RumContext;
use crate::telemetry::{
    CoreContext, EventWriter, Feature, FeatureBaggage, FeatureMessage, FeatureMessageReceiver,
    FeatureScope, TelemetryCore, WriteBlock,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Tracking consent applied to scoped writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingConsent {
    /// Events are stored.
    #[default]
    Granted,
    /// Events are dropped unless written with `bypass_consent`.
    NotGranted,
    /// Consent not decided yet; treated like `NotGranted`.
    Pending,
}

/// A group of events written by one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Sequential identifier, unique within the core.
    pub id: u64,

    /// Time the batch was opened.
    pub created_at: DateTime<Utc>,

    /// Serialized events in write order.
    pub events: Vec<Vec<u8>>,
}

/// A diagnostic reported through [`TelemetryCore::telemetry_error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Description supplied by the reporting feature.
    pub message: String,

    /// Rendered underlying error.
    pub error: String,
}

/// Mutable core state shared with the write scopes.
#[derive(Debug, Default)]
struct CoreState {
    context: CoreContext,
    consent: TrackingConsent,
    batches: BTreeMap<String, Vec<Batch>>,
    diagnostics: Vec<Diagnostic>,
    next_batch_id: u64,
}

impl CoreState {
    /// Appends events to the feature's current batch, opening one if needed.
    fn append(&mut self, feature: &str, force_new_batch: bool, events: Vec<Vec<u8>>) {
        let next_id = self.next_batch_id;
        let batches = self.batches.entry(feature.to_string()).or_default();

        let open_new = force_new_batch || batches.is_empty();
        if open_new {
            batches.push(Batch {
                id: next_id,
                created_at: Utc::now(),
                events: Vec::new(),
            });
            self.next_batch_id += 1;
            tracing::debug!(feature = %feature, batch_id = next_id, forced = force_new_batch, "opened batch");
        }

        if let Some(batch) = batches.last_mut() {
            batch.events.extend(events);
        }
    }
}

fn lock(state: &Mutex<CoreState>) -> MutexGuard<'_, CoreState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered feature and its bus receiver.
struct Registration {
    name: String,
    receiver: Arc<dyn FeatureMessageReceiver>,
}

/// Telemetry core keeping everything in memory.
///
/// # Thread Safety
///
/// All state is behind mutexes; the core can be shared as
/// `Arc<dyn TelemetryCore>` across threads. Bus deliveries happen outside the
/// internal locks.
///
/// # Example
///
/// ```
/// use replay_bridge::telemetry::{InMemoryCore, TelemetryCore};
///
/// let core = InMemoryCore::new("flutter");
/// core.set_baggage("sr_has_replay", Some(serde_json::json!(true)));
/// assert_eq!(core.baggage("sr_has_replay"), Some(serde_json::json!(true)));
/// ```
pub struct InMemoryCore {
    state: Arc<Mutex<CoreState>>,
    registrations: Mutex<Vec<Registration>>,
}

impl InMemoryCore {
    /// Creates an empty core for the given SDK source.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Arc<Self> {
        let state = CoreState {
            context: CoreContext {
                source: source.into(),
                baggages: BTreeMap::new(),
            },
            ..CoreState::default()
        };

        Arc::new(Self {
            state: Arc::new(Mutex::new(state)),
            registrations: Mutex::new(Vec::new()),
        })
    }

    /// Sets the tracking consent applied to subsequent writes.
    pub fn set_tracking_consent(&self, consent: TrackingConsent) {
        tracing::debug!(consent = ?consent, "tracking consent changed");
        lock(&self.state).consent = consent;
    }

    /// Returns a snapshot of the shared context.
    #[must_use]
    pub fn context(&self) -> CoreContext {
        lock(&self.state).context.clone()
    }

    /// Returns the raw value of a baggage, if present.
    #[must_use]
    pub fn baggage(&self, key: &str) -> Option<Value> {
        lock(&self.state)
            .context
            .baggages
            .get(key)
            .map(|b| b.value().clone())
    }

    /// Returns the batches written by a feature, oldest first.
    #[must_use]
    pub fn batches(&self, feature: &str) -> Vec<Batch> {
        lock(&self.state)
            .batches
            .get(feature)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns every diagnostic reported so far.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.state).diagnostics.clone()
    }

    /// Returns the names of registered features in registration order.
    #[must_use]
    pub fn features(&self) -> Vec<String> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Broadcasts the current context to all receivers.
    ///
    /// Returns `true` if any receiver handled the message.
    pub fn publish_context(&self) -> bool {
        let message = FeatureMessage::Context(self.context());
        self.send_message(&message)
    }

    /// Replaces a set of baggages and broadcasts the resulting context.
    ///
    /// `None` values remove the baggage.
    pub fn update_context<I>(&self, baggages: I) -> bool
    where
        I: IntoIterator<Item = (String, Option<Value>)>,
    {
        {
            let mut state = lock(&self.state);
            for (key, value) in baggages {
                Self::apply_baggage(&mut state, &key, value);
            }
        }
        self.publish_context()
    }

    /// Publishes a new RUM context (or its absence) and broadcasts it.
    pub fn update_rum_context(&self, context: Option<&RumContext>) -> bool {
        let value = context.and_then(|c| match serde_json::to_value(c) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "failed to encode RUM context");
                None
            }
        });
        self.update_context([(RumContext::KEY.to_string(), value)])
    }

    fn apply_baggage(state: &mut CoreState, key: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                state
                    .context
                    .baggages
                    .insert(key.to_string(), FeatureBaggage::new(value));
            }
            None => {
                state.context.baggages.remove(key);
            }
        }
    }
}

impl TelemetryCore for InMemoryCore {
    fn register_feature(&self, feature: Arc<dyn Feature>) -> Result<()> {
        let mut registrations = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let name = feature.name().to_string();
        if registrations.iter().any(|r| r.name == name) {
            return Err(BridgeError::Feature(format!(
                "feature '{name}' is already registered"
            )));
        }

        tracing::debug!(feature = %name, "feature registered");
        registrations.push(Registration {
            name,
            receiver: feature.message_receiver(),
        });
        Ok(())
    }

    fn send_message(&self, message: &FeatureMessage) -> bool {
        let receivers: Vec<Arc<dyn FeatureMessageReceiver>> = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| Arc::clone(&r.receiver))
            .collect();

        let _span = tracing::debug_span!("core_send_message", receivers = receivers.len()).entered();

        let mut handled = false;
        for receiver in receivers {
            handled |= receiver.receive(message, self);
        }
        handled
    }

    fn telemetry_error(&self, message: &str, error: &dyn std::error::Error) {
        tracing::debug!(message = %message, error = %error, "telemetry error reported");
        lock(&self.state).diagnostics.push(Diagnostic {
            message: message.to_string(),
            error: error.to_string(),
        });
    }

    fn set_baggage(&self, key: &str, value: Option<Value>) {
        tracing::trace!(key = %key, present = value.is_some(), "baggage updated");
        Self::apply_baggage(&mut lock(&self.state), key, value);
    }

    fn scope(&self, feature: &str) -> Option<Arc<dyn FeatureScope>> {
        let registered = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.name == feature);

        if !registered {
            return None;
        }

        Some(Arc::new(MemoryScope {
            feature: feature.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

impl std::fmt::Debug for InMemoryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCore")
            .field("features", &self.features())
            .finish_non_exhaustive()
    }
}

/// Write scope of one feature in an [`InMemoryCore`].
struct MemoryScope {
    feature: String,
    state: Arc<Mutex<CoreState>>,
}

/// Collects events written inside a scoped write.
#[derive(Default)]
struct CollectingWriter {
    events: Vec<Vec<u8>>,
}

impl EventWriter for CollectingWriter {
    fn write(&mut self, event: &[u8]) {
        self.events.push(event.to_vec());
    }
}

impl FeatureScope for MemoryScope {
    fn event_write_context(&self, bypass_consent: bool, force_new_batch: bool, block: WriteBlock<'_>) {
        let (context, consent) = {
            let state = lock(&self.state);
            (state.context.clone(), state.consent)
        };

        let mut writer = CollectingWriter::default();
        block(&context, &mut writer);

        if writer.events.is_empty() {
            return;
        }

        if consent != TrackingConsent::Granted && !bypass_consent {
            tracing::debug!(
                feature = %self.feature,
                consent = ?consent,
                dropped = writer.events.len(),
                "events dropped without tracking consent"
            );
            return;
        }

        lock(&self.state).append(&self.feature, force_new_batch, writer.events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingReceiver {
        handles: bool,
        seen: Mutex<usize>,
    }

    impl FeatureMessageReceiver for CountingReceiver {
        fn receive(&self, _message: &FeatureMessage, _core: &dyn TelemetryCore) -> bool {
            *self.seen.lock().unwrap() += 1;
            self.handles
        }
    }

    struct TestFeature {
        name: &'static str,
        receiver: Arc<CountingReceiver>,
    }

    impl Feature for TestFeature {
        fn name(&self) -> &str {
            self.name
        }

        fn message_receiver(&self) -> Arc<dyn FeatureMessageReceiver> {
            self.receiver.clone()
        }
    }

    fn feature(name: &'static str, handles: bool) -> (Arc<TestFeature>, Arc<CountingReceiver>) {
        let receiver = Arc::new(CountingReceiver {
            handles,
            seen: Mutex::new(0),
        });
        let feature = Arc::new(TestFeature {
            name,
            receiver: receiver.clone(),
        });
        (feature, receiver)
    }

    fn write(core: &InMemoryCore, feature: &str, force_new_batch: bool, bypass_consent: bool, event: &str) {
        let scope = core.scope(feature).unwrap();
        let event = event.as_bytes().to_vec();
        scope.event_write_context(
            bypass_consent,
            force_new_batch,
            Box::new(move |_, writer| writer.write(&event)),
        );
    }

    #[test]
    fn rejects_duplicate_feature_names() {
        let core = InMemoryCore::new("flutter");
        let (first, _) = feature("replay", true);
        let (second, _) = feature("replay", true);

        core.register_feature(first).unwrap();
        assert!(matches!(
            core.register_feature(second),
            Err(BridgeError::Feature(_))
        ));
        assert_eq!(core.features(), vec!["replay".to_string()]);
    }

    #[test]
    fn delivers_messages_to_every_receiver() {
        let core = InMemoryCore::new("flutter");
        let (ignoring, ignoring_receiver) = feature("a", false);
        let (handling, handling_receiver) = feature("b", true);
        core.register_feature(ignoring).unwrap();
        core.register_feature(handling).unwrap();

        assert!(core.publish_context());
        assert_eq!(*ignoring_receiver.seen.lock().unwrap(), 1);
        assert_eq!(*handling_receiver.seen.lock().unwrap(), 1);
    }

    #[test]
    fn scope_requires_registration() {
        let core = InMemoryCore::new("flutter");
        assert!(core.scope("replay").is_none());

        let (replay, _) = feature("replay", true);
        core.register_feature(replay).unwrap();
        assert!(core.scope("replay").is_some());
    }

    #[test]
    fn forced_writes_open_new_batches() {
        let core = InMemoryCore::new("flutter");
        let (replay, _) = feature("replay", true);
        core.register_feature(replay).unwrap();

        write(&core, "replay", false, false, "a");
        write(&core, "replay", false, false, "b");
        write(&core, "replay", true, false, "c");

        let batches = core.batches("replay");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].events, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(batches[1].events, vec![b"c".to_vec()]);
    }

    #[test]
    fn consent_gates_writes_unless_bypassed() {
        let core = InMemoryCore::new("flutter");
        let (replay, _) = feature("replay", true);
        core.register_feature(replay).unwrap();
        core.set_tracking_consent(TrackingConsent::NotGranted);

        write(&core, "replay", false, false, "dropped");
        assert!(core.batches("replay").is_empty());

        write(&core, "replay", false, true, "kept");
        assert_eq!(core.batches("replay")[0].events, vec![b"kept".to_vec()]);
    }

    #[test]
    fn baggage_is_visible_in_next_broadcast() {
        let core = InMemoryCore::new("flutter");
        core.set_baggage("sr_has_replay", Some(Value::Bool(true)));
        assert!(core.context().baggages.contains_key("sr_has_replay"));

        core.set_baggage("sr_has_replay", None);
        assert!(core.baggage("sr_has_replay").is_none());
    }

    #[test]
    fn telemetry_errors_are_collected() {
        let core = InMemoryCore::new("flutter");
        let error = BridgeError::Decode("bad".to_string());
        core.telemetry_error("decode failed", &error);

        let diagnostics = core.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "decode failed");
        assert_eq!(diagnostics[0].error, "Decode error: bad");
    }
}
