//! Session replay feature.
//!
//! [`SessionReplayFeature`] is what gets registered in the telemetry core. It
//! owns the [`RumContextReceiver`] subscribed to the message bus and the
//! [`SegmentWriter`] feeding records into the feature's batches, and it
//! publishes the replay state other features read from the baggage store:
//!
//! - `sr_has_replay`: whether the current view has replay data
//! - `sr_records_count_by_view_id`: number of records written per view

use crate::domain::error::Result;
use crate::domain::RumContext;
use crate::replay::receiver::{ContextChangeListener, RumContextReceiver};
use crate::replay::writer::SegmentWriter;
use crate::replay::{FEATURE_NAME, HAS_REPLAY_KEY, RECORDS_COUNT_KEY};
use crate::telemetry::{Feature, FeatureMessageReceiver, TelemetryCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Session replay configuration sent by the managed layer on `enable`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Custom intake URL replacing the default session replay endpoint.
    #[serde(default)]
    pub custom_endpoint: Option<String>,
}

/// Listener installed on the receiver by the feature.
///
/// Clears the replay flag when the session becomes unsampled, then forwards the
/// change to the managed-layer listener, if any.
struct ReplayContextListener {
    core: Weak<dyn TelemetryCore>,
    forward: Option<Box<dyn ContextChangeListener>>,
}

impl ContextChangeListener for ReplayContextListener {
    fn on_change(&self, context: Option<&RumContext>) {
        if context.is_none() {
            if let Some(core) = self.core.upgrade() {
                core.set_baggage(HAS_REPLAY_KEY, Some(Value::Bool(false)));
            }
        }
        if let Some(forward) = &self.forward {
            forward.on_change(context);
        }
    }
}

/// The session replay feature registered in the telemetry core.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use replay_bridge::replay::{Configuration, SessionReplayFeature, HAS_REPLAY_KEY};
/// use replay_bridge::telemetry::{InMemoryCore, TelemetryCore};
///
/// let memory = InMemoryCore::new("flutter");
/// let core: Arc<dyn TelemetryCore> = memory.clone();
///
/// let feature = SessionReplayFeature::enable(Configuration::default(), &core)?;
/// feature.set_has_replay(true);
/// assert_eq!(memory.baggage(HAS_REPLAY_KEY), Some(serde_json::json!(true)));
/// # Ok::<(), replay_bridge::BridgeError>(())
/// ```
pub struct SessionReplayFeature {
    configuration: Configuration,
    receiver: Arc<RumContextReceiver>,
    writer: SegmentWriter,
    core: Weak<dyn TelemetryCore>,
    records_count_by_view_id: Mutex<BTreeMap<String, i64>>,
}

impl SessionReplayFeature {
    /// Creates the feature, registers it in `core` and starts its writer.
    ///
    /// # Errors
    ///
    /// Returns the core's registration error, typically when the feature is
    /// already registered.
    pub fn enable(configuration: Configuration, core: &Arc<dyn TelemetryCore>) -> Result<Arc<Self>> {
        let _span = tracing::debug_span!("session_replay_enable").entered();

        let feature = Arc::new(Self {
            configuration,
            receiver: Arc::new(RumContextReceiver::new()),
            writer: SegmentWriter::new(),
            core: Arc::downgrade(core),
            records_count_by_view_id: Mutex::new(BTreeMap::new()),
        });

        core.register_feature(feature.clone())?;
        feature.writer.start_writing(core);
        feature.install_listener(None);

        tracing::debug!(
            custom_endpoint = ?feature.configuration.custom_endpoint,
            "session replay enabled"
        );
        Ok(feature)
    }

    fn install_listener(&self, forward: Option<Box<dyn ContextChangeListener>>) {
        self.receiver.observe(ReplayContextListener {
            core: self.core.clone(),
            forward,
        });
    }

    /// Forwards distinct RUM context changes to `listener`.
    ///
    /// Replaces the previously registered listener.
    pub fn observe_context<L>(&self, listener: L)
    where
        L: ContextChangeListener + 'static,
    {
        self.install_listener(Some(Box::new(listener)));
    }

    /// Configuration the feature was enabled with.
    #[must_use]
    pub const fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Receiver subscribed to the core's message bus.
    #[must_use]
    pub const fn receiver(&self) -> &Arc<RumContextReceiver> {
        &self.receiver
    }

    /// Writer feeding replay records into the core.
    #[must_use]
    pub const fn writer(&self) -> &SegmentWriter {
        &self.writer
    }

    /// Publishes whether the current view has replay data.
    pub fn set_has_replay(&self, has_replay: bool) {
        tracing::debug!(has_replay = has_replay, "publishing replay flag");
        if let Some(core) = self.core.upgrade() {
            core.set_baggage(HAS_REPLAY_KEY, Some(Value::Bool(has_replay)));
        }
    }

    /// Records the number of replay records written for a view and publishes
    /// the whole per-view map.
    pub fn set_record_count(&self, view_id: &str, count: i64) {
        let snapshot = {
            let mut counts = self
                .records_count_by_view_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            counts.insert(view_id.to_string(), count);
            counts.clone()
        };

        tracing::debug!(view_id = %view_id, count = count, views = snapshot.len(), "publishing record count");

        let value = Value::Object(
            snapshot
                .into_iter()
                .map(|(view_id, count)| (view_id, Value::from(count)))
                .collect(),
        );
        if let Some(core) = self.core.upgrade() {
            core.set_baggage(RECORDS_COUNT_KEY, Some(value));
        }
    }

    /// Returns the per-view record counts published so far.
    #[must_use]
    pub fn record_counts(&self) -> BTreeMap<String, i64> {
        self.records_count_by_view_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Feature for SessionReplayFeature {
    fn name(&self) -> &str {
        FEATURE_NAME
    }

    fn message_receiver(&self) -> Arc<dyn FeatureMessageReceiver> {
        self.receiver.clone()
    }
}

impl std::fmt::Debug for SessionReplayFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionReplayFeature")
            .field("configuration", &self.configuration)
            .field("receiver", &self.receiver)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}
