//! Method-channel handler for the session replay plugin.
//!
//! [`SessionReplayPlugin`] is the native end of the managed layer's method
//! channel. It decodes calls, dispatches them to the [`SessionReplayFeature`]
//! and pushes RUM context changes back to the managed layer as
//! `onContextChanged` invocations.

use crate::domain::RumContext;
use crate::plugin::calls::{Command, MethodCall, PluginError};
use crate::replay::{Configuration, ContextChangeListener, SessionReplayFeature};
use crate::telemetry::TelemetryCore;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Method invoked on the managed layer when the RUM context changes.
pub const ON_CONTEXT_CHANGED: &str = "onContextChanged";

/// Outgoing half of the method channel.
pub trait MethodChannel: Send + Sync {
    /// Invokes a method on the managed layer.
    fn invoke_method(&self, method: &str, arguments: Value);
}

/// Forwards sampled contexts to the managed layer.
struct ChannelForwarder {
    channel: Arc<dyn MethodChannel>,
}

impl ContextChangeListener for ChannelForwarder {
    fn on_change(&self, context: Option<&RumContext>) {
        if let Some(context) = context {
            self.channel
                .invoke_method(ON_CONTEXT_CHANGED, Value::Object(context.encoded_for_channel()));
        }
    }
}

/// Native end of the session replay method channel.
pub struct SessionReplayPlugin {
    core: Weak<dyn TelemetryCore>,
    channel: Arc<dyn MethodChannel>,
    feature: Option<Arc<SessionReplayFeature>>,
}

impl SessionReplayPlugin {
    /// Creates a plugin bound to `core`, answering on `channel`.
    #[must_use]
    pub fn new(core: &Arc<dyn TelemetryCore>, channel: Arc<dyn MethodChannel>) -> Self {
        Self {
            core: Arc::downgrade(core),
            channel,
            feature: None,
        }
    }

    /// The enabled feature, if `enable` succeeded.
    #[must_use]
    pub const fn feature(&self) -> Option<&Arc<SessionReplayFeature>> {
        self.feature.as_ref()
    }

    /// Handles one method call.
    ///
    /// Calls other than `enable` are accepted and ignored until the feature is
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns the [`PluginError`] to report on the channel.
    #[tracing::instrument(level = "debug", skip(self, call), fields(method = %call.method))]
    pub fn handle(&mut self, call: &MethodCall) -> Result<(), PluginError> {
        let command = Command::parse(call).map_err(|e| {
            tracing::debug!(error = %e, code = e.code(), "rejected method call");
            e
        })?;

        match command {
            Command::Enable { configuration } => self.handle_enable(configuration),
            Command::SetHasReplay { has_replay } => {
                self.with_feature(|feature| feature.set_has_replay(has_replay));
                Ok(())
            }
            Command::SetRecordCount { view_id, count } => {
                self.with_feature(|feature| feature.set_record_count(&view_id, count));
                Ok(())
            }
            Command::WriteSegment { record, view_id } => {
                self.with_feature(|feature| feature.writer().write(&record, &view_id));
                Ok(())
            }
        }
    }

    fn handle_enable(&mut self, configuration: Configuration) -> Result<(), PluginError> {
        let Some(core) = self.core.upgrade() else {
            return Err(PluginError::InvalidOperation(
                "Datadog SDK must be initialized before enabling Session Replay".to_string(),
            ));
        };

        let feature = SessionReplayFeature::enable(configuration, &core)
            .map_err(|e| PluginError::InvalidOperation(e.to_string()))?;

        feature.observe_context(ChannelForwarder {
            channel: Arc::clone(&self.channel),
        });
        self.feature = Some(feature);
        Ok(())
    }

    fn with_feature<F>(&self, f: F)
    where
        F: FnOnce(&SessionReplayFeature),
    {
        match &self.feature {
            Some(feature) => f(feature),
            None => tracing::debug!("session replay not enabled, call ignored"),
        }
    }
}

impl std::fmt::Debug for SessionReplayPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionReplayPlugin")
            .field("feature", &self.feature)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{FEATURE_NAME, HAS_REPLAY_KEY};
    use crate::telemetry::InMemoryCore;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        invocations: Mutex<Vec<(String, Value)>>,
    }

    impl MethodChannel for RecordingChannel {
        fn invoke_method(&self, method: &str, arguments: Value) {
            self.invocations
                .lock()
                .unwrap()
                .push((method.to_string(), arguments));
        }
    }

    fn plugin() -> (Arc<InMemoryCore>, Arc<RecordingChannel>, SessionReplayPlugin) {
        let memory = InMemoryCore::new("flutter");
        let core: Arc<dyn TelemetryCore> = memory.clone();
        let channel = Arc::new(RecordingChannel::default());
        let plugin = SessionReplayPlugin::new(&core, channel.clone());
        (memory, channel, plugin)
    }

    fn enable(plugin: &mut SessionReplayPlugin) {
        plugin
            .handle(&MethodCall::new("enable", json!({ "configuration": {} })))
            .unwrap();
    }

    #[test]
    fn calls_before_enable_are_ignored() {
        let (memory, _channel, mut plugin) = plugin();

        plugin
            .handle(&MethodCall::new("setHasReplay", json!({ "hasReplay": true })))
            .unwrap();

        assert!(plugin.feature().is_none());
        assert!(memory.baggage(HAS_REPLAY_KEY).is_none());
    }

    #[test]
    fn enable_registers_feature() {
        let (memory, _channel, mut plugin) = plugin();
        enable(&mut plugin);

        assert!(plugin.feature().is_some());
        assert_eq!(memory.features(), vec![FEATURE_NAME.to_string()]);
    }

    #[test]
    fn enable_twice_is_invalid() {
        let (_memory, _channel, mut plugin) = plugin();
        enable(&mut plugin);

        let err = plugin
            .handle(&MethodCall::new("enable", json!({ "configuration": {} })))
            .unwrap_err();
        assert_eq!(err.code(), "DatadogSdk:InvalidOperation");
    }

    #[test]
    fn enable_without_core_is_invalid() {
        let (memory, _channel, mut plugin) = plugin();
        drop(memory);

        let err = plugin
            .handle(&MethodCall::new("enable", json!({ "configuration": {} })))
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidOperation(_)));
    }

    #[test]
    fn forwards_sampled_contexts_only() {
        let (memory, channel, mut plugin) = plugin();
        enable(&mut plugin);

        memory.update_rum_context(Some(&RumContext::new("app", "s1", Some("v1"))));
        memory.update_rum_context(None);

        let invocations = channel.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].0, ON_CONTEXT_CHANGED);
        assert_eq!(
            invocations[0].1,
            json!({ "applicationId": "app", "sessionId": "s1", "viewId": "v1" })
        );
    }

    #[test]
    fn write_segment_reaches_core_batches() {
        let (memory, _channel, mut plugin) = plugin();
        enable(&mut plugin);

        for view_id in ["v1", "v1", "v2"] {
            plugin
                .handle(&MethodCall::new(
                    "writeSegment",
                    json!({ "record": "{}", "viewId": view_id }),
                ))
                .unwrap();
        }

        let batches = memory.batches(FEATURE_NAME);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].events.len(), 2);
        assert_eq!(batches[1].events.len(), 1);
    }
}
