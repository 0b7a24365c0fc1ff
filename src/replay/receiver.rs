//! RUM context receiver.
//!
//! [`RumContextReceiver`] is subscribed to the core's message bus. It picks the
//! context messages out of the bus traffic, decodes the `"rum"` baggage into a
//! [`RumContext`] and notifies its listener once per distinct value, including
//! transitions to an absent context.
//!
//! # Change Detection
//!
//! ```text
//! bus:       A  A  B  B  B  ∅  A
//! listener:  A     B        ∅  A
//! ```
//!
//! A payload that cannot be decoded is reported to the core's diagnostic channel
//! and counts as `∅` for that delivery.

use crate::domain::RumContext;
use crate::telemetry::{CoreContext, FeatureMessage, FeatureMessageReceiver, TelemetryCore};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Message reported to the core when the `"rum"` baggage is malformed.
const DECODE_FAILURE_MESSAGE: &str = "Fails to decode RUM context from Session Replay";

/// Listener notified on distinct RUM context changes.
///
/// `None` means the current RUM session is not sampled.
pub trait ContextChangeListener: Send + Sync {
    /// Called with the new context.
    fn on_change(&self, context: Option<&RumContext>);
}

impl<F> ContextChangeListener for F
where
    F: Fn(Option<&RumContext>) + Send + Sync,
{
    fn on_change(&self, context: Option<&RumContext>) {
        self(context);
    }
}

#[derive(Default)]
struct ReceiverState {
    previous: Option<RumContext>,
    listener: Option<Box<dyn ContextChangeListener>>,
}

/// Receives RUM context from the core and notifies distinct changes.
///
/// Deliveries are serialized by an internal lock which is held while the
/// listener runs, so the listener must not deliver messages back into the same
/// receiver.
///
/// # Examples
///
/// ```
/// use replay_bridge::replay::RumContextReceiver;
/// use replay_bridge::telemetry::{InMemoryCore, FeatureMessage, FeatureMessageReceiver};
/// use replay_bridge::RumContext;
///
/// let core = InMemoryCore::new("flutter");
/// let receiver = RumContextReceiver::new();
///
/// let ignored = FeatureMessage::Payload { label: "other".into(), value: serde_json::Value::Null };
/// assert!(!receiver.receive(&ignored, &*core));
///
/// core.update_rum_context(Some(&RumContext::new("app", "s1", Some("v1"))));
/// assert!(receiver.receive(&FeatureMessage::Context(core.context()), &*core));
/// assert_eq!(receiver.current().unwrap().session_id, "s1");
/// ```
#[derive(Default)]
pub struct RumContextReceiver {
    state: Mutex<ReceiverState>,
}

impl RumContextReceiver {
    /// Creates a receiver with no listener and no previous context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the listener, replacing any previous one.
    pub fn observe<L>(&self, listener: L)
    where
        L: ContextChangeListener + 'static,
    {
        tracing::debug!("context listener registered");
        self.lock().listener = Some(Box::new(listener));
    }

    /// Returns the last context notified, `None` if absent or never received.
    #[must_use]
    pub fn current(&self) -> Option<RumContext> {
        self.lock().previous.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Extracts the RUM context, `Ok(None)` if the core carries none.
    fn decode(context: &CoreContext) -> crate::Result<Option<RumContext>> {
        context
            .baggages
            .get(RumContext::KEY)
            .map(|baggage| baggage.decode::<RumContext>())
            .transpose()
    }
}

impl FeatureMessageReceiver for RumContextReceiver {
    fn receive(&self, message: &FeatureMessage, core: &dyn TelemetryCore) -> bool {
        let FeatureMessage::Context(context) = message else {
            return false;
        };

        let new = Self::decode(context).unwrap_or_else(|e| {
            core.telemetry_error(DECODE_FAILURE_MESSAGE, &e);
            None
        });

        let mut state = self.lock();
        if new != state.previous {
            tracing::debug!(
                session_id = ?new.as_ref().map(|c| c.session_id.as_str()),
                view_id = ?new.as_ref().and_then(|c| c.view_id.as_deref()),
                "RUM context changed"
            );
            if let Some(listener) = &state.listener {
                listener.on_change(new.as_ref());
            }
            state.previous = new;
        }

        true
    }
}

impl std::fmt::Debug for RumContextReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RumContextReceiver")
            .field("previous", &state.previous)
            .field("has_listener", &state.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{FeatureBaggage, InMemoryCore};
    use serde_json::json;
    use std::sync::Arc;

    type Notifications = Arc<Mutex<Vec<Option<RumContext>>>>;

    fn recording_receiver() -> (RumContextReceiver, Notifications) {
        let notifications: Notifications = Arc::new(Mutex::new(Vec::new()));
        let receiver = RumContextReceiver::new();
        let sink = notifications.clone();
        receiver.observe(move |context: Option<&RumContext>| {
            sink.lock().unwrap().push(context.cloned());
        });
        (receiver, notifications)
    }

    fn context_message(rum: Option<serde_json::Value>) -> FeatureMessage {
        let mut context = CoreContext::default();
        if let Some(rum) = rum {
            context
                .baggages
                .insert(RumContext::KEY.to_string(), FeatureBaggage::new(rum));
        }
        FeatureMessage::Context(context)
    }

    fn rum(session: &str, view: &str) -> RumContext {
        RumContext::new("app", session, Some(view))
    }

    fn message_for(context: Option<&RumContext>) -> FeatureMessage {
        context_message(context.map(|c| serde_json::to_value(c).unwrap()))
    }

    #[test]
    fn notifies_distinct_values_only() {
        let core = InMemoryCore::new("flutter");
        let (receiver, notifications) = recording_receiver();
        let a = rum("s1", "v1");
        let b = rum("s1", "v2");

        let inputs = [Some(&a), Some(&a), Some(&b), Some(&b), Some(&b), None, Some(&a)];
        for input in inputs {
            assert!(receiver.receive(&message_for(input), &*core));
        }

        assert_eq!(
            *notifications.lock().unwrap(),
            vec![Some(a.clone()), Some(b), None, Some(a)]
        );
    }

    #[test]
    fn absent_context_at_start_is_not_a_change() {
        let core = InMemoryCore::new("flutter");
        let (receiver, notifications) = recording_receiver();

        assert!(receiver.receive(&context_message(None), &*core));
        assert!(notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn ignores_non_context_messages() {
        let core = InMemoryCore::new("flutter");
        let (receiver, notifications) = recording_receiver();
        let message = FeatureMessage::Payload {
            label: "webview".to_string(),
            value: json!({ "rum": { "applicationID": "app", "sessionID": "s1" } }),
        };

        assert!(!receiver.receive(&message, &*core));
        assert!(notifications.lock().unwrap().is_empty());
        assert!(receiver.current().is_none());
    }

    #[test]
    fn malformed_payload_reports_once_and_counts_as_absent() {
        let core = InMemoryCore::new("flutter");
        let (receiver, notifications) = recording_receiver();
        let a = rum("s1", "v1");

        receiver.receive(&message_for(Some(&a)), &*core);
        assert!(receiver.receive(&context_message(Some(json!({ "sessionID": 42 }))), &*core));

        let diagnostics = core.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, DECODE_FAILURE_MESSAGE);
        assert_eq!(*notifications.lock().unwrap(), vec![Some(a), None]);
        assert!(receiver.current().is_none());
    }

    #[test]
    fn tracks_changes_without_listener() {
        let core = InMemoryCore::new("flutter");
        let receiver = RumContextReceiver::new();
        let a = rum("s1", "v1");

        receiver.receive(&message_for(Some(&a)), &*core);
        assert_eq!(receiver.current(), Some(a.clone()));

        let notifications: Notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = notifications.clone();
        receiver.observe(move |context: Option<&RumContext>| {
            sink.lock().unwrap().push(context.cloned());
        });

        receiver.receive(&message_for(Some(&a)), &*core);
        assert!(notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn later_listener_replaces_earlier_one() {
        let core = InMemoryCore::new("flutter");
        let (receiver, first) = recording_receiver();
        let second: Notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = second.clone();
        receiver.observe(move |context: Option<&RumContext>| {
            sink.lock().unwrap().push(context.cloned());
        });

        receiver.receive(&message_for(Some(&rum("s1", "v1"))), &*core);

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }
}
