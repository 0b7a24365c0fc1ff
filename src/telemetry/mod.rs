//! Telemetry core abstraction.
//!
//! The replay bridge never owns the telemetry core: crash reporting, RUM, upload
//! and persistence all live there. This module defines the narrow surface the
//! bridge consumes from it, so that the session-replay feature can be driven by a
//! real host core or by the in-memory core in [`memory`].
//!
//! # Design Philosophy
//!
//! The traits map one-to-one onto the operations the bridge needs, nothing more:
//!
//! ```text
//! TelemetryCore ── register_feature ──▶ Feature ── message_receiver ──▶ FeatureMessageReceiver
//!       │                                                                  ▲
//!       ├── send_message (bus) ────────────────────────────────────────────┘
//!       ├── set_baggage / telemetry_error
//!       └── scope(feature) ──▶ FeatureScope ── event_write_context ──▶ EventWriter
//! ```

pub mod memory;

pub use memory::{Batch, Diagnostic, InMemoryCore, TrackingConsent};

use crate::domain::error::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An opaque baggage value published by the core.
///
/// Baggage is decoded lazily by whichever feature knows its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBaggage(Value);

impl FeatureBaggage {
    /// Wraps a raw JSON value.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Decodes the baggage into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] if the payload does not match `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use replay_bridge::telemetry::FeatureBaggage;
    ///
    /// let baggage = FeatureBaggage::new(serde_json::json!(true));
    /// assert!(baggage.decode::<bool>().unwrap());
    /// assert!(baggage.decode::<String>().is_err());
    /// ```
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.0).map_err(|e| BridgeError::Decode(e.to_string()))
    }

    /// Returns the raw JSON value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for FeatureBaggage {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Snapshot of the core's shared context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreContext {
    /// `source` of the SDK hosting the core (e.g. `"flutter"`).
    pub source: String,

    /// Named baggages shared between features.
    pub baggages: BTreeMap<String, FeatureBaggage>,
}

/// Messages delivered on the core's message bus.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureMessage {
    /// The shared context changed.
    Context(CoreContext),

    /// A named payload sent by another feature.
    Payload {
        /// Label identifying the payload kind.
        label: String,
        /// The payload itself.
        value: Value,
    },
}

/// Receives messages from the core's message bus.
pub trait FeatureMessageReceiver: Send + Sync {
    /// Processes a bus message.
    ///
    /// Returns `true` if the message was handled, `false` if it was ignored.
    /// Receivers must not have side effects for messages they ignore.
    fn receive(&self, message: &FeatureMessage, core: &dyn TelemetryCore) -> bool;
}

/// A feature that can be registered in a [`TelemetryCore`].
pub trait Feature: Send + Sync {
    /// Unique feature name, also used to resolve its write scope.
    fn name(&self) -> &str;

    /// Receiver subscribed to the core's message bus.
    fn message_receiver(&self) -> Arc<dyn FeatureMessageReceiver>;
}

/// Sink for serialized events inside a scoped write.
pub trait EventWriter {
    /// Writes one serialized event.
    fn write(&mut self, event: &[u8]);
}

/// Block executed inside [`FeatureScope::event_write_context`].
pub type WriteBlock<'a> = Box<dyn FnOnce(&CoreContext, &mut dyn EventWriter) + 'a>;

/// A feature's write path in the core.
pub trait FeatureScope: Send + Sync {
    /// Acquires a write context and runs `block` with it.
    ///
    /// The scope releases its bookkeeping on every exit path of `block`.
    /// `force_new_batch` closes the current batch before the events written by
    /// `block` are stored; `bypass_consent` stores them regardless of tracking
    /// consent.
    fn event_write_context(&self, bypass_consent: bool, force_new_batch: bool, block: WriteBlock<'_>);
}

/// The host telemetry core.
pub trait TelemetryCore: Send + Sync {
    /// Registers a feature and subscribes its receiver to the message bus.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Feature`] if the feature cannot be registered.
    fn register_feature(&self, feature: Arc<dyn Feature>) -> Result<()>;

    /// Delivers a message to every registered receiver.
    ///
    /// Returns `true` if at least one receiver handled it.
    fn send_message(&self, message: &FeatureMessage) -> bool;

    /// Reports a non-fatal internal error to the core's diagnostic channel.
    fn telemetry_error(&self, message: &str, error: &dyn std::error::Error);

    /// Upserts a value into the shared baggage store; `None` removes the key.
    fn set_baggage(&self, key: &str, value: Option<Value>);

    /// Resolves the write scope of a registered feature.
    fn scope(&self, feature: &str) -> Option<Arc<dyn FeatureScope>>;
}
