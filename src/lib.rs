//! Replay bridge: session replay glue between a managed app layer and a
//! native telemetry core.
//!
//! The bridge does two things on the native side of a session replay plugin:
//! - Observes the RUM context broadcast by the telemetry core and notifies the
//!   managed layer only when it actually changes
//! - Writes replay records into the core's event batches, starting a new batch
//!   whenever the view changes so a batch never mixes views

#![allow(clippy::multiple_crate_versions)]

//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Driver (main.rs)                                   │  ← JSON-lines entry point
//! └─────────────────────────────────────────────────────┘
//!                        │
//! ┌─────────────────────────────────────────────────────┐
//! │  Plugin Layer (plugin/)                             │  ← Method channel
//! │  - Call decoding                                    │
//! │  - Command dispatching                              │
//! └─────────────────────────────────────────────────────┘
//!                        │
//! ┌─────────────────────────────────────────────────────┐
//! │  Replay Layer (replay/)                             │
//! │  - Context receiver (distinct until changed)        │
//! │  - Segment writer (batch per view)                  │
//! │  - Feature, baggage publishing, segment JSON        │
//! └─────────────────────────────────────────────────────┘
//!                        │
//! ┌───────────────────────────┐   ┌───────────────────────────┐
//! │ Telemetry (telemetry/)    │   │ Domain (domain/)          │
//! │ - Core traits             │   │ - RUM context             │
//! │ - In-memory core          │   │ - Error types             │
//! └───────────────────────────┘   └───────────────────────────┘
//!                        │
//! ┌─────────────────────────────────────────────────────┐
//! │  Observability (observability/)                     │  ← Optional
//! │  - OpenTelemetry tracing, file-based OTLP export    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: RUM context and error types
//! - [`telemetry`]: telemetry core interface and the in-memory core
//! - [`replay`]: session replay feature, receiver and writer
//! - [`plugin`]: method-channel dispatch
//! - [`infrastructure`]: data directory and path utilities
//! - [`observability`]: tracing setup
//!
//! # Configuration
//!
//! Either a string map (as handed over by a host) or a TOML file:
//!
//! ```toml
//! source = "flutter"
//! custom_endpoint = "https://replay.example.com"
//! trace_level = "debug"
//! trace_file = "~/.local/share/replay-bridge/replay-bridge-otlp.json"
//! ```
//!
//! # Examples
//!
//! ```rust
//! use replay_bridge::plugin::{MethodCall, MethodChannel, SessionReplayPlugin};
//! use replay_bridge::telemetry::TelemetryCore;
//! use replay_bridge::{initialize, Config, RumContext};
//! use std::sync::Arc;
//!
//! struct Silent;
//! impl MethodChannel for Silent {
//!     fn invoke_method(&self, _method: &str, _arguments: serde_json::Value) {}
//! }
//!
//! let memory = initialize(&Config::default());
//! let core: Arc<dyn TelemetryCore> = memory.clone();
//! let mut plugin = SessionReplayPlugin::new(&core, Arc::new(Silent));
//!
//! plugin.handle(&MethodCall::new("enable", serde_json::json!({ "configuration": {} })))?;
//! memory.update_rum_context(Some(&RumContext::new("app", "s1", Some("v1"))));
//! plugin.handle(&MethodCall::new(
//!     "writeSegment",
//!     serde_json::json!({ "record": "{}", "viewId": "v1" }),
//! ))?;
//!
//! assert_eq!(memory.batches("flutter-session-replay").len(), 1);
//! # Ok::<(), replay_bridge::plugin::PluginError>(())
//! ```

pub mod domain;
pub mod infrastructure;
pub mod plugin;
pub mod replay;
pub mod telemetry;

pub mod observability;

pub use domain::{BridgeError, Result, RumContext};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use crate::telemetry::InMemoryCore;

/// Default SDK source reported in segments.
pub const DEFAULT_SOURCE: &str = "flutter";

/// Default size of the trace file before it is rotated (10 MB).
pub const DEFAULT_TRACE_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Default number of rotated trace files kept.
pub const DEFAULT_TRACE_MAX_BACKUPS: usize = 3;

/// Bridge configuration.
///
/// Loaded from a host-provided string map with [`Config::from_arguments`] or
/// from TOML with [`Config::from_toml_str`] / [`Config::from_file`]. Missing
/// keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Custom session replay intake URL.
    pub custom_endpoint: Option<String>,

    /// SDK source reported in the core context and in segments.
    ///
    /// Default: `"flutter"`
    pub source: String,

    /// Tracing filter directive.
    ///
    /// Options: `trace`, `debug`, `info`, `warn`, `error`, or any `EnvFilter`
    /// directive. Default: `"info"`
    pub trace_level: Option<String>,

    /// OTLP JSON trace file. Traces go to stderr when unset.
    ///
    /// Relative paths are resolved against the data directory; `~` is expanded.
    pub trace_file: Option<String>,

    /// Trace file size that triggers a rotation. Default: 10 MB
    pub trace_max_bytes: u64,

    /// Number of rotated trace files kept. Default: 3
    pub trace_max_backups: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            custom_endpoint: None,
            source: DEFAULT_SOURCE.to_string(),
            trace_level: None,
            trace_file: None,
            trace_max_bytes: DEFAULT_TRACE_MAX_BYTES,
            trace_max_backups: DEFAULT_TRACE_MAX_BACKUPS,
        }
    }
}

impl Config {
    /// Parses configuration from a string map.
    ///
    /// Unknown keys are ignored and unparsable numbers fall back to their
    /// defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::collections::BTreeMap;
    /// use replay_bridge::Config;
    ///
    /// let mut map = BTreeMap::new();
    /// map.insert("source".to_string(), "flutter".to_string());
    /// map.insert("trace_max_backups".to_string(), "5".to_string());
    ///
    /// let config = Config::from_arguments(&map);
    /// assert_eq!(config.trace_max_backups, 5);
    /// ```
    #[must_use]
    pub fn from_arguments(arguments: &BTreeMap<String, String>) -> Self {
        let defaults = Self::default();

        let source = arguments
            .get("source")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map_or(defaults.source, String::from);

        let trace_max_bytes = arguments
            .get("trace_max_bytes")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.trace_max_bytes);

        let trace_max_backups = arguments
            .get("trace_max_backups")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.trace_max_backups);

        Self {
            custom_endpoint: arguments.get("custom_endpoint").cloned(),
            source,
            trace_level: arguments.get("trace_level").cloned(),
            trace_file: arguments.get("trace_file").cloned(),
            trace_max_bytes,
            trace_max_backups,
        }
    }

    /// Parses configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the TOML is invalid or a value has
    /// the wrong type.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| BridgeError::Config(format!("Failed to parse config TOML: {e}")))
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the file cannot be read, or
    /// [`BridgeError::Config`] if it cannot be parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

/// Creates the in-memory telemetry core for a configuration.
///
/// Tracing is not initialized here; call
/// [`observability::init_tracing`] first if spans should be recorded.
#[must_use]
pub fn initialize(config: &Config) -> Arc<InMemoryCore> {
    tracing::debug!(
        source = %config.source,
        custom_endpoint = ?config.custom_endpoint,
        "initializing replay bridge"
    );
    InMemoryCore::new(config.source.clone())
}
