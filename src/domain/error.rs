//! Error types for the replay bridge.
//!
//! This module defines the centralized error type [`BridgeError`] and a type alias
//! [`Result`] used throughout the crate. Errors on the telemetry data path are
//! absorbed where they occur (logged or reported to the core's diagnostic sink);
//! the variants here surface only from setup code and decoding helpers.
//! Method-channel failures use the plugin's own error type.

use thiserror::Error;

/// The main error type for replay bridge operations.
///
/// # Examples
///
/// ```
/// use replay_bridge::BridgeError;
///
/// fn load() -> Result<(), BridgeError> {
///     Err(BridgeError::Config("trace_max_bytes must be a number".to_string()))
/// }
///
/// assert_eq!(
///     load().unwrap_err().to_string(),
///     "Configuration error: trace_max_bytes must be a number"
/// );
/// ```
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A payload was present but could not be decoded into the expected type.
    ///
    /// Raised by baggage decoding and by the record/segment JSON readers.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Feature registration with the telemetry core failed.
    #[error("Feature error: {0}")]
    Feature(String),
}

/// A specialized `Result` type for replay bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
