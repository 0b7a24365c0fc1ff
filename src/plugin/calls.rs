//! Method-channel call types.
//!
//! The managed layer talks to the bridge through named method calls carrying a
//! JSON argument map. This module decodes those calls into typed [`Command`]s
//! and defines the [`PluginError`]s reported back when a call violates its
//! contract.

use crate::replay::Configuration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A method call received from the managed layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Method name, e.g. `"writeSegment"`.
    pub method: String,

    /// Call arguments; expected to be a JSON object.
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    /// Creates a call with the given arguments.
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// Errors reported back to the managed layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// A required argument is missing or has the wrong type.
    #[error("Missing parameter in call to {method}")]
    MissingParameter {
        /// Method whose contract was violated.
        method: String,
    },

    /// The call cannot be served in the current state.
    #[error("{0}")]
    InvalidOperation(String),

    /// The method is unknown to this plugin.
    #[error("Method {0} is not implemented")]
    NotImplemented(String),
}

impl PluginError {
    /// Error code exposed on the method channel.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingParameter { .. } => "DatadogSdk:ContractViolation",
            Self::InvalidOperation(_) => "DatadogSdk:InvalidOperation",
            Self::NotImplemented(_) => "DatadogSdk:NotImplemented",
        }
    }

    fn missing_parameter(method: &str) -> Self {
        Self::MissingParameter {
            method: method.to_string(),
        }
    }
}

/// A decoded method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Enables session replay with the given configuration.
    Enable {
        /// Decoded replay configuration.
        configuration: Configuration,
    },

    /// Publishes the replay flag of the current view.
    SetHasReplay {
        /// Whether the current view has replay data.
        has_replay: bool,
    },

    /// Publishes the record count of a view.
    SetRecordCount {
        /// View the count belongs to.
        view_id: String,
        /// Number of records written for the view.
        count: i64,
    },

    /// Writes one serialized enriched record.
    WriteSegment {
        /// Enriched record JSON.
        record: String,
        /// View the record belongs to.
        view_id: String,
    },
}

fn string_arg(arguments: &Map<String, Value>, key: &str, method: &str) -> Result<String, PluginError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| PluginError::missing_parameter(method))
}

impl Command {
    /// Decodes a method call.
    ///
    /// # Errors
    ///
    /// - [`PluginError::InvalidOperation`] if the arguments are not an object
    /// - [`PluginError::MissingParameter`] if a required argument is missing
    /// - [`PluginError::NotImplemented`] for unknown methods
    ///
    /// # Examples
    ///
    /// ```
    /// use replay_bridge::plugin::{Command, MethodCall};
    ///
    /// let call = MethodCall::new("setHasReplay", serde_json::json!({ "hasReplay": true }));
    /// assert_eq!(Command::parse(&call), Ok(Command::SetHasReplay { has_replay: true }));
    /// ```
    pub fn parse(call: &MethodCall) -> Result<Self, PluginError> {
        let method = call.method.as_str();
        let Some(arguments) = call.arguments.as_object() else {
            return Err(PluginError::InvalidOperation(format!(
                "No arguments in call to {method}"
            )));
        };

        match method {
            "enable" => {
                let configuration = arguments
                    .get("configuration")
                    .filter(|c| c.is_object())
                    .and_then(|c| Configuration::deserialize(c).ok())
                    .ok_or_else(|| PluginError::missing_parameter(method))?;
                Ok(Self::Enable { configuration })
            }
            "setHasReplay" => {
                let has_replay = arguments
                    .get("hasReplay")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| PluginError::missing_parameter(method))?;
                Ok(Self::SetHasReplay { has_replay })
            }
            "setRecordCount" => {
                let view_id = string_arg(arguments, "viewId", method)?;
                let count = arguments
                    .get("count")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| PluginError::missing_parameter(method))?;
                Ok(Self::SetRecordCount { view_id, count })
            }
            "writeSegment" => {
                let record = string_arg(arguments, "record", method)?;
                let view_id = string_arg(arguments, "viewId", method)?;
                Ok(Self::WriteSegment { record, view_id })
            }
            other => Err(PluginError::NotImplemented(other.to_string())),
        }
    }
}
