//! Domain types shared by the bridge layers.
//!
//! - [`context`]: the RUM context snapshot published by the telemetry core
//! - [`error`]: error types and result alias

pub mod context;
pub mod error;

pub use context::RumContext;
pub use error::{BridgeError, Result};
