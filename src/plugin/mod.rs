//! Method-channel plugin layer.
//!
//! Sits between the managed layer and the session replay feature:
//!
//! ```text
//! managed layer ── MethodCall ──▶ Command::parse ──▶ SessionReplayPlugin ──▶ SessionReplayFeature
//!       ▲                                                   │
//!       └──────────── onContextChanged (MethodChannel) ─────┘
//! ```
//!
//! - [`calls`]: call decoding and channel error codes
//! - [`handler`]: the plugin dispatching decoded calls

pub mod calls;
pub mod handler;

pub use calls::{Command, MethodCall, PluginError};
pub use handler::{MethodChannel, SessionReplayPlugin, ON_CONTEXT_CHANGED};
