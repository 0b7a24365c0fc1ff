//! Session replay feature for the telemetry core.
//!
//! # Modules
//!
//! - [`receiver`]: RUM context receiver with distinct-until-changed notifications
//! - [`writer`]: record writer forcing a new batch whenever the view changes
//! - [`feature`]: the registered feature and its baggage publishing
//! - [`segment`]: enriched record and upload segment JSON

pub mod feature;
pub mod receiver;
pub mod segment;
pub mod writer;

pub use feature::{Configuration, SessionReplayFeature};
pub use receiver::{ContextChangeListener, RumContextReceiver};
pub use segment::{segments_from_batch, EnrichedRecord, RecordWrapper, Segment};
pub use writer::SegmentWriter;

/// Name of the feature in the telemetry core, also its write scope.
pub const FEATURE_NAME: &str = "flutter-session-replay";

/// Baggage key of the "current view has replay" flag.
pub const HAS_REPLAY_KEY: &str = "sr_has_replay";

/// Baggage key of the per-view record count map.
pub const RECORDS_COUNT_KEY: &str = "sr_records_count_by_view_id";
