//! Replay record and segment JSON.
//!
//! The managed layer sends each capture as an *enriched record*: a JSON document
//! holding the raw replay records plus the RUM identifiers and timestamps they
//! share. The writer stores it wrapped in a [`RecordWrapper`]. When a batch is
//! read back, consecutive records of the same view are merged into one
//! [`Segment`], the unit the intake expects.
//!
//! # Segment Format
//!
//! ```json
//! {
//!   "application": { "id": "..." },
//!   "session": { "id": "..." },
//!   "view": { "id": "..." },
//!   "source": "flutter",
//!   "start": 1700000000000,
//!   "end": 1700000000500,
//!   "has_full_snapshot": true,
//!   "records": [ ... ],
//!   "records_count": 3
//! }
//! ```

use crate::domain::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw replay record, kept as an untyped JSON object.
pub type JsonObject = Map<String, Value>;

/// Envelope stored in the core for every written record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWrapper {
    /// The enriched record JSON exactly as received from the managed layer.
    #[serde(rename = "recordJson")]
    pub record_json: String,
}

impl RecordWrapper {
    /// Wraps a record JSON string.
    pub fn new(record_json: impl Into<String>) -> Self {
        Self {
            record_json: record_json.into(),
        }
    }

    /// Parses the wrapped JSON into an [`EnrichedRecord`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] if the JSON is malformed or misses one of
    /// the enriched record attributes.
    pub fn extract_enriched_record(&self) -> Result<EnrichedRecord> {
        EnrichedRecord::from_json(&self.record_json)
    }
}

/// Replay records of one view together with their shared metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
    /// Raw replay records.
    pub records: Vec<JsonObject>,

    /// RUM application id common to all records.
    #[serde(rename = "applicationID")]
    pub application_id: String,

    /// RUM session id common to all records.
    #[serde(rename = "sessionID")]
    pub session_id: String,

    /// RUM view id common to all records.
    #[serde(rename = "viewID")]
    pub view_id: String,

    /// Whether a full snapshot is among the records.
    pub has_full_snapshot: bool,

    /// Timestamp of the earliest record, in milliseconds.
    pub earliest_timestamp: i64,

    /// Timestamp of the latest record, in milliseconds.
    pub latest_timestamp: i64,
}

impl EnrichedRecord {
    /// Parses an enriched record from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] naming the offending attribute.
    ///
    /// # Examples
    ///
    /// ```
    /// use replay_bridge::replay::EnrichedRecord;
    ///
    /// let json = r#"{"records":[{"type":10}],"applicationID":"app","sessionID":"s1",
    ///     "viewID":"v1","hasFullSnapshot":true,"earliestTimestamp":1,"latestTimestamp":2}"#;
    /// let record = EnrichedRecord::from_json(json).unwrap();
    /// assert_eq!(record.view_id, "v1");
    /// assert!(EnrichedRecord::from_json("{}").is_err());
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BridgeError::Decode(format!("failed to read enriched record: {e}")))
    }

    fn same_segment(&self, other: &Self) -> bool {
        self.application_id == other.application_id
            && self.session_id == other.session_id
            && self.view_id == other.view_id
    }
}

/// Identifier object used for `application`, `session` and `view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    /// The identifier.
    pub id: String,
}

impl IdRef {
    fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

/// Replay records of one view merged for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// RUM application.
    pub application: IdRef,
    /// RUM session.
    pub session: IdRef,
    /// RUM view.
    pub view: IdRef,
    /// SDK source the segment was recorded in (e.g. `"flutter"`).
    pub source: String,
    /// Timestamp of the earliest record.
    pub start: i64,
    /// Timestamp of the latest record.
    pub end: i64,
    /// Whether a full snapshot is among the records.
    pub has_full_snapshot: bool,
    /// Records in write order.
    pub records: Vec<JsonObject>,
    /// Number of records.
    pub records_count: i64,
}

impl Segment {
    /// Merges enriched records into one segment.
    ///
    /// All records are expected to share application, session and view; the
    /// identifiers of the first record are used. Returns `None` for an empty
    /// slice.
    #[must_use]
    pub fn from_records(records: &[EnrichedRecord], source: &str) -> Option<Self> {
        let first = records.first()?;

        let merged: Vec<JsonObject> = records
            .iter()
            .flat_map(|r| r.records.iter().cloned())
            .collect();

        Some(Self {
            application: IdRef::new(&first.application_id),
            session: IdRef::new(&first.session_id),
            view: IdRef::new(&first.view_id),
            source: source.to_string(),
            start: records.iter().map(|r| r.earliest_timestamp).min().unwrap_or_default(),
            end: records.iter().map(|r| r.latest_timestamp).max().unwrap_or_default(),
            has_full_snapshot: records.iter().any(|r| r.has_full_snapshot),
            records_count: i64::try_from(merged.len()).unwrap_or(i64::MAX),
            records: merged,
        })
    }

    /// Serializes the segment into its upload JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serialization`] if a record cannot be serialized.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Decodes a batch of stored events into segments.
///
/// Consecutive records of the same application, session and view are merged.
/// Events that cannot be decoded are skipped.
#[must_use]
pub fn segments_from_batch(events: &[Vec<u8>], source: &str) -> Vec<Segment> {
    let _span = tracing::debug_span!("segments_from_batch", events = events.len()).entered();

    let mut groups: Vec<Vec<EnrichedRecord>> = Vec::new();

    for event in events {
        let record = serde_json::from_slice::<RecordWrapper>(event)
            .map_err(BridgeError::from)
            .and_then(|wrapper| wrapper.extract_enriched_record());

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable event");
                continue;
            }
        };

        match groups.last_mut() {
            Some(group) if group.last().is_some_and(|last| last.same_segment(&record)) => {
                group.push(record);
            }
            _ => groups.push(vec![record]),
        }
    }

    let segments: Vec<Segment> = groups
        .iter()
        .filter_map(|group| Segment::from_records(group, source))
        .collect();

    tracing::debug!(segments = segments.len(), "batch decoded");
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enriched(view: &str, earliest: i64, latest: i64, full: bool, count: usize) -> String {
        let records: Vec<Value> = (0..count).map(|i| json!({ "type": 10, "i": i })).collect();
        json!({
            "records": records,
            "applicationID": "app",
            "sessionID": "s1",
            "viewID": view,
            "hasFullSnapshot": full,
            "earliestTimestamp": earliest,
            "latestTimestamp": latest,
        })
        .to_string()
    }

    fn event(record_json: String) -> Vec<u8> {
        serde_json::to_vec(&RecordWrapper::new(record_json)).unwrap()
    }

    #[test]
    fn missing_attribute_is_named() {
        let err = EnrichedRecord::from_json(r#"{"records":[],"applicationID":"a"}"#).unwrap_err();
        assert!(err.to_string().contains("sessionID"), "{err}");
    }

    #[test]
    fn merges_records_of_one_view() {
        let records = vec![
            EnrichedRecord::from_json(&enriched("v1", 100, 200, false, 2)).unwrap(),
            EnrichedRecord::from_json(&enriched("v1", 50, 150, true, 1)).unwrap(),
        ];

        let segment = Segment::from_records(&records, "flutter").unwrap();
        assert_eq!(segment.view.id, "v1");
        assert_eq!(segment.start, 50);
        assert_eq!(segment.end, 200);
        assert!(segment.has_full_snapshot);
        assert_eq!(segment.records_count, 3);
        assert_eq!(segment.records.len(), 3);
    }

    #[test]
    fn empty_input_has_no_segment() {
        assert!(Segment::from_records(&[], "flutter").is_none());
    }

    #[test]
    fn upload_json_uses_intake_keys() {
        let records = vec![EnrichedRecord::from_json(&enriched("v1", 1, 2, true, 1)).unwrap()];
        let json = Segment::from_records(&records, "flutter").unwrap().to_json().unwrap();

        assert_eq!(json["application"], json!({ "id": "app" }));
        assert_eq!(json["session"], json!({ "id": "s1" }));
        assert_eq!(json["view"], json!({ "id": "v1" }));
        assert_eq!(json["source"], json!("flutter"));
        assert_eq!(json["has_full_snapshot"], json!(true));
        assert_eq!(json["records_count"], json!(1));
    }

    #[test]
    fn groups_consecutive_views_and_skips_garbage() {
        let events = vec![
            event(enriched("v1", 1, 2, true, 1)),
            event(enriched("v1", 3, 4, false, 1)),
            b"not json".to_vec(),
            event("{\"records\": 1}".to_string()),
            event(enriched("v2", 5, 6, true, 2)),
            event(enriched("v1", 7, 8, false, 1)),
        ];

        let segments = segments_from_batch(&events, "flutter");
        let views: Vec<&str> = segments.iter().map(|s| s.view.id.as_str()).collect();
        assert_eq!(views, vec!["v1", "v2", "v1"]);
        assert_eq!(segments[0].records_count, 2);
        assert_eq!(segments[1].records_count, 2);
    }
}
