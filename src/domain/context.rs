//! RUM context model.
//!
//! [`RumContext`] is the snapshot of session and view identity the telemetry core
//! publishes under the `"rum"` baggage key. It is a plain value type: two contexts
//! are the same notification if and only if all of their fields are equal.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot of the active RUM session and view.
///
/// An absent context (`Option::None` wherever it appears) means there is no
/// sampled RUM session and nothing should be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RumContext {
    /// RUM application the session belongs to.
    #[serde(rename = "applicationID")]
    pub application_id: String,

    /// Current RUM session.
    #[serde(rename = "sessionID")]
    pub session_id: String,

    /// Current RUM view, if a view is active.
    #[serde(rename = "viewID", default, skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,

    /// Offset between device and server time for the current view, in milliseconds.
    #[serde(
        rename = "viewServerTimeOffset",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub view_server_time_offset: Option<i64>,
}

impl RumContext {
    /// Baggage key under which the core publishes the RUM context.
    pub const KEY: &'static str = "rum";

    /// Creates a context for the given session and view.
    ///
    /// # Examples
    ///
    /// ```
    /// use replay_bridge::RumContext;
    ///
    /// let context = RumContext::new("app", "s1", Some("v1"));
    /// assert_eq!(context.session_id, "s1");
    /// assert_eq!(context.view_id.as_deref(), Some("v1"));
    /// ```
    pub fn new(
        application_id: impl Into<String>,
        session_id: impl Into<String>,
        view_id: Option<&str>,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            session_id: session_id.into(),
            view_id: view_id.map(String::from),
            view_server_time_offset: None,
        }
    }

    /// Sets the view server time offset.
    #[must_use]
    pub fn with_server_time_offset(mut self, offset: i64) -> Self {
        self.view_server_time_offset = Some(offset);
        self
    }

    /// Encodes the context as the argument map sent to the managed layer.
    ///
    /// Keys follow the camel-case naming of the method channel. Absent view
    /// fields are omitted rather than sent as `null`.
    #[must_use]
    pub fn encoded_for_channel(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "applicationId".to_string(),
            Value::from(self.application_id.clone()),
        );
        map.insert("sessionId".to_string(), Value::from(self.session_id.clone()));
        if let Some(view_id) = &self.view_id {
            map.insert("viewId".to_string(), Value::from(view_id.clone()));
        }
        if let Some(offset) = self.view_server_time_offset {
            map.insert("viewServerTimeOffset".to_string(), Value::from(offset));
        }
        map
    }
}
