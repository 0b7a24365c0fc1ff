//! Segment writer with view-based batch boundaries.
//!
//! Records captured by the managed layer arrive already serialized, tagged with
//! the RUM view they belong to. [`SegmentWriter`] forwards them into the core's
//! scoped write path and asks the core to start a new batch every time the view
//! changes between two consecutive writes, so that one batch never mixes records
//! of different views.
//!
//! Writes are fire-and-forget: if the core is gone or the feature scope cannot
//! be resolved, the record is dropped without surfacing an error.

use crate::replay::segment::RecordWrapper;
use crate::replay::FEATURE_NAME;
use crate::telemetry::TelemetryCore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Default)]
struct WriterState {
    core: Option<Weak<dyn TelemetryCore>>,
    last_view_id: Option<String>,
}

/// Writes serialized replay records into the core.
///
/// The first write after construction never forces a new batch; afterwards a
/// new batch is forced exactly when the view id differs from the previous
/// write's view id. View id tracking happens for every write, including the
/// ones that end up dropped.
#[derive(Default)]
pub struct SegmentWriter {
    state: Mutex<WriterState>,
}

impl SegmentWriter {
    /// Creates an unbound writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds the writer to a core without extending the core's lifetime.
    ///
    /// Binding twice is a programmer error: debug builds panic, release builds
    /// log a warning and rebind.
    pub fn start_writing(&self, core: &Arc<dyn TelemetryCore>) {
        let mut state = self.lock();
        debug_assert!(state.core.is_none(), "SegmentWriter is already bound to a core");
        if state.core.is_some() {
            tracing::warn!("segment writer rebound to a new core");
        }
        state.core = Some(Arc::downgrade(core));
        tracing::debug!("segment writer started");
    }

    /// Returns `true` once [`start_writing`](Self::start_writing) was called.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.lock().core.is_some()
    }

    /// Returns the view id of the last write.
    #[must_use]
    pub fn last_view_id(&self) -> Option<String> {
        self.lock().last_view_id.clone()
    }

    /// Whether a write for `view_id` must start a new batch.
    fn forces_new_batch(last_view_id: Option<&str>, view_id: &str) -> bool {
        last_view_id.is_some_and(|last| last != view_id)
    }

    /// Writes one serialized record for the given view.
    ///
    /// Writing before [`start_writing`](Self::start_writing) is a programmer
    /// error: debug builds panic, release builds drop the record.
    pub fn write(&self, record: &str, view_id: &str) {
        let mut state = self.lock();

        let force_new_batch = Self::forces_new_batch(state.last_view_id.as_deref(), view_id);
        state.last_view_id = Some(view_id.to_string());

        debug_assert!(state.core.is_some(), "SegmentWriter::write called before start_writing");

        let Some(core) = state.core.as_ref().and_then(Weak::upgrade) else {
            tracing::trace!(view_id = %view_id, "core unavailable, record dropped");
            return;
        };
        let Some(scope) = core.scope(FEATURE_NAME) else {
            tracing::trace!(view_id = %view_id, "feature scope unavailable, record dropped");
            return;
        };

        let event = match serde_json::to_vec(&RecordWrapper::new(record)) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "failed to serialize record");
                return;
            }
        };

        tracing::trace!(view_id = %view_id, force_new_batch = force_new_batch, bytes = event.len(), "writing record");
        scope.event_write_context(
            false,
            force_new_batch,
            Box::new(move |_context, writer| writer.write(&event)),
        );
        drop(state);
    }
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SegmentWriter")
            .field("bound", &state.core.is_some())
            .field("last_view_id", &state.last_view_id)
            .finish()
    }
}
