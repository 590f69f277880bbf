//! Progress snapshot and completion event types.
//!
//! Snapshots are derived views, never the source of truth; they are
//! recomputed from the session on every part completion and on a wall-clock
//! tick while the session is uploading.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::session::SessionStatus;

/// A point-in-time view of one session's progress, delivered to observers
/// (e.g. an admin UI over WebSocket or SSE).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: Uuid,
    pub object_key: String,
    pub status: SessionStatus,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Percentage complete (0.0 - 100.0).
    pub percentage: f64,
    /// Instantaneous speed over a short sliding window, not a lifetime average.
    pub speed_bytes_per_sec: f64,
    /// Estimated seconds remaining; `None` when speed is zero.
    pub eta_seconds: Option<u64>,
    /// Failure reason, present on `Failed` terminal snapshots.
    pub error: Option<String>,
}

impl ProgressSnapshot {
    /// Whether this snapshot reports a terminal state. Terminal snapshots
    /// bypass the broadcaster's rate limiter.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Emitted exactly once per successfully completed session, for downstream
/// consumers such as a transcoding pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCompleted {
    pub session_id: Uuid,
    pub object_key: String,
    pub total_bytes: u64,
}
