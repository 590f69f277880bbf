//! Upload session and part state models.
//!
//! An [`UploadSession`] is the stateful record of one logical file transfer.
//! It is exclusively owned and mutated by the session coordinator; workers
//! report part results back through the coordinator's command channel and
//! never touch this state directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an upload session.
///
/// `Completed`, `Failed`, and `Aborted` are terminal: no further part
/// uploads are dispatched once one of them is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Uploading,
    Paused,
    Completing,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Aborted
        )
    }
}

/// State of a single part within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// A half-open byte range `[offset, offset + length)` within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Per-part upload state.
///
/// `part_number` is 1-based and matches the storage provider's part
/// numbering. The byte range is assigned once at planning time and never
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartState {
    pub part_number: u32,
    pub range: ByteRange,
    pub status: PartStatus,
    /// Opaque completion token returned by the provider; required to finalize.
    pub etag: Option<String>,
    /// Upload attempts so far, preserved across pause/resume for backoff context.
    pub attempts: u32,
}

impl PartState {
    pub fn new(part_number: u32, range: ByteRange) -> Self {
        Self {
            part_number,
            range,
            status: PartStatus::Pending,
            etag: None,
            attempts: 0,
        }
    }
}

/// The stateful record of one logical file transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,
    /// Destination path in the bucket.
    pub object_key: String,
    pub content_type: String,
    pub total_bytes: u64,
    pub part_size: u64,
    /// Handle returned by the provider's initiate call. `None` until
    /// initiated, and stays `None` for single-shot uploads.
    pub storage_upload_id: Option<String>,
    pub status: SessionStatus,
    pub parts: Vec<PartState>,
    /// Human-readable failure reason, set when the session fails.
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    pub fn new(
        object_key: String,
        content_type: String,
        total_bytes: u64,
        part_size: u64,
        parts: Vec<PartState>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            object_key,
            content_type,
            total_bytes,
            part_size,
            storage_upload_id: None,
            status: SessionStatus::Pending,
            parts,
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn part_count(&self) -> u32 {
        self.parts.len() as u32
    }

    /// Total bytes of all parts that have completed.
    pub fn bytes_done(&self) -> u64 {
        self.parts
            .iter()
            .filter(|p| p.status == PartStatus::Done)
            .map(|p| p.range.length)
            .sum()
    }

    pub fn all_parts_done(&self) -> bool {
        self.parts.iter().all(|p| p.status == PartStatus::Done)
    }

    /// Part numbers still waiting to be dispatched, in index order.
    pub fn pending_parts(&self) -> Vec<u32> {
        self.parts
            .iter()
            .filter(|p| p.status == PartStatus::Pending)
            .map(|p| p.part_number)
            .collect()
    }

    pub fn part(&self, part_number: u32) -> Option<&PartState> {
        self.parts.get(part_number.checked_sub(1)? as usize)
    }

    pub fn part_mut(&mut self, part_number: u32) -> Option<&mut PartState> {
        self.parts.get_mut(part_number.checked_sub(1)? as usize)
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn mark_part_in_flight(&mut self, part_number: u32) {
        if let Some(part) = self.part_mut(part_number) {
            part.status = PartStatus::InFlight;
        }
        self.updated_at = Utc::now();
    }

    pub fn mark_part_done(&mut self, part_number: u32, etag: String, attempts: u32) {
        if let Some(part) = self.part_mut(part_number) {
            part.status = PartStatus::Done;
            part.etag = Some(etag);
            part.attempts = attempts;
        }
        self.updated_at = Utc::now();
    }

    pub fn mark_part_failed(&mut self, part_number: u32, attempts: u32) {
        if let Some(part) = self.part_mut(part_number) {
            part.status = PartStatus::Failed;
            part.attempts = attempts;
        }
        self.updated_at = Utc::now();
    }

    /// Returns a part to `Pending` without consuming an attempt. Used when a
    /// queued worker shelves its part because the session paused or
    /// cancelled before the upload started.
    pub fn shelve_part(&mut self, part_number: u32) {
        if let Some(part) = self.part_mut(part_number) {
            if part.status == PartStatus::InFlight {
                part.status = PartStatus::Pending;
            }
        }
        self.updated_at = Utc::now();
    }

    /// Resets `Failed` parts to `Pending` for re-dispatch on resume.
    /// Attempt counters are preserved so backoff continues where it left off.
    pub fn reset_failed_parts(&mut self) {
        for part in &mut self.parts {
            if part.status == PartStatus::Failed {
                part.status = PartStatus::Pending;
            }
        }
        self.updated_at = Utc::now();
    }

    /// Ordered `(part_number, etag)` pairs for the provider's complete call.
    /// Returns `None` unless every part is `Done` with an etag.
    pub fn completed_parts(&self) -> Option<Vec<(u32, String)>> {
        let mut out = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            if part.status != PartStatus::Done {
                return None;
            }
            out.push((part.part_number, part.etag.clone()?));
        }
        Some(out)
    }
}
