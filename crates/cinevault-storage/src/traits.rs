//! Storage abstraction trait
//!
//! Defines the [`StorageClient`] operations the upload engine needs from an
//! object store, modeled on the S3 multipart API: initiate, upload-part,
//! complete, abort, plus single-shot put and head. Backends are injected as
//! `Arc<dyn StorageClient>` so the engine never couples to a concrete
//! provider and tests can substitute doubles.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage operation errors, classified for the retry policy.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{op} timed out")]
    Timeout { op: &'static str },

    #[error("{op}: connection error: {message}")]
    Connection { op: &'static str, message: String },

    #[error("{op}: throttled by provider ({message})")]
    Throttled { op: &'static str, message: String },

    #[error("{op}: transient service error: {message}")]
    Transient { op: &'static str, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid part: {0}")]
    InvalidPart(String),

    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{op} failed: {message}")]
    Other { op: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the retry policy may retry the failed operation.
    ///
    /// Timeouts, connection faults, throttling, 5xx-style service errors,
    /// and IO hiccups are retryable; authorization failures, missing
    /// buckets/uploads, and checksum/part mismatches are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout { .. }
                | StorageError::Connection { .. }
                | StorageError::Throttled { .. }
                | StorageError::Transient { .. }
                | StorageError::Io(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// An `(part_number, etag)` pair handed to [`StorageClient::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartRef {
    pub part_number: u32,
    pub etag: String,
}

/// Object-storage operations required by the upload engine.
///
/// Part numbers are 1-based. `upload_part` must be safe to re-invoke for
/// the same part number with the same bytes; `abort` on an already-aborted
/// or already-completed upload returns `Ok`.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Open a multipart upload and return the provider's upload id.
    async fn initiate(&self, object_key: &str, content_type: &str) -> StorageResult<String>;

    /// Upload one part and return its etag.
    async fn upload_part(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Finalize a multipart upload. `parts` must be in ascending
    /// part-number order and cover every uploaded part.
    async fn complete(
        &self,
        object_key: &str,
        upload_id: &str,
        parts: &[CompletedPartRef],
    ) -> StorageResult<()>;

    /// Abandon a multipart upload, discarding any uploaded parts.
    async fn abort(&self, object_key: &str, upload_id: &str) -> StorageResult<()>;

    /// Single-shot upload for payloads below the multipart threshold.
    /// Returns the object's etag.
    async fn put_object(
        &self,
        object_key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Size in bytes of an existing object, or `NotFound`.
    async fn head_object(&self, object_key: &str) -> StorageResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transience_classification() {
        assert!(StorageError::Timeout { op: "upload_part" }.is_transient());
        assert!(StorageError::Throttled {
            op: "upload_part",
            message: "SlowDown".into()
        }
        .is_transient());
        assert!(StorageError::Io(std::io::Error::other("reset")).is_transient());

        assert!(!StorageError::Unauthorized("AccessDenied".into()).is_transient());
        assert!(!StorageError::NotFound("raw/movie.mp4".into()).is_transient());
        assert!(!StorageError::InvalidPart("BadDigest".into()).is_transient());
        assert!(!StorageError::Config("missing bucket".into()).is_transient());
    }
}
