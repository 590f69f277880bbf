//! Cinevault Uploader Library
//!
//! The transfer engine: plans are executed by a bounded worker pool with
//! per-part retry/backoff, a per-session coordinator actor owns all session
//! state, and observers receive rate-limited progress snapshots plus an
//! exactly-once completion event per finished upload.
//!
//! Entry point is [`UploadManager`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use cinevault_core::UploaderConfig;
//! use cinevault_storage::MemoryStorage;
//! use cinevault_uploader::{NewUpload, UploadManager};
//! use cinevault_uploader::source::MemorySource;
//!
//! # async fn demo() -> Result<(), cinevault_core::UploadError> {
//! let manager = UploadManager::new(Arc::new(MemoryStorage::new()), UploaderConfig::default());
//! let source = Arc::new(MemorySource::new(vec![0u8; 1024].into()));
//! let id = manager
//!     .create_session(NewUpload {
//!         source,
//!         object_key: "raw/movie.mp4".into(),
//!         content_type: "video/mp4".into(),
//!         total_bytes: 1024,
//!     })
//!     .await?;
//! let mut progress = manager.subscribe(id);
//! manager.start(id).await?;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
mod coordinator;
pub mod manager;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod source;

// Re-export commonly used types
pub use broadcast::ProgressBroadcaster;
pub use cinevault_core::{ProgressSnapshot, SessionStatus, UploadCompleted, UploadError};
pub use manager::{NewUpload, UploadManager};
pub use pool::TransferWorkerPool;
pub use retry::{RetryDecision, RetryPolicy};
pub use source::{ByteSource, FileSource, MemorySource};
