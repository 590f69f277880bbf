//! Cinevault Storage Library
//!
//! This crate provides the object-storage abstraction consumed by the upload
//! engine: the [`StorageClient`] trait plus backends for S3-compatible
//! providers and an in-process memory store used by tests and local
//! development.
//!
//! All five multipart operations are idempotent-safe from the caller's
//! perspective: re-uploading a part with the same bytes is legal, and
//! aborting an upload that is already gone is not treated as fatal.

#[cfg(feature = "storage-memory")]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{CompletedPartRef, StorageClient, StorageError, StorageResult};
