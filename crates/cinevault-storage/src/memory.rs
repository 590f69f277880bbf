//! In-process storage backend.
//!
//! Implements the full [`StorageClient`] contract against process memory:
//! multipart uploads are tracked by upload id, parts are buffered by part
//! number, and `complete` validates etags and ordering before assembling
//! the final object. Used by the engine's tests and for local development
//! without an S3 endpoint.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::traits::{CompletedPartRef, StorageClient, StorageError, StorageResult};

#[derive(Debug, Clone)]
struct StoredObject {
    content_type: String,
    data: Bytes,
}

#[derive(Debug)]
struct MultipartState {
    object_key: String,
    content_type: String,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, MultipartState>,
}

/// In-memory object store.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<State>>,
}

/// Content-derived etag so that re-uploading identical bytes yields the
/// same token, matching provider idempotency.
fn compute_etag(data: &[u8]) -> String {
    // FNV-1a, enough for an opaque fixture token.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("\"{:016x}\"", hash)
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stored object's bytes, if present. Test/diagnostic helper.
    pub async fn object(&self, object_key: &str) -> Option<Bytes> {
        let state = self.inner.lock().await;
        state.objects.get(object_key).map(|o| o.data.clone())
    }

    /// Returns a stored object's content type, if present.
    pub async fn object_content_type(&self, object_key: &str) -> Option<String> {
        let state = self.inner.lock().await;
        state
            .objects
            .get(object_key)
            .map(|o| o.content_type.clone())
    }

    /// Number of multipart uploads that were initiated but neither
    /// completed nor aborted. Zero after a clean lifecycle.
    pub async fn open_upload_count(&self) -> usize {
        let state = self.inner.lock().await;
        state.uploads.len()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn initiate(&self, object_key: &str, content_type: &str) -> StorageResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        let mut state = self.inner.lock().await;
        state.uploads.insert(
            upload_id.clone(),
            MultipartState {
                object_key: object_key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _object_key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        if part_number == 0 {
            return Err(StorageError::InvalidPart(
                "part numbers are 1-based".to_string(),
            ));
        }
        let etag = compute_etag(&data);
        let mut state = self.inner.lock().await;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;
        // Re-uploading the same part number replaces the previous bytes.
        upload.parts.insert(part_number, (data, etag.clone()));
        Ok(etag)
    }

    async fn complete(
        &self,
        object_key: &str,
        upload_id: &str,
        parts: &[CompletedPartRef],
    ) -> StorageResult<()> {
        let mut state = self.inner.lock().await;
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;

        if parts.is_empty() {
            return Err(StorageError::InvalidPart(
                "complete requires at least one part".to_string(),
            ));
        }

        let mut assembled = BytesMut::new();
        let mut previous = 0u32;
        for part in parts {
            if part.part_number <= previous {
                return Err(StorageError::InvalidPart(format!(
                    "part numbers must be ascending, got {} after {}",
                    part.part_number, previous
                )));
            }
            previous = part.part_number;

            let (data, etag) = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::InvalidPart(format!("part {} was never uploaded", part.part_number))
            })?;
            if etag != &part.etag {
                return Err(StorageError::InvalidPart(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            assembled.extend_from_slice(data);
        }

        let content_type = upload.content_type.clone();
        let key = upload.object_key.clone();
        debug_assert_eq!(key, object_key);

        state.uploads.remove(upload_id);
        state.objects.insert(
            key,
            StoredObject {
                content_type,
                data: assembled.freeze(),
            },
        );
        Ok(())
    }

    async fn abort(&self, _object_key: &str, upload_id: &str) -> StorageResult<()> {
        // Aborting an unknown (already aborted or completed) upload is fine.
        let mut state = self.inner.lock().await;
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn put_object(
        &self,
        object_key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<String> {
        let etag = compute_etag(&data);
        let mut state = self.inner.lock().await;
        state.objects.insert(
            object_key.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                data,
            },
        );
        Ok(etag)
    }

    async fn head_object(&self, object_key: &str) -> StorageResult<u64> {
        let state = self.inner.lock().await;
        state
            .objects
            .get(object_key)
            .map(|o| o.data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(object_key.to_string()))
    }
}
