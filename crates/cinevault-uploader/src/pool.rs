//! Bounded worker pool for part transfers.
//!
//! Every part upload runs as a spawned task that first acquires a permit
//! from a global semaphore, so total in-flight transfers never exceed
//! `max_concurrent_parts` across all sessions. Workers own the full
//! attempt/backoff loop for their part and report a single final
//! [`PartEvent`] back to the session coordinator; they never touch session
//! state directly.
//!
//! A per-session `CancellationToken` gate covers the two interruptible
//! phases: waiting for a permit and sleeping out a backoff. A part whose
//! gate fires in either phase is *shelved*, returned to the coordinator as
//! still pending. An upload call already on the wire runs to its timeout.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use cinevault_core::{ByteRange, UploaderConfig};
use cinevault_storage::StorageClient;

use crate::retry::{RetryDecision, RetryPolicy};
use crate::source::ByteSource;

/// Final result of a worker's attempt loop for one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartOutcome {
    /// The part (or single-shot object) was uploaded.
    Done {
        etag: String,
        bytes: u64,
        attempts: u32,
    },
    /// The part exhausted its retry budget or hit a fatal error.
    Failed { reason: String, attempts: u32 },
    /// The session's gate fired before the next attempt started; the part
    /// goes back to pending with its attempt count intact.
    Shelved { attempts: u32 },
}

/// One worker's report to its session coordinator.
#[derive(Debug, Clone)]
pub struct PartEvent {
    pub session_id: Uuid,
    pub part_number: u32,
    pub outcome: PartOutcome,
}

/// A part transfer handed to the pool.
///
/// `upload_id` is `None` for single-shot uploads, which use a plain
/// `put_object` instead of the multipart API.
pub struct PartUpload {
    pub session_id: Uuid,
    pub object_key: String,
    pub content_type: String,
    pub upload_id: Option<String>,
    pub part_number: u32,
    pub range: ByteRange,
    /// Attempts already consumed in earlier dispatches of this part.
    pub attempts: u32,
    pub source: Arc<dyn ByteSource>,
    pub storage: Arc<dyn StorageClient>,
    pub gate: CancellationToken,
    pub events: mpsc::Sender<PartEvent>,
}

/// Spawns part transfers, bounded by a global concurrency permit pool.
#[derive(Clone)]
pub struct TransferWorkerPool {
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
    part_timeout: Duration,
}

impl TransferWorkerPool {
    pub fn new(config: &UploaderConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_parts)),
            policy: RetryPolicy::from_config(config),
            part_timeout: config.part_timeout(),
        }
    }

    /// Number of permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawn a worker for `job`. Returns immediately; the worker reports
    /// through `job.events`.
    pub fn dispatch(&self, job: PartUpload) {
        let permits = Arc::clone(&self.permits);
        let policy = self.policy;
        let part_timeout = self.part_timeout;

        tokio::spawn(async move {
            let permit = tokio::select! {
                acquired = permits.acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    // Closed semaphore means the engine is shutting down.
                    Err(_) => {
                        send_event(&job, PartOutcome::Shelved { attempts: job.attempts }).await;
                        return;
                    }
                },
                _ = job.gate.cancelled() => {
                    debug!(
                        session_id = %job.session_id,
                        part = job.part_number,
                        "part shelved while waiting for permit"
                    );
                    send_event(&job, PartOutcome::Shelved { attempts: job.attempts }).await;
                    return;
                }
            };

            let outcome = run_part(&job, policy, part_timeout).await;
            drop(permit);
            send_event(&job, outcome).await;
        });
    }
}

async fn send_event(job: &PartUpload, outcome: PartOutcome) {
    // The coordinator may already be gone after a cancel; nothing to do then.
    let _ = job
        .events
        .send(PartEvent {
            session_id: job.session_id,
            part_number: job.part_number,
            outcome,
        })
        .await;
}

/// Attempt loop for one part. Runs with a permit held.
async fn run_part(job: &PartUpload, policy: RetryPolicy, part_timeout: Duration) -> PartOutcome {
    let mut attempts = job.attempts;

    loop {
        if job.gate.is_cancelled() {
            return PartOutcome::Shelved { attempts };
        }
        attempts += 1;

        match attempt_transfer(job, part_timeout).await {
            Ok(etag) => {
                debug!(
                    session_id = %job.session_id,
                    part = job.part_number,
                    bytes = job.range.length,
                    attempt = attempts,
                    "part uploaded"
                );
                return PartOutcome::Done {
                    etag,
                    bytes: job.range.length,
                    attempts,
                };
            }
            Err(error) => match policy.decide(attempts, &error) {
                RetryDecision::GiveUp => {
                    warn!(
                        session_id = %job.session_id,
                        part = job.part_number,
                        attempt = attempts,
                        error = %error,
                        "part failed"
                    );
                    return PartOutcome::Failed {
                        reason: error.to_string(),
                        attempts,
                    };
                }
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        session_id = %job.session_id,
                        part = job.part_number,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "part attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = job.gate.cancelled() => {
                            return PartOutcome::Shelved { attempts };
                        }
                    }
                }
            },
        }
    }
}

/// One read-then-upload attempt.
async fn attempt_transfer(
    job: &PartUpload,
    part_timeout: Duration,
) -> Result<String, cinevault_storage::StorageError> {
    let data: Bytes = job.source.read_range(job.range).await?;

    let upload = async {
        match &job.upload_id {
            Some(upload_id) => {
                job.storage
                    .upload_part(&job.object_key, upload_id, job.part_number, data)
                    .await
            }
            None => {
                job.storage
                    .put_object(&job.object_key, &job.content_type, data)
                    .await
            }
        }
    };

    match timeout(part_timeout, upload).await {
        Ok(result) => result,
        Err(_) => Err(cinevault_storage::StorageError::Timeout {
            op: if job.upload_id.is_some() {
                "upload_part"
            } else {
                "put_object"
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use async_trait::async_trait;
    use cinevault_storage::{CompletedPartRef, MemoryStorage, StorageError, StorageResult};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Delegates to [`MemoryStorage`] but fails the first `failures`
    /// `upload_part` calls with a transient error.
    struct FlakyStorage {
        inner: MemoryStorage,
        failures: AtomicU32,
    }

    impl FlakyStorage {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStorage::new(),
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl StorageClient for FlakyStorage {
        async fn initiate(&self, object_key: &str, content_type: &str) -> StorageResult<String> {
            self.inner.initiate(object_key, content_type).await
        }

        async fn upload_part(
            &self,
            object_key: &str,
            upload_id: &str,
            part_number: u32,
            data: Bytes,
        ) -> StorageResult<String> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Transient {
                    op: "upload_part",
                    message: "InternalError".into(),
                });
            }
            self.inner
                .upload_part(object_key, upload_id, part_number, data)
                .await
        }

        async fn complete(
            &self,
            object_key: &str,
            upload_id: &str,
            parts: &[CompletedPartRef],
        ) -> StorageResult<()> {
            self.inner.complete(object_key, upload_id, parts).await
        }

        async fn abort(&self, object_key: &str, upload_id: &str) -> StorageResult<()> {
            self.inner.abort(object_key, upload_id).await
        }

        async fn put_object(
            &self,
            object_key: &str,
            content_type: &str,
            data: Bytes,
        ) -> StorageResult<String> {
            self.inner.put_object(object_key, content_type, data).await
        }

        async fn head_object(&self, object_key: &str) -> StorageResult<u64> {
            self.inner.head_object(object_key).await
        }
    }

    fn test_config() -> UploaderConfig {
        UploaderConfig {
            retry_base_delay_ms: 5,
            retry_max_delay_ms: 20,
            ..Default::default()
        }
    }

    fn job(
        storage: Arc<dyn StorageClient>,
        upload_id: Option<String>,
        events: mpsc::Sender<PartEvent>,
        gate: CancellationToken,
    ) -> PartUpload {
        PartUpload {
            session_id: Uuid::new_v4(),
            object_key: "raw/movie.mp4".into(),
            content_type: "video/mp4".into(),
            upload_id,
            part_number: 1,
            range: ByteRange::new(0, 8),
            attempts: 0,
            source: Arc::new(MemorySource::new(Bytes::from_static(b"01234567"))),
            storage,
            gate,
            events,
        }
    }

    #[tokio::test]
    async fn uploads_part_and_reports_done() {
        let storage = Arc::new(MemoryStorage::new());
        let upload_id = storage.initiate("raw/movie.mp4", "video/mp4").await.unwrap();
        let pool = TransferWorkerPool::new(&test_config());
        let (tx, mut rx) = mpsc::channel(4);

        pool.dispatch(job(storage, Some(upload_id), tx, CancellationToken::new()));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.part_number, 1);
        match event.outcome {
            PartOutcome::Done {
                bytes, attempts, ..
            } => {
                assert_eq!(bytes, 8);
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_before_success() {
        let storage = Arc::new(FlakyStorage::new(2));
        let upload_id = storage.initiate("raw/movie.mp4", "video/mp4").await.unwrap();
        let pool = TransferWorkerPool::new(&test_config());
        let (tx, mut rx) = mpsc::channel(4);

        pool.dispatch(job(storage, Some(upload_id), tx, CancellationToken::new()));

        let event = rx.recv().await.unwrap();
        match event.outcome {
            PartOutcome::Done { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_attempts_report_failed() {
        let storage = Arc::new(FlakyStorage::new(u32::MAX));
        let upload_id = storage.initiate("raw/movie.mp4", "video/mp4").await.unwrap();
        let config = UploaderConfig {
            max_attempts: 3,
            ..test_config()
        };
        let pool = TransferWorkerPool::new(&config);
        let (tx, mut rx) = mpsc::channel(4);

        pool.dispatch(job(storage, Some(upload_id), tx, CancellationToken::new()));

        let event = rx.recv().await.unwrap();
        match event.outcome {
            PartOutcome::Failed { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("InternalError"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_gate_shelves_without_consuming_attempts() {
        let storage = Arc::new(MemoryStorage::new());
        let upload_id = storage.initiate("raw/movie.mp4", "video/mp4").await.unwrap();
        let pool = TransferWorkerPool::new(&test_config());
        let (tx, mut rx) = mpsc::channel(4);

        let gate = CancellationToken::new();
        gate.cancel();
        pool.dispatch(job(storage, Some(upload_id), tx, gate));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.outcome, PartOutcome::Shelved { attempts: 0 });
    }

    #[tokio::test]
    async fn single_shot_uses_put_object() {
        let storage = Arc::new(MemoryStorage::new());
        let pool = TransferWorkerPool::new(&test_config());
        let (tx, mut rx) = mpsc::channel(4);

        pool.dispatch(job(
            Arc::clone(&storage) as Arc<dyn StorageClient>,
            None,
            tx,
            CancellationToken::new(),
        ));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.outcome, PartOutcome::Done { .. }));
        assert_eq!(
            storage.object("raw/movie.mp4").await.unwrap(),
            Bytes::from_static(b"01234567")
        );
    }

    /// A storage double that records the peak number of concurrent
    /// `upload_part` calls.
    struct ConcurrencyProbe {
        inner: MemoryStorage,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl StorageClient for ConcurrencyProbe {
        async fn initiate(&self, object_key: &str, content_type: &str) -> StorageResult<String> {
            self.inner.initiate(object_key, content_type).await
        }

        async fn upload_part(
            &self,
            object_key: &str,
            upload_id: &str,
            part_number: u32,
            data: Bytes,
        ) -> StorageResult<String> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.inner
                .upload_part(object_key, upload_id, part_number, data)
                .await
        }

        async fn complete(
            &self,
            object_key: &str,
            upload_id: &str,
            parts: &[CompletedPartRef],
        ) -> StorageResult<()> {
            self.inner.complete(object_key, upload_id, parts).await
        }

        async fn abort(&self, object_key: &str, upload_id: &str) -> StorageResult<()> {
            self.inner.abort(object_key, upload_id).await
        }

        async fn put_object(
            &self,
            object_key: &str,
            content_type: &str,
            data: Bytes,
        ) -> StorageResult<String> {
            self.inner.put_object(object_key, content_type, data).await
        }

        async fn head_object(&self, object_key: &str) -> StorageResult<u64> {
            self.inner.head_object(object_key).await
        }
    }

    #[tokio::test]
    async fn global_permit_bounds_concurrency() {
        let storage = Arc::new(ConcurrencyProbe {
            inner: MemoryStorage::new(),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let upload_id = storage.initiate("raw/movie.mp4", "video/mp4").await.unwrap();
        let config = UploaderConfig {
            max_concurrent_parts: 2,
            session_concurrency: 2,
            ..test_config()
        };
        let pool = TransferWorkerPool::new(&config);
        let (tx, mut rx) = mpsc::channel(16);

        let data = Bytes::from(vec![7u8; 48]);
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(data));
        let gate = CancellationToken::new();
        for part_number in 1..=6u32 {
            pool.dispatch(PartUpload {
                session_id: Uuid::new_v4(),
                object_key: "raw/movie.mp4".into(),
                content_type: "video/mp4".into(),
                upload_id: Some(upload_id.clone()),
                part_number,
                range: ByteRange::new(u64::from(part_number - 1) * 8, 8),
                attempts: 0,
                source: Arc::clone(&source),
                storage: Arc::clone(&storage) as Arc<dyn StorageClient>,
                gate: gate.clone(),
                events: tx.clone(),
            });
        }
        drop(tx);

        let mut done = 0;
        while let Some(event) = rx.recv().await {
            assert!(matches!(event.outcome, PartOutcome::Done { .. }));
            done += 1;
        }
        assert_eq!(done, 6);
        assert!(storage.peak.load(Ordering::SeqCst) <= 2);
        // Every worker returned its permit.
        assert_eq!(pool.available_permits(), 2);
    }
}
