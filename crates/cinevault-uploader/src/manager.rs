//! Session registry and public entry point.
//!
//! [`UploadManager`] validates and plans new uploads, spawns one coordinator
//! actor per session, and routes lifecycle calls to the right actor. It
//! holds no transfer state itself; a session's truth lives in its actor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use cinevault_core::{
    ChunkPlanner, PartState, PlanError, ProgressSnapshot, UploadCompleted, UploadError,
    UploadSession, UploaderConfig,
};
use cinevault_storage::StorageClient;

use crate::broadcast::ProgressBroadcaster;
use crate::coordinator::{self, SessionActorArgs, SessionHandle};
use crate::pool::TransferWorkerPool;
use crate::source::ByteSource;

/// Parameters for a new upload session.
pub struct NewUpload {
    pub source: Arc<dyn ByteSource>,
    /// Destination path in the bucket, e.g. `raw/{uuid}/master.mp4`.
    pub object_key: String,
    pub content_type: String,
    /// Declared size; must match the source's actual length.
    pub total_bytes: u64,
}

/// Creates, tracks, and drives upload sessions.
pub struct UploadManager {
    config: UploaderConfig,
    storage: Arc<dyn StorageClient>,
    pool: TransferWorkerPool,
    broadcaster: Arc<ProgressBroadcaster>,
    completions: broadcast::Sender<UploadCompleted>,
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
}

impl UploadManager {
    pub fn new(storage: Arc<dyn StorageClient>, config: UploaderConfig) -> Self {
        let pool = TransferWorkerPool::new(&config);
        let broadcaster = Arc::new(ProgressBroadcaster::new(
            config.snapshot_interval(),
            config.broadcast_capacity,
        ));
        let (completions, _) = broadcast::channel(config.broadcast_capacity);
        Self {
            config,
            storage,
            pool,
            broadcaster,
            completions,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Validate, plan, and register a new session. The session starts in
    /// `Pending`; no bytes move until [`start`](Self::start).
    pub async fn create_session(&self, upload: NewUpload) -> Result<Uuid, UploadError> {
        if !self.config.content_type_allowed(&upload.content_type) {
            return Err(UploadError::UnsupportedContentType(upload.content_type));
        }
        if upload.total_bytes > self.config.max_file_size {
            return Err(UploadError::FileTooLarge {
                total_bytes: upload.total_bytes,
                max_bytes: self.config.max_file_size,
            });
        }
        if upload.total_bytes != upload.source.len() {
            return Err(UploadError::Plan(PlanError::InvalidParameters(format!(
                "declared size {} does not match source length {}",
                upload.total_bytes,
                upload.source.len()
            ))));
        }

        let part_size = self.config.effective_part_size();
        let plan = ChunkPlanner::plan(upload.total_bytes, part_size, self.config.max_part_count)?;
        let single_shot = ChunkPlanner::single_shot(upload.total_bytes, part_size);

        let parts = plan
            .ranges
            .iter()
            .enumerate()
            .map(|(i, range)| PartState::new(i as u32 + 1, *range))
            .collect();
        let session = UploadSession::new(
            upload.object_key,
            upload.content_type,
            upload.total_bytes,
            plan.part_size,
            parts,
        );
        let session_id = session.id;

        info!(
            session_id = %session_id,
            object_key = %session.object_key,
            total_bytes = session.total_bytes,
            parts = session.part_count(),
            single_shot,
            "session created"
        );

        let handle = coordinator::spawn(SessionActorArgs {
            session,
            single_shot,
            config: self.config.clone(),
            source: upload.source,
            storage: Arc::clone(&self.storage),
            pool: self.pool.clone(),
            broadcaster: Arc::clone(&self.broadcaster),
            completions: self.completions.clone(),
        });
        self.sessions.lock().unwrap().insert(session_id, handle);
        Ok(session_id)
    }

    /// Begin transferring. Valid only from `Pending`.
    pub async fn start(&self, session_id: Uuid) -> Result<(), UploadError> {
        self.handle(session_id)?.start().await
    }

    /// Stop dispatching new parts; in-flight parts finish and count.
    pub async fn pause(&self, session_id: Uuid) -> Result<(), UploadError> {
        self.handle(session_id)?.pause().await
    }

    /// Continue a paused session from its recorded part states.
    pub async fn resume(&self, session_id: Uuid) -> Result<(), UploadError> {
        self.handle(session_id)?.resume().await
    }

    /// Abort the session and discard provider-side partial state.
    pub async fn cancel(&self, session_id: Uuid) -> Result<(), UploadError> {
        self.handle(session_id)?.cancel().await
    }

    /// Current progress snapshot, straight from the session actor.
    pub async fn status(&self, session_id: Uuid) -> Result<ProgressSnapshot, UploadError> {
        self.handle(session_id)?.snapshot().await
    }

    /// Observe a session's rate-limited progress stream.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<ProgressSnapshot> {
        self.broadcaster.subscribe(session_id)
    }

    /// Observe the exactly-once completion event of every session.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<UploadCompleted> {
        self.completions.subscribe()
    }

    /// Drop a terminal session from the registry and release its progress
    /// channel. Active sessions cannot be removed.
    pub async fn remove_session(&self, session_id: Uuid) -> Result<(), UploadError> {
        let snapshot = self.status(session_id).await?;
        if !snapshot.is_terminal() {
            return Err(UploadError::InvalidTransition {
                from: format!("{:?}", snapshot.status).to_lowercase(),
                to: "removed".to_string(),
            });
        }
        self.sessions.lock().unwrap().remove(&session_id);
        self.broadcaster.remove(session_id);
        Ok(())
    }

    fn handle(&self, session_id: Uuid) -> Result<SessionHandle, UploadError> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or(UploadError::SessionNotFound(session_id))
    }
}
