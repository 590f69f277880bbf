//! Per-session coordinator actor.
//!
//! Each upload session is owned by exactly one actor task. All mutations of
//! the [`UploadSession`] happen on this task: lifecycle commands arrive on a
//! command channel, workers report part results on an event channel, and a
//! wall-clock tick refreshes speed/ETA while uploading. Single-writer
//! ownership means no locks around session state and no torn snapshots.
//!
//! Pause and cancel work through a per-generation `CancellationToken` gate:
//! cancelling the current token makes queued and backing-off workers shelve
//! their parts, while resume installs a fresh token and re-dispatches
//! whatever is pending. Part results that arrive after the session reached a
//! terminal state are discarded.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use cinevault_core::{
    ProgressSnapshot, SessionStatus, UploadCompleted, UploadError, UploadSession, UploaderConfig,
};
use cinevault_storage::{CompletedPartRef, StorageClient};

use crate::broadcast::ProgressBroadcaster;
use crate::pool::{PartEvent, PartOutcome, PartUpload, TransferWorkerPool};
use crate::progress::ProgressAggregator;
use crate::source::ByteSource;

pub(crate) enum SessionCommand {
    Start(oneshot::Sender<Result<(), UploadError>>),
    Pause(oneshot::Sender<Result<(), UploadError>>),
    Resume(oneshot::Sender<Result<(), UploadError>>),
    Cancel(oneshot::Sender<Result<(), UploadError>>),
    Query(oneshot::Sender<ProgressSnapshot>),
}

/// Manager-side handle to one session actor. Dropping the last handle stops
/// the actor after it drains its queue.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    session_id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) async fn start(&self) -> Result<(), UploadError> {
        self.request(SessionCommand::Start).await
    }

    pub(crate) async fn pause(&self) -> Result<(), UploadError> {
        self.request(SessionCommand::Pause).await
    }

    pub(crate) async fn resume(&self) -> Result<(), UploadError> {
        self.request(SessionCommand::Resume).await
    }

    pub(crate) async fn cancel(&self) -> Result<(), UploadError> {
        self.request(SessionCommand::Cancel).await
    }

    pub(crate) async fn snapshot(&self) -> Result<ProgressSnapshot, UploadError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Query(tx))
            .await
            .map_err(|_| UploadError::SessionNotFound(self.session_id))?;
        rx.await
            .map_err(|_| UploadError::SessionNotFound(self.session_id))
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), UploadError>>) -> SessionCommand,
    ) -> Result<(), UploadError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| UploadError::SessionNotFound(self.session_id))?;
        rx.await
            .map_err(|_| UploadError::SessionNotFound(self.session_id))?
    }
}

pub(crate) struct SessionActorArgs {
    pub session: UploadSession,
    pub single_shot: bool,
    pub config: UploaderConfig,
    pub source: Arc<dyn ByteSource>,
    pub storage: Arc<dyn StorageClient>,
    pub pool: TransferWorkerPool,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub completions: broadcast::Sender<UploadCompleted>,
}

/// Spawn the actor task and return its handle.
pub(crate) fn spawn(args: SessionActorArgs) -> SessionHandle {
    let session_id = args.session.id;
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let event_capacity = (args.config.session_concurrency * 2).max(16);
    let (event_tx, event_rx) = mpsc::channel(event_capacity);

    let actor = SessionActor {
        session: args.session,
        single_shot: args.single_shot,
        config: args.config.clone(),
        source: args.source,
        storage: args.storage,
        pool: args.pool,
        broadcaster: args.broadcaster,
        completions: args.completions,
        aggregator: ProgressAggregator::new(args.config.speed_window()),
        gate: CancellationToken::new(),
        event_tx,
        in_flight: 0,
    };
    tokio::spawn(actor.run(cmd_rx, event_rx));

    SessionHandle {
        session_id,
        commands: cmd_tx,
    }
}

struct SessionActor {
    session: UploadSession,
    single_shot: bool,
    config: UploaderConfig,
    source: Arc<dyn ByteSource>,
    storage: Arc<dyn StorageClient>,
    pool: TransferWorkerPool,
    broadcaster: Arc<ProgressBroadcaster>,
    completions: broadcast::Sender<UploadCompleted>,
    aggregator: ProgressAggregator,
    /// Gate for the current dispatch generation; replaced on resume.
    gate: CancellationToken,
    event_tx: mpsc::Sender<PartEvent>,
    /// Parts dispatched to the pool that have not reported back yet.
    in_flight: usize,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut events: mpsc::Receiver<PartEvent>,
    ) {
        let mut tick = tokio::time::interval(self.config.snapshot_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Manager dropped the handle; stop and release workers.
                    None => break,
                },
                Some(event) = events.recv() => self.handle_part_event(event).await,
                _ = tick.tick(), if self.session.status == SessionStatus::Uploading => {
                    // Liveness guard: a session with pending parts but no
                    // in-flight workers has stalled, so dispatch again.
                    if self.in_flight == 0 && !self.session.pending_parts().is_empty() {
                        self.refill();
                    }
                    self.broadcaster.publish(self.snapshot());
                }
            }
        }
        self.gate.cancel();
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start(reply) => {
                let result = self.handle_start().await;
                let _ = reply.send(result);
            }
            SessionCommand::Pause(reply) => {
                let result = self.handle_pause();
                let _ = reply.send(result);
            }
            SessionCommand::Resume(reply) => {
                let result = self.handle_resume().await;
                let _ = reply.send(result);
            }
            SessionCommand::Cancel(reply) => {
                let result = self.handle_cancel().await;
                let _ = reply.send(result);
            }
            SessionCommand::Query(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn handle_start(&mut self) -> Result<(), UploadError> {
        if self.session.status != SessionStatus::Pending {
            return Err(self.invalid_transition("uploading"));
        }

        if !self.single_shot {
            match self
                .storage
                .initiate(&self.session.object_key, &self.session.content_type)
                .await
            {
                Ok(upload_id) => self.session.storage_upload_id = Some(upload_id),
                Err(error) => {
                    self.fail_session(format!("initiate failed: {error}")).await;
                    return Err(UploadError::Storage(error.to_string()));
                }
            }
        }

        info!(
            session_id = %self.session.id,
            object_key = %self.session.object_key,
            total_bytes = self.session.total_bytes,
            parts = self.session.part_count(),
            single_shot = self.single_shot,
            "upload started"
        );
        self.session.set_status(SessionStatus::Uploading);
        self.refill();
        self.broadcaster.publish_forced(self.snapshot());
        Ok(())
    }

    fn handle_pause(&mut self) -> Result<(), UploadError> {
        if self.session.status != SessionStatus::Uploading {
            return Err(self.invalid_transition("paused"));
        }

        // Queued and backing-off workers shelve; in-flight network calls
        // run to completion and their results are still accepted.
        self.gate.cancel();
        self.session.set_status(SessionStatus::Paused);
        self.aggregator.reset();
        info!(session_id = %self.session.id, "upload paused");
        self.broadcaster.publish_forced(self.snapshot());
        Ok(())
    }

    async fn handle_resume(&mut self) -> Result<(), UploadError> {
        if self.session.status != SessionStatus::Paused {
            return Err(self.invalid_transition("uploading"));
        }

        self.gate = CancellationToken::new();
        self.aggregator.reset();
        self.session.reset_failed_parts();
        self.session.set_status(SessionStatus::Uploading);
        info!(
            session_id = %self.session.id,
            pending = self.session.pending_parts().len(),
            "upload resumed"
        );

        // Everything may have finished while paused.
        if self.session.all_parts_done() && self.in_flight == 0 {
            self.finalize().await;
        } else {
            self.refill();
            self.broadcaster.publish_forced(self.snapshot());
        }
        Ok(())
    }

    async fn handle_cancel(&mut self) -> Result<(), UploadError> {
        // Cancelling a session that already ended is a no-op, not an error;
        // the terminal state stands and no second abort is issued.
        if self.session.status.is_terminal() {
            return Ok(());
        }

        self.gate.cancel();
        self.session.set_status(SessionStatus::Aborted);
        self.abort_remote().await;
        info!(session_id = %self.session.id, "upload cancelled");
        self.broadcaster.publish_forced(self.snapshot());
        Ok(())
    }

    async fn handle_part_event(&mut self, event: PartEvent) {
        self.in_flight = self.in_flight.saturating_sub(1);

        // A worker that straggled past a cancel or failure.
        if self.session.status.is_terminal() {
            return;
        }

        match event.outcome {
            PartOutcome::Done {
                etag,
                bytes,
                attempts,
            } => {
                self.session
                    .mark_part_done(event.part_number, etag, attempts);
                self.aggregator.record(bytes);

                if self.session.all_parts_done() && self.in_flight == 0 {
                    if self.session.status == SessionStatus::Uploading {
                        self.finalize().await;
                    }
                    // Paused with all parts done: finalize happens on resume.
                } else if self.session.status == SessionStatus::Uploading {
                    self.refill();
                    self.broadcaster.publish(self.snapshot());
                }
            }
            PartOutcome::Failed { reason, attempts } => {
                self.session.mark_part_failed(event.part_number, attempts);
                self.fail_session(format!(
                    "part {} failed after {} attempts: {}",
                    event.part_number, attempts, reason
                ))
                .await;
            }
            PartOutcome::Shelved { attempts } => {
                self.session.shelve_part(event.part_number);
                if let Some(part) = self.session.part_mut(event.part_number) {
                    part.attempts = attempts;
                }
                // Shelved against a stale gate after a quick pause/resume:
                // the part is pending again, so dispatch it on the new gate.
                if self.session.status == SessionStatus::Uploading {
                    self.refill();
                }
            }
        }
    }

    /// Dispatch pending parts up to the per-session concurrency ceiling.
    fn refill(&mut self) {
        while self.in_flight < self.config.session_concurrency {
            let Some(part_number) = self.session.pending_parts().first().copied() else {
                break;
            };
            let Some(part) = self.session.part(part_number) else {
                break;
            };
            let job = PartUpload {
                session_id: self.session.id,
                object_key: self.session.object_key.clone(),
                content_type: self.session.content_type.clone(),
                upload_id: self.session.storage_upload_id.clone(),
                part_number,
                range: part.range,
                attempts: part.attempts,
                source: Arc::clone(&self.source),
                storage: Arc::clone(&self.storage),
                gate: self.gate.clone(),
                events: self.event_tx.clone(),
            };
            self.session.mark_part_in_flight(part_number);
            self.in_flight += 1;
            self.pool.dispatch(job);
        }
    }

    /// Complete the upload: provider `complete` with retries for multipart,
    /// a size check against `head_object`, then the terminal `Completed`
    /// state and exactly one completion event.
    async fn finalize(&mut self) {
        self.session.set_status(SessionStatus::Completing);
        self.broadcaster.publish_forced(self.snapshot());

        if let Some(upload_id) = self.session.storage_upload_id.clone() {
            let Some(parts) = self.session.completed_parts() else {
                let failure = UploadError::Finalize {
                    reason: "not every part is done".to_string(),
                };
                self.fail_session(failure.to_string()).await;
                return;
            };
            let parts: Vec<CompletedPartRef> = parts
                .into_iter()
                .map(|(part_number, etag)| CompletedPartRef { part_number, etag })
                .collect();

            let mut attempt = 0;
            loop {
                attempt += 1;
                match self
                    .storage
                    .complete(&self.session.object_key, &upload_id, &parts)
                    .await
                {
                    Ok(()) => break,
                    Err(error) if error.is_transient() && attempt < self.config.finalize_attempts => {
                        warn!(
                            session_id = %self.session.id,
                            attempt,
                            error = %error,
                            "complete failed, retrying"
                        );
                        tokio::time::sleep(self.config.finalize_retry_delay()).await;
                    }
                    Err(error) => {
                        let failure = UploadError::Finalize {
                            reason: format!("complete failed: {error}"),
                        };
                        self.fail_session(failure.to_string()).await;
                        return;
                    }
                }
            }
        }

        // Size verification. A missing or erroring head is only a warning;
        // a contradicting size is a hard failure.
        match self.storage.head_object(&self.session.object_key).await {
            Ok(size) if size != self.session.total_bytes => {
                self.session.storage_upload_id = None;
                let failure = UploadError::Finalize {
                    reason: format!(
                        "stored object is {size} bytes, expected {}",
                        self.session.total_bytes
                    ),
                };
                self.fail_session(failure.to_string()).await;
                return;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(
                    session_id = %self.session.id,
                    object_key = %self.session.object_key,
                    error = %error,
                    "post-complete verification unavailable"
                );
            }
        }

        self.session.set_status(SessionStatus::Completed);
        info!(
            session_id = %self.session.id,
            object_key = %self.session.object_key,
            total_bytes = self.session.total_bytes,
            "upload completed"
        );
        self.broadcaster.publish_forced(self.snapshot());
        let _ = self.completions.send(UploadCompleted {
            session_id: self.session.id,
            object_key: self.session.object_key.clone(),
            total_bytes: self.session.total_bytes,
        });
    }

    async fn fail_session(&mut self, reason: String) {
        self.gate.cancel();
        warn!(
            session_id = %self.session.id,
            object_key = %self.session.object_key,
            reason = %reason,
            "upload failed"
        );
        self.session.failure = Some(reason);
        self.session.set_status(SessionStatus::Failed);
        self.abort_remote().await;
        self.broadcaster.publish_forced(self.snapshot());
    }

    /// Best-effort abort of the provider-side multipart upload so partial
    /// parts do not linger as billable garbage.
    async fn abort_remote(&mut self) {
        if let Some(upload_id) = self.session.storage_upload_id.take() {
            if let Err(error) = self
                .storage
                .abort(&self.session.object_key, &upload_id)
                .await
            {
                warn!(
                    session_id = %self.session.id,
                    object_key = %self.session.object_key,
                    error = %error,
                    "abort failed; upload may need provider-side cleanup"
                );
            }
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let bytes_done = if self.session.status == SessionStatus::Completed {
            self.session.total_bytes
        } else {
            self.session.bytes_done()
        };
        let percentage = if self.session.total_bytes == 0 {
            0.0
        } else {
            bytes_done as f64 / self.session.total_bytes as f64 * 100.0
        };
        let speed = match self.session.status {
            SessionStatus::Uploading | SessionStatus::Completing => {
                self.aggregator.speed_bytes_per_sec()
            }
            _ => 0.0,
        };
        let eta_seconds = self
            .aggregator
            .eta(self.session.total_bytes.saturating_sub(bytes_done))
            .filter(|_| self.session.status == SessionStatus::Uploading)
            .map(|eta| eta.as_secs());

        ProgressSnapshot {
            session_id: self.session.id,
            object_key: self.session.object_key.clone(),
            status: self.session.status,
            bytes_transferred: bytes_done,
            total_bytes: self.session.total_bytes,
            percentage,
            speed_bytes_per_sec: speed,
            eta_seconds,
            error: self.session.failure.clone(),
        }
    }

    fn invalid_transition(&self, to: &str) -> UploadError {
        UploadError::InvalidTransition {
            from: status_label(self.session.status).to_string(),
            to: to.to_string(),
        }
    }
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Pending => "pending",
        SessionStatus::Uploading => "uploading",
        SessionStatus::Paused => "paused",
        SessionStatus::Completing => "completing",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Aborted => "aborted",
    }
}
