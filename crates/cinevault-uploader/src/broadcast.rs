//! Progress broadcasting to subscribed observers.
//!
//! Each session gets a bounded `tokio::sync::broadcast` channel: delivery is
//! at-most-once per tick and best-effort, a lagging observer loses the
//! oldest snapshots instead of stalling the engine, and a disconnected
//! observer simply resubscribes. Emission is rate-limited per session;
//! terminal snapshots always go out so no observer misses the end state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use uuid::Uuid;

use cinevault_core::ProgressSnapshot;

struct SessionChannel {
    tx: broadcast::Sender<ProgressSnapshot>,
    last_emit: Option<Instant>,
}

/// Publishes [`ProgressSnapshot`]s to observers, at most one per
/// `min_interval` per session.
pub struct ProgressBroadcaster {
    min_interval: Duration,
    capacity: usize,
    channels: Mutex<HashMap<Uuid, SessionChannel>>,
}

impl ProgressBroadcaster {
    pub fn new(min_interval: Duration, capacity: usize) -> Self {
        Self {
            min_interval,
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a session's snapshots. Subscribing before the first
    /// snapshot (or re-subscribing after a disconnect) is always valid.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<ProgressSnapshot> {
        let mut channels = self.channels.lock().unwrap();
        let capacity = self.capacity;
        channels
            .entry(session_id)
            .or_insert_with(|| SessionChannel {
                tx: broadcast::channel(capacity).0,
                last_emit: None,
            })
            .tx
            .subscribe()
    }

    /// Publish a snapshot, subject to the per-session rate limit. Terminal
    /// snapshots bypass the limiter. Returns whether the snapshot was
    /// emitted.
    pub fn publish(&self, snapshot: ProgressSnapshot) -> bool {
        self.publish_inner(snapshot, false)
    }

    /// Publish regardless of the rate limiter. Used for lifecycle
    /// transitions (paused, resumed, completing) that observers must see.
    pub fn publish_forced(&self, snapshot: ProgressSnapshot) {
        self.publish_inner(snapshot, true);
    }

    fn publish_inner(&self, snapshot: ProgressSnapshot, force: bool) -> bool {
        let mut channels = self.channels.lock().unwrap();
        let capacity = self.capacity;
        let channel = channels
            .entry(snapshot.session_id)
            .or_insert_with(|| SessionChannel {
                tx: broadcast::channel(capacity).0,
                last_emit: None,
            });

        let now = Instant::now();
        if !force && !snapshot.is_terminal() {
            if let Some(last) = channel.last_emit {
                if now.duration_since(last) < self.min_interval {
                    return false;
                }
            }
        }
        channel.last_emit = Some(now);
        // No subscribers is fine; snapshots are best-effort.
        let _ = channel.tx.send(snapshot);
        true
    }

    /// Drop a session's channel once its observers are done with it.
    pub fn remove(&self, session_id: Uuid) {
        let mut channels = self.channels.lock().unwrap();
        channels.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinevault_core::SessionStatus;

    fn snapshot(session_id: Uuid, status: SessionStatus, bytes: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            session_id,
            object_key: "raw/movie.mp4".into(),
            status,
            bytes_transferred: bytes,
            total_bytes: 100,
            percentage: bytes as f64,
            speed_bytes_per_sec: 0.0,
            eta_seconds: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn rate_limiter_suppresses_rapid_snapshots() {
        let broadcaster = ProgressBroadcaster::new(Duration::from_millis(250), 8);
        let id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(id);

        assert!(broadcaster.publish(snapshot(id, SessionStatus::Uploading, 10)));
        assert!(!broadcaster.publish(snapshot(id, SessionStatus::Uploading, 20)));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.bytes_transferred, 10);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn terminal_snapshot_bypasses_rate_limit() {
        let broadcaster = ProgressBroadcaster::new(Duration::from_secs(60), 8);
        let id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(id);

        assert!(broadcaster.publish(snapshot(id, SessionStatus::Uploading, 10)));
        assert!(broadcaster.publish(snapshot(id, SessionStatus::Completed, 100)));

        assert_eq!(rx.recv().await.unwrap().bytes_transferred, 10);
        assert_eq!(
            rx.recv().await.unwrap().status,
            SessionStatus::Completed
        );
    }

    #[tokio::test]
    async fn forced_publish_bypasses_rate_limit() {
        let broadcaster = ProgressBroadcaster::new(Duration::from_secs(60), 8);
        let id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(id);

        assert!(broadcaster.publish(snapshot(id, SessionStatus::Uploading, 10)));
        broadcaster.publish_forced(snapshot(id, SessionStatus::Paused, 10));

        let _ = rx.recv().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().status, SessionStatus::Paused);
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest() {
        let broadcaster = ProgressBroadcaster::new(Duration::from_millis(0), 2);
        let id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(id);

        for i in 0..5 {
            broadcaster.publish_forced(snapshot(id, SessionStatus::Uploading, i));
        }

        // The channel holds only the newest two; the receiver first observes
        // the lag, then the surviving snapshots.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(rx.recv().await.unwrap().bytes_transferred, 3);
        assert_eq!(rx.recv().await.unwrap().bytes_transferred, 4);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let broadcaster = ProgressBroadcaster::new(Duration::from_millis(0), 8);
        let id = Uuid::new_v4();
        assert!(broadcaster.publish(snapshot(id, SessionStatus::Uploading, 1)));
        broadcaster.remove(id);
        assert!(broadcaster.publish(snapshot(id, SessionStatus::Uploading, 2)));
    }
}
