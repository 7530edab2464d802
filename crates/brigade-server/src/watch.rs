//! Status watch fan-out.
//!
//! The API server publishes every committed Worker/Job status transition
//! to a per-workload broadcast channel; watch requests subscribe and
//! stream snapshots. Consecutive identical snapshots (by phase and
//! timestamps) are deduplicated, and a stream ends after it has emitted a
//! terminal snapshot.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use brigade_core::{EventId, WorkloadStatus};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey {
    event_id: EventId,
    job_name: Option<String>,
}

/// Fan-out hub for status updates.
#[derive(Debug, Default)]
pub struct StatusWatchHub {
    channels: Mutex<HashMap<WatchKey, broadcast::Sender<WorkloadStatus>>>,
}

impl StatusWatchHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&self, key: WatchKey) -> broadcast::Receiver<WorkloadStatus> {
        let mut channels = self.channels.lock().expect("watch hub lock poisoned");
        // Channels nobody listens to anymore are garbage; publish
        // recreates nothing, so prune them here.
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn publish(&self, key: WatchKey, status: &WorkloadStatus) {
        let sender = {
            let mut channels = self.channels.lock().expect("watch hub lock poisoned");
            if status.is_terminal() {
                // Terminal is the last word: drop the channel so streams
                // end after draining it.
                channels.remove(&key)
            } else {
                channels.get(&key).cloned()
            }
        };
        if let Some(sender) = sender {
            // No subscribers is fine.
            let _ = sender.send(status.clone());
        }
    }

    /// Publishes a committed Worker status.
    pub fn publish_worker(&self, event_id: EventId, status: &WorkloadStatus) {
        self.publish(
            WatchKey {
                event_id,
                job_name: None,
            },
            status,
        );
    }

    /// Publishes a committed Job status.
    pub fn publish_job(&self, event_id: EventId, job_name: &str, status: &WorkloadStatus) {
        self.publish(
            WatchKey {
                event_id,
                job_name: Some(job_name.to_string()),
            },
            status,
        );
    }

    /// Opens a Worker status watch. `current` is emitted first.
    ///
    /// Subscribe-then-read ordering matters: callers must capture
    /// `current` from the store *after* calling this, or pass a status
    /// read afterwards, to avoid missing a transition. The services read
    /// the status after subscribing.
    #[must_use]
    pub fn watch_worker(&self, event_id: EventId, current: WorkloadStatus) -> StatusWatch {
        self.watch(
            WatchKey {
                event_id,
                job_name: None,
            },
            current,
        )
    }

    /// Opens a Job status watch. `current` is emitted first.
    #[must_use]
    pub fn watch_job(
        &self,
        event_id: EventId,
        job_name: &str,
        current: WorkloadStatus,
    ) -> StatusWatch {
        self.watch(
            WatchKey {
                event_id,
                job_name: Some(job_name.to_string()),
            },
            current,
        )
    }

    fn watch(&self, key: WatchKey, current: WorkloadStatus) -> StatusWatch {
        let rx = if current.is_terminal() {
            // Already over; an unsubscribed receiver ends immediately
            // after the first emission.
            broadcast::channel(1).1
        } else {
            self.subscribe(key)
        };
        StatusWatch::new(current, rx)
    }

    /// Subscribes to a Worker's future updates without capturing the
    /// current status. Callers read the status *after* subscribing and
    /// build the stream with [`StatusWatch::new`], so no transition can
    /// fall between the two.
    #[must_use]
    pub fn subscribe_worker(&self, event_id: EventId) -> broadcast::Receiver<WorkloadStatus> {
        self.subscribe(WatchKey {
            event_id,
            job_name: None,
        })
    }

    /// Subscribes to a Job's future updates; see [`Self::subscribe_worker`].
    #[must_use]
    pub fn subscribe_job(
        &self,
        event_id: EventId,
        job_name: &str,
    ) -> broadcast::Receiver<WorkloadStatus> {
        self.subscribe(WatchKey {
            event_id,
            job_name: Some(job_name.to_string()),
        })
    }
}

/// A stream of status snapshots for one Worker or Job.
pub struct StatusWatch {
    first: Option<WorkloadStatus>,
    rx: broadcast::Receiver<WorkloadStatus>,
    last_emitted: Option<(
        brigade_core::Phase,
        Option<chrono::DateTime<chrono::Utc>>,
        Option<chrono::DateTime<chrono::Utc>>,
    )>,
    done: bool,
}

impl StatusWatch {
    /// Builds a stream that emits `current` first, then deduplicated
    /// updates from `rx`.
    #[must_use]
    pub fn new(current: WorkloadStatus, rx: broadcast::Receiver<WorkloadStatus>) -> Self {
        Self {
            first: Some(current),
            rx,
            last_emitted: None,
            done: false,
        }
    }

    /// Waits for the next deduplicated snapshot. Returns `None` once a
    /// terminal snapshot has been emitted or the hub dropped the channel.
    pub async fn next(&mut self) -> Option<WorkloadStatus> {
        if self.done {
            return None;
        }
        if let Some(first) = self.first.take() {
            return Some(self.emit(first));
        }
        loop {
            match self.rx.recv().await {
                Ok(status) => {
                    if self.last_emitted == Some(status.dedupe_key()) {
                        continue;
                    }
                    return Some(self.emit(status));
                }
                // Lagging skips intermediate snapshots, never the last
                // one: the terminal snapshot is the newest message.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    fn emit(&mut self, status: WorkloadStatus) -> WorkloadStatus {
        self.last_emitted = Some(status.dedupe_key());
        if status.is_terminal() {
            self.done = true;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brigade_core::Phase;
    use chrono::Utc;

    #[tokio::test]
    async fn first_emission_is_the_current_status() {
        let hub = StatusWatchHub::new();
        let event_id = EventId::generate();
        let mut watch = hub.watch_worker(event_id, WorkloadStatus::pending());

        let first = watch.next().await.unwrap();
        assert_eq!(first.phase, Phase::Pending);
    }

    #[tokio::test]
    async fn updates_flow_to_subscribers_in_order() {
        let hub = StatusWatchHub::new();
        let event_id = EventId::generate();
        let mut watch = hub.watch_worker(event_id, WorkloadStatus::pending());

        let starting = WorkloadStatus::with_phase(Phase::Starting);
        let running = starting
            .transition_to(Phase::Running, None, Utc::now())
            .unwrap();
        hub.publish_worker(event_id, &starting);
        hub.publish_worker(event_id, &running);

        assert_eq!(watch.next().await.unwrap().phase, Phase::Pending);
        assert_eq!(watch.next().await.unwrap().phase, Phase::Starting);
        assert_eq!(watch.next().await.unwrap().phase, Phase::Running);
    }

    #[tokio::test]
    async fn consecutive_identical_snapshots_are_suppressed() {
        let hub = StatusWatchHub::new();
        let event_id = EventId::generate();
        let mut watch = hub.watch_worker(event_id, WorkloadStatus::pending());

        let starting = WorkloadStatus::with_phase(Phase::Starting);
        hub.publish_worker(event_id, &starting);
        hub.publish_worker(event_id, &starting);
        let running = starting
            .transition_to(Phase::Running, None, Utc::now())
            .unwrap();
        hub.publish_worker(event_id, &running);

        assert_eq!(watch.next().await.unwrap().phase, Phase::Pending);
        assert_eq!(watch.next().await.unwrap().phase, Phase::Starting);
        // The duplicate STARTING is skipped.
        assert_eq!(watch.next().await.unwrap().phase, Phase::Running);
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_snapshot() {
        let hub = StatusWatchHub::new();
        let event_id = EventId::generate();
        let mut watch = hub.watch_worker(event_id, WorkloadStatus::with_phase(Phase::Running));

        let done = WorkloadStatus::with_phase(Phase::Running)
            .transition_to(Phase::Succeeded, None, Utc::now())
            .unwrap();
        hub.publish_worker(event_id, &done);

        assert_eq!(watch.next().await.unwrap().phase, Phase::Running);
        assert_eq!(watch.next().await.unwrap().phase, Phase::Succeeded);
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn watch_opened_on_terminal_status_emits_once_and_ends() {
        let hub = StatusWatchHub::new();
        let event_id = EventId::generate();
        let terminal = WorkloadStatus::with_phase(Phase::Running)
            .transition_to(Phase::Failed, None, Utc::now())
            .unwrap();

        let mut watch = hub.watch_worker(event_id, terminal);
        assert_eq!(watch.next().await.unwrap().phase, Phase::Failed);
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn worker_and_job_channels_are_distinct() {
        let hub = StatusWatchHub::new();
        let event_id = EventId::generate();
        let mut worker_watch = hub.watch_worker(event_id, WorkloadStatus::pending());
        let mut job_watch = hub.watch_job(event_id, "build", WorkloadStatus::pending());

        hub.publish_job(event_id, "build", &WorkloadStatus::with_phase(Phase::Starting));

        assert_eq!(worker_watch.next().await.unwrap().phase, Phase::Pending);
        assert_eq!(job_watch.next().await.unwrap().phase, Phase::Pending);
        assert_eq!(job_watch.next().await.unwrap().phase, Phase::Starting);

        // Nothing further arrives on the worker channel.
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), worker_watch.next()).await;
        assert!(nothing.is_err());
    }
}
