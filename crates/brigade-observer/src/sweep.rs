//! The timeout sweep: forces `TIMED_OUT` on work that outlived its
//! declared budget.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::watch;

use brigade_client::{EventsClient as _, JobsClient as _, WorkersClient as _};
use brigade_core::{Event, EventSelector};

use crate::metrics_names;
use crate::Observer;

fn deadline_passed(
    started_at: Option<DateTime<Utc>>,
    timeout_seconds: Option<u64>,
    now: DateTime<Utc>,
) -> bool {
    let (Some(started_at), Some(timeout_seconds)) = (started_at, timeout_seconds) else {
        // Work with no declared timeout is never swept; work that has
        // not started cannot have outlived anything.
        return false;
    };
    let Some(budget) = i64::try_from(timeout_seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
    else {
        // A budget too large to represent never elapses.
        return false;
    };
    now >= started_at + budget
}

impl Observer {
    pub(crate) async fn timeout_sweep_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.timeout_sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.clone().sweep_timeouts(Utc::now()).await {
                // Transient; the next tick sweeps again.
                tracing::warn!(error = %err, "timeout sweep failed");
            }
        }
    }

    /// One sweep pass: times out every non-terminal Worker and Job whose
    /// `started_at` plus declared timeout has passed as of `now`.
    pub(crate) async fn sweep_timeouts(self: Arc<Self>, now: DateTime<Utc>) -> brigade_core::Result<()> {
        let events = self.events.list(&EventSelector::default()).await?;
        for event in events {
            self.clone().sweep_event(&event, now).await;
        }
        Ok(())
    }

    async fn sweep_event(self: Arc<Self>, event: &Event, now: DateTime<Utc>) {
        let worker = &event.worker;
        if !worker.status.is_terminal()
            && deadline_passed(worker.status.started_at, worker.spec.timeout_seconds, now)
        {
            tracing::info!(event_id = %event.id, "worker exceeded its timeout");
            match self.workers.timeout(event.id).await {
                Ok(()) => {
                    counter!(metrics_names::TIMEOUTS).increment(1);
                    // TIMED_OUT is terminal but the pod is still running,
                    // so no terminal pod event will ever trigger cleanup.
                    let observer = self.clone();
                    let event_id = event.id;
                    tokio::spawn(async move {
                        tokio::time::sleep(observer.config.delay_before_cleanup).await;
                        if let Err(err) = observer.workers.cleanup(event_id).await {
                            tracing::warn!(event_id = %event_id, error = %err, "worker cleanup failed");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(event_id = %event.id, error = %err, "worker timeout failed");
                }
            }
        }

        for (job_name, job) in &worker.jobs {
            if job.status.is_terminal()
                || !deadline_passed(job.status.started_at, job.spec.timeout_seconds, now)
            {
                continue;
            }
            tracing::info!(event_id = %event.id, job = %job_name, "job exceeded its timeout");
            match self.jobs.timeout(event.id, job_name).await {
                Ok(()) => {
                    counter!(metrics_names::TIMEOUTS).increment(1);
                    let observer = self.clone();
                    let event_id = event.id;
                    let job_name = job_name.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(observer.config.delay_before_cleanup).await;
                        if let Err(err) = observer.jobs.cleanup(event_id, &job_name).await {
                            tracing::warn!(
                                event_id = %event_id,
                                job = %job_name,
                                error = %err,
                                "job cleanup failed"
                            );
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.id,
                        job = %job_name,
                        error = %err,
                        "job timeout failed"
                    );
                }
            }
        }
    }
}
