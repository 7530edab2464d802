//! The Workers service: the authoritative Worker state machine.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;

use brigade_core::{
    Error, EventId, Phase, Principal, Result, Role, WorkloadStatus,
};
use brigade_substrate::Substrate;

use crate::auth::Authorizer;
use crate::metrics::{labels, names as metrics_names};
use crate::store::{modify_event, EventsStore};
use crate::watch::{StatusWatch, StatusWatchHub};

/// Authoritative operations on Event Workers.
pub struct WorkersService {
    events: Arc<dyn EventsStore>,
    substrate: Arc<dyn Substrate>,
    authorizer: Arc<Authorizer>,
    watch_hub: Arc<StatusWatchHub>,
}

impl WorkersService {
    /// Creates the service over its collaborators.
    pub fn new(
        events: Arc<dyn EventsStore>,
        substrate: Arc<dyn Substrate>,
        authorizer: Arc<Authorizer>,
        watch_hub: Arc<StatusWatchHub>,
    ) -> Self {
        Self {
            events,
            substrate,
            authorizer,
            watch_hub,
        }
    }

    /// Claims a `PENDING` Worker for launch (`PENDING -> STARTING`).
    ///
    /// This transition is the single serialization point that makes
    /// duplicate queue deliveries harmless: only one claim can commit.
    /// Requires `SCHEDULER`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the Worker is already past `PENDING`.
    pub async fn start(&self, principal: &Principal, event_id: EventId) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::Scheduler)
            .await?;

        let event = modify_event(self.events.as_ref(), event_id, |event| {
            if event.worker.status.phase != Phase::Pending {
                return Err(Error::conflict(format!(
                    "worker is already {}",
                    event.worker.status.phase
                )));
            }
            event.worker.status =
                event
                    .worker
                    .status
                    .transition_to(Phase::Starting, None, Utc::now())?;
            Ok(())
        })
        .await?;

        self.watch_hub.publish_worker(event_id, &event.worker.status);
        Ok(())
    }

    /// Fetches the Worker's status. Requires `READER`.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the Event does not exist.
    pub async fn get_status(
        &self,
        principal: &Principal,
        event_id: EventId,
    ) -> Result<WorkloadStatus> {
        self.authorizer
            .require_unscoped_role(principal, Role::Reader)
            .await?;
        Ok(self.events.get(event_id).await?.event.worker.status)
    }

    /// Opens a status watch: current status first, deduplicated updates
    /// after, ending on a terminal snapshot. Requires `READER`.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the Event does not exist.
    pub async fn watch_status(
        &self,
        principal: &Principal,
        event_id: EventId,
    ) -> Result<StatusWatch> {
        self.authorizer
            .require_unscoped_role(principal, Role::Reader)
            .await?;
        // Subscribe before reading so no transition lands between the
        // snapshot and the stream.
        let rx = self.watch_hub.subscribe_worker(event_id);
        let current = self.events.get(event_id).await?.event.worker.status;
        Ok(StatusWatch::new(current, rx))
    }

    /// Applies an observed status under the phase graph and returns the
    /// committed status. Requires `OBSERVER`, except that `SCHEDULER`
    /// may report `SCHEDULING_FAILED` for a launch it abandoned.
    ///
    /// Reporting the phase the Worker is already in is an idempotent
    /// no-op; pod watches deliver duplicates routinely.
    ///
    /// # Errors
    ///
    /// `CONFLICT` for illegal transitions or on CAS exhaustion.
    pub async fn update_status(
        &self,
        principal: &Principal,
        event_id: EventId,
        status: WorkloadStatus,
    ) -> Result<WorkloadStatus> {
        match self
            .authorizer
            .require_unscoped_role(principal, Role::Observer)
            .await
        {
            Ok(()) => {}
            Err(err) if status.phase == Phase::SchedulingFailed => {
                self.authorizer
                    .require_unscoped_role(principal, Role::Scheduler)
                    .await
                    .map_err(|_| err)?;
            }
            Err(err) => return Err(err),
        }

        let current = self.events.get(event_id).await?.event.worker.status;
        if current.phase == status.phase {
            return Ok(current);
        }

        let target = status.phase;
        let event = modify_event(self.events.as_ref(), event_id, |event| {
            if event.worker.status.phase == target {
                return Ok(());
            }
            event.worker.status =
                event
                    .worker
                    .status
                    .transition_to(target, status.error.clone(), Utc::now())?;
            Ok(())
        })
        .await?;

        counter!(
            metrics_names::WORKER_TRANSITIONS,
            labels::PHASE => target.to_string(),
        )
        .increment(1);
        self.watch_hub.publish_worker(event_id, &event.worker.status);
        Ok(event.worker.status)
    }

    /// Deletes the Worker's workload artifacts from the substrate. Only
    /// valid once the Worker is terminal; idempotent. Requires
    /// `OBSERVER`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the Worker has not reached a terminal phase.
    pub async fn cleanup(&self, principal: &Principal, event_id: EventId) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::Observer)
            .await?;

        let stored = self.events.get(event_id).await?;
        if !stored.event.worker.status.is_terminal() {
            return Err(Error::conflict(format!(
                "worker is {}; cleanup requires a terminal phase",
                stored.event.worker.status.phase
            )));
        }
        self.substrate.delete_worker(event_id).await
    }

    /// Forces a non-terminal Worker to `TIMED_OUT`. Requires `OBSERVER`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the Worker is already terminal.
    pub async fn timeout(&self, principal: &Principal, event_id: EventId) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::Observer)
            .await?;

        let event = modify_event(self.events.as_ref(), event_id, |event| {
            if event.worker.status.is_terminal() {
                return Err(Error::conflict(format!(
                    "worker is already {}",
                    event.worker.status.phase
                )));
            }
            event.worker.status = event.worker.status.transition_to(
                Phase::TimedOut,
                Some("worker exceeded its timeout".to_string()),
                Utc::now(),
            )?;
            Ok(())
        })
        .await?;

        counter!(
            metrics_names::WORKER_TRANSITIONS,
            labels::PHASE => Phase::TimedOut.to_string(),
        )
        .increment(1);
        self.watch_hub.publish_worker(event_id, &event.worker.status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use brigade_core::naming::worker_pod_name;

    #[tokio::test]
    async fn start_moves_pending_to_starting_exactly_once() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;

        harness
            .workers_service
            .start(&Principal::Scheduler, event.id)
            .await
            .unwrap();
        let status = harness
            .workers_service
            .get_status(&Principal::Scheduler, event.id)
            .await
            .unwrap();
        assert_eq!(status.phase, Phase::Starting);

        // The duplicate claim loses.
        let err = harness
            .workers_service
            .start(&Principal::Scheduler, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn start_requires_the_scheduler_role() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        let err = harness
            .workers_service
            .start(&Principal::Observer, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthzFailed { .. }));
    }

    #[tokio::test]
    async fn update_status_walks_the_happy_path() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness
            .workers_service
            .start(&Principal::Scheduler, event.id)
            .await
            .unwrap();

        let running = harness
            .workers_service
            .update_status(
                &Principal::Observer,
                event.id,
                WorkloadStatus::with_phase(Phase::Running),
            )
            .await
            .unwrap();
        assert_eq!(running.phase, Phase::Running);
        assert!(running.started_at.is_some());

        let done = harness
            .workers_service
            .update_status(
                &Principal::Observer,
                event.id,
                WorkloadStatus::with_phase(Phase::Succeeded),
            )
            .await
            .unwrap();
        assert_eq!(done.phase, Phase::Succeeded);
        assert!(done.ended_at.is_some());
    }

    #[tokio::test]
    async fn repeated_status_reports_are_idempotent() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness
            .workers_service
            .start(&Principal::Scheduler, event.id)
            .await
            .unwrap();

        for _ in 0..3 {
            let status = harness
                .workers_service
                .update_status(
                    &Principal::Observer,
                    event.id,
                    WorkloadStatus::with_phase(Phase::Running),
                )
                .await
                .unwrap();
            assert_eq!(status.phase, Phase::Running);
        }
    }

    #[tokio::test]
    async fn illegal_transitions_are_conflicts() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;

        // PENDING -> SUCCEEDED skips the whole graph.
        let err = harness
            .workers_service
            .update_status(
                &Principal::Observer,
                event.id,
                WorkloadStatus::with_phase(Phase::Succeeded),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn unknown_recovers_to_the_true_phase() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;

        harness
            .workers_service
            .update_status(
                &Principal::Observer,
                event.id,
                WorkloadStatus::with_phase(Phase::Unknown),
            )
            .await
            .unwrap();
        let recovered = harness
            .workers_service
            .update_status(
                &Principal::Observer,
                event.id,
                WorkloadStatus::with_phase(Phase::Succeeded),
            )
            .await
            .unwrap();
        assert_eq!(recovered.phase, Phase::Succeeded);
    }

    #[tokio::test]
    async fn cleanup_requires_a_terminal_phase() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;

        let err = harness
            .workers_service
            .cleanup(&Principal::Observer, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn cleanup_deletes_the_workload_idempotently() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.launch_worker(&event).await;
        harness.drive_worker_to(event.id, Phase::Succeeded).await;

        harness
            .workers_service
            .cleanup(&Principal::Observer, event.id)
            .await
            .unwrap();
        assert!(harness.substrate.pod(&worker_pod_name(event.id)).is_none());

        // Replays are fine.
        harness
            .workers_service
            .cleanup(&Principal::Observer, event.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn timeout_forces_timed_out_until_terminal() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;

        harness
            .workers_service
            .timeout(&Principal::Observer, event.id)
            .await
            .unwrap();
        let status = harness
            .workers_service
            .get_status(&Principal::Observer, event.id)
            .await
            .unwrap();
        assert_eq!(status.phase, Phase::TimedOut);
        assert!(status.error.is_some());

        let err = harness
            .workers_service
            .timeout(&Principal::Observer, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn watch_streams_the_full_phase_sequence() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;

        let mut watch = harness
            .workers_service
            .watch_status(&Principal::Root, event.id)
            .await
            .unwrap();

        harness
            .workers_service
            .start(&Principal::Scheduler, event.id)
            .await
            .unwrap();
        harness.drive_worker_to(event.id, Phase::Running).await;
        harness.drive_worker_to(event.id, Phase::Succeeded).await;

        let mut phases = Vec::new();
        while let Some(status) = watch.next().await {
            phases.push(status.phase);
        }
        assert_eq!(
            phases,
            vec![Phase::Pending, Phase::Starting, Phase::Running, Phase::Succeeded]
        );
    }
}
