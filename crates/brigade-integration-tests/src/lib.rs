//! Fixtures for cross-component scenario tests.
//!
//! [`ControlPlane`] wires the real API-server services, the in-memory
//! queue backend, and the fake substrate, then runs a real scheduler and
//! a real observer against them in-process. Tests play the cluster: they
//! drive pod phases on the fake substrate and watch the three components
//! converge.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use brigade_core::{Event, EventId, Phase, Principal, Result};
use brigade_observer::{Observer, ObserverConfig};
use brigade_queue::memory::InMemoryQueueConfig;
use brigade_scheduler::{Scheduler, SchedulerConfig};
use brigade_server::testing::TestHarness;

/// The full control plane: API services plus a live scheduler and
/// observer.
pub struct ControlPlane {
    /// The underlying service harness (store, queues, substrate).
    pub harness: TestHarness,
    shutdown: watch::Sender<bool>,
    components: Vec<JoinHandle<Result<()>>>,
}

impl ControlPlane {
    /// Starts a control plane tuned for fast test turnaround.
    pub async fn start() -> Self {
        let harness = TestHarness::with_queue_config(InMemoryQueueConfig {
            visibility_timeout: Duration::from_millis(500),
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut components = Vec::new();

        let scheduler_client = harness.local_client(Principal::Scheduler);
        let scheduler = Scheduler::new(
            SchedulerConfig {
                project_refresh_interval: Duration::from_millis(20),
                max_launch_attempts: 3,
            },
            scheduler_client.clone(),
            scheduler_client.clone(),
            scheduler_client.clone(),
            scheduler_client,
            harness.queues.clone(),
            harness.substrate.clone(),
        );
        components.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

        let observer_client = harness.local_client(Principal::Observer);
        let observer = Observer::new(
            ObserverConfig {
                healthcheck_interval: Duration::from_millis(50),
                delay_before_cleanup: Duration::from_millis(100),
                timeout_sweep_interval: Duration::from_millis(25),
            },
            observer_client.clone(),
            observer_client.clone(),
            observer_client.clone(),
            observer_client,
            harness.substrate.clone(),
        );
        components.push(tokio::spawn(observer.run(shutdown_rx)));

        Self {
            harness,
            shutdown,
            components,
        }
    }

    /// Shuts both components down and verifies neither died earlier.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for component in self.components {
            component
                .await
                .expect("component task must not panic")
                .expect("component must exit cleanly");
        }
    }

    /// Current Worker phase of an Event.
    pub async fn worker_phase(&self, event_id: EventId) -> Phase {
        self.harness
            .workers_service
            .get_status(&Principal::Root, event_id)
            .await
            .expect("worker status")
            .phase
    }

    /// Polls until the Worker reaches `phase`.
    ///
    /// # Panics
    ///
    /// Panics if the phase is not reached within five seconds.
    pub async fn wait_for_worker_phase(&self, event_id: EventId, phase: Phase) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.worker_phase(event_id).await == phase {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for worker {event_id} to reach {phase}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls until `condition` holds.
    ///
    /// # Panics
    ///
    /// Panics if the condition does not hold within five seconds.
    pub async fn wait_until<F: Fn() -> bool>(&self, condition: F, what: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {what}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Creates an Event in `project` through the real service path.
    pub async fn submit_event(&self, project: &str) -> Event {
        self.harness.seed_event(project).await
    }
}
