//! # brigade-observer
//!
//! The observer watches the substrate's pods and reconciles what it sees
//! into authoritative Worker/Job status through the API server. It also
//! times out stalled work and drives post-run cleanup.
//!
//! Four loops cooperate under one supervisor:
//!
//! - **Healthcheck**: pings the API server; any failure is fatal, so a
//!   partitioned observer stops shadow-running instead of drifting
//! - **Worker-pod sync** and **Job-pod sync**: map pod phases onto the
//!   Worker/Job phase graph and schedule delayed cleanup for terminal
//!   workloads
//! - **Timeout sweep**: forces `TIMED_OUT` on work that outlived its
//!   declared budget
//!
//! Status-update and cleanup failures are logged and retried by the
//! loops' natural repetition; only healthcheck and watch-subscription
//! failures escalate to the fatal-error channel and shut the process
//! down.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

mod config;
pub mod metrics_names;
mod pods;
mod sweep;
#[cfg(test)]
mod tests;

pub use config::ObserverConfig;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use brigade_client::{
    EventsClient, HealthcheckClient, JobsClient, RestApiClient, WorkersClient,
};
use brigade_core::{Error, Result};
use brigade_substrate::Substrate;

/// How long the supervisor waits for loops to drain after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// The observer process.
pub struct Observer {
    config: ObserverConfig,
    healthcheck: Arc<dyn HealthcheckClient>,
    events: Arc<dyn EventsClient>,
    workers: Arc<dyn WorkersClient>,
    jobs: Arc<dyn JobsClient>,
    substrate: Arc<dyn Substrate>,
    /// Pods with a cleanup in flight, keyed `namespace:podName`. The one
    /// piece of shared mutable state; the mutex is never held across an
    /// await.
    deleting_pods: Mutex<HashSet<String>>,
}

impl Observer {
    /// Creates an observer over its collaborators. All of them are
    /// required; in particular there is no constructor without the
    /// healthcheck client.
    pub fn new(
        config: ObserverConfig,
        healthcheck: Arc<dyn HealthcheckClient>,
        events: Arc<dyn EventsClient>,
        workers: Arc<dyn WorkersClient>,
        jobs: Arc<dyn JobsClient>,
        substrate: Arc<dyn Substrate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            healthcheck,
            events,
            workers,
            jobs,
            substrate,
            deleting_pods: Mutex::new(HashSet::new()),
        })
    }

    /// Builds an observer for standalone deployment: collaborator
    /// clients speak REST to the API server named by `API_ADDRESS`,
    /// authenticating with `API_TOKEN`. The substrate is injected by the
    /// deployment (the cluster binding lives outside this crate).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] when required environment is missing
    /// or malformed.
    pub fn from_env(substrate: Arc<dyn Substrate>) -> Result<Arc<Self>> {
        let config = ObserverConfig::from_env()?;
        let address =
            std::env::var("API_ADDRESS").map_err(|_| Error::invalid("missing API_ADDRESS"))?;
        let token = std::env::var("API_TOKEN").map_err(|_| Error::invalid("missing API_TOKEN"))?;
        let client = Arc::new(RestApiClient::new(address, token));
        Ok(Self::new(
            config,
            client.clone(),
            client.clone(),
            client.clone(),
            client,
            substrate,
        ))
    }

    /// Runs all loops until `shutdown` flips to true or a loop reports a
    /// fatal error, then cancels everything and waits a bounded grace
    /// period for the loops to drain.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error a loop reported.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (error_tx, mut error_rx) = mpsc::channel::<Error>(8);
        let (stop_tx, stop_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(
                self.clone()
                    .healthcheck_loop(error_tx.clone(), stop_rx.clone()),
            ),
            tokio::spawn(
                self.clone()
                    .sync_worker_pods(error_tx.clone(), stop_rx.clone()),
            ),
            tokio::spawn(self.clone().sync_job_pods(error_tx.clone(), stop_rx.clone())),
            tokio::spawn(self.clone().timeout_sweep_loop(stop_rx)),
        ];
        drop(error_tx);

        // One loop failing fails everything.
        let result = tokio::select! {
            fatal = error_rx.recv() => match fatal {
                Some(err) => {
                    tracing::error!(error = %err, "observer loop reported a fatal error; shutting down");
                    Err(err)
                }
                None => Ok(()),
            },
            _ = shutdown.changed() => Ok(()),
        };

        let _ = stop_tx.send(true);
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!("observer loops did not drain within the grace period");
        }

        result
    }

    async fn healthcheck_loop(
        self: Arc<Self>,
        error_tx: mpsc::Sender<Error>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.healthcheck_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.healthcheck.ping().await {
                let _ = error_tx
                    .send(Error::backend(format!("API server healthcheck failed: {err}")))
                    .await;
                return;
            }
        }
    }
}
