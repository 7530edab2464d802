//! The scheduler's consumer loops and per-token handling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use brigade_client::{EventsClient, JobsClient, ProjectsClient, WorkersClient};
use brigade_core::{
    Error, Event, EventSelector, Phase, Project, ProjectId, Result, WorkloadStatus,
};
use brigade_queue::{
    Delivery as _, JobToken, QueueBackend, QueueKind, QueueReader as _, QueueRef, WorkerToken,
};
use brigade_substrate::Substrate;

use crate::config::SchedulerConfig;
use crate::metrics_names;

/// What to do with a delivery after handling its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The token is spent (work launched, duplicate, or unprocessable):
    /// acknowledge it.
    Ack,
    /// The token could not be processed right now: negatively
    /// acknowledge so the queue redelivers it after a backoff.
    Retry,
}

struct ProjectConsumers {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// The scheduler: one pair of queue consumers per known project.
pub struct Scheduler {
    config: SchedulerConfig,
    projects: Arc<dyn ProjectsClient>,
    events: Arc<dyn EventsClient>,
    workers: Arc<dyn WorkersClient>,
    jobs: Arc<dyn JobsClient>,
    queues: Arc<dyn QueueBackend>,
    substrate: Arc<dyn Substrate>,
}

impl Scheduler {
    /// Creates a scheduler over its collaborators.
    pub fn new(
        config: SchedulerConfig,
        projects: Arc<dyn ProjectsClient>,
        events: Arc<dyn EventsClient>,
        workers: Arc<dyn WorkersClient>,
        jobs: Arc<dyn JobsClient>,
        queues: Arc<dyn QueueBackend>,
        substrate: Arc<dyn Substrate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            projects,
            events,
            workers,
            jobs,
            queues,
            substrate,
        })
    }

    /// Builds a scheduler for standalone deployment: collaborator
    /// clients speak REST to the API server named by `API_ADDRESS`,
    /// authenticating with `API_TOKEN`. Queue backend and substrate are
    /// injected by the deployment.
    ///
    /// # Errors
    ///
    /// Returns [`brigade_core::Error::Invalid`] when required environment
    /// is missing or malformed.
    pub fn from_env(
        queues: Arc<dyn QueueBackend>,
        substrate: Arc<dyn Substrate>,
    ) -> Result<Arc<Self>> {
        let config = SchedulerConfig::from_env()?;
        let address =
            std::env::var("API_ADDRESS").map_err(|_| Error::invalid("missing API_ADDRESS"))?;
        let token = std::env::var("API_TOKEN").map_err(|_| Error::invalid("missing API_TOKEN"))?;
        let client = Arc::new(brigade_client::RestApiClient::new(address, token));
        Ok(Self::new(
            config,
            client.clone(),
            client.clone(),
            client.clone(),
            client,
            queues,
            substrate,
        ))
    }

    /// Runs until `shutdown` flips to true: refreshes the project list on
    /// an interval and maintains one Worker-queue and one Job-queue
    /// consumer per project.
    ///
    /// # Errors
    ///
    /// Never returns an error today; the signature leaves room for fatal
    /// startup failures.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut consumers: HashMap<ProjectId, ProjectConsumers> = HashMap::new();
        let mut ticker = tokio::time::interval(self.config.project_refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.clone().refresh_projects(&mut consumers).await {
                        // Transient API trouble; the next tick retries.
                        tracing::warn!(error = %err, "project refresh failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("scheduler shutting down; draining consumers");
        for (_, project_consumers) in consumers.drain() {
            let _ = project_consumers.stop.send(true);
            for handle in project_consumers.handles {
                let _ = handle.await;
            }
        }
        Ok(())
    }

    async fn refresh_projects(
        self: Arc<Self>,
        consumers: &mut HashMap<ProjectId, ProjectConsumers>,
    ) -> Result<()> {
        let projects = self.projects.list().await?;
        let current: HashSet<ProjectId> = projects.iter().map(|p| p.id.clone()).collect();

        let stale: Vec<ProjectId> = consumers
            .keys()
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect();
        for project_id in stale {
            tracing::info!(project = %project_id, "project deleted; stopping its consumers");
            if let Some(project_consumers) = consumers.remove(&project_id) {
                let _ = project_consumers.stop.send(true);
            }
        }

        for project in projects {
            if consumers.contains_key(&project.id) {
                continue;
            }
            tracing::info!(project = %project.id, "starting consumers for project");
            let (stop_tx, stop_rx) = watch::channel(false);
            let handles = vec![
                tokio::spawn(self.clone().consume(
                    project.id.clone(),
                    QueueKind::Workers,
                    stop_rx.clone(),
                )),
                tokio::spawn(
                    self.clone()
                        .consume(project.id.clone(), QueueKind::Jobs, stop_rx),
                ),
            ];
            consumers.insert(
                project.id,
                ProjectConsumers {
                    stop: stop_tx,
                    handles,
                },
            );
        }
        Ok(())
    }

    async fn consume(
        self: Arc<Self>,
        project_id: ProjectId,
        kind: QueueKind,
        mut stop: watch::Receiver<bool>,
    ) {
        let queue = QueueRef::new(project_id.clone(), kind);
        let reader = match self.queues.reader(&queue).await {
            Ok(reader) => reader,
            Err(err) => {
                tracing::error!(queue = %queue.name(), error = %err, "cannot open queue reader");
                return;
            }
        };

        loop {
            let delivery = tokio::select! {
                _ = stop.changed() => return,
                received = reader.receive() => match received {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        tracing::error!(queue = %queue.name(), error = %err, "queue receive failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            let attempt = delivery.attempt();
            let disposition = match kind {
                QueueKind::Workers => {
                    self.handle_worker_token(&project_id, delivery.payload(), attempt)
                        .await
                }
                QueueKind::Jobs => {
                    self.handle_job_token(&project_id, delivery.payload(), attempt)
                        .await
                }
            };

            let settled = match disposition {
                Disposition::Ack => delivery.ack().await,
                Disposition::Retry => delivery.nack().await,
            };
            if let Err(err) = settled {
                tracing::warn!(queue = %queue.name(), error = %err, "failed to settle delivery");
            }
        }
    }

    /// Handles one Worker token. `attempt` is the delivery attempt as
    /// reported by the queue (1 on first delivery).
    pub async fn handle_worker_token(
        &self,
        project_id: &ProjectId,
        payload: &[u8],
        attempt: u32,
    ) -> Disposition {
        let token = match WorkerToken::decode(payload) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(project = %project_id, error = %err, "dropping malformed worker token");
                counter!(metrics_names::TOKENS_DROPPED).increment(1);
                return Disposition::Ack;
            }
        };

        let event = match self.events.get(token.event_id).await {
            Ok(event) => event,
            Err(err) => return drop_or_retry(&err, "loading event"),
        };
        let project = match self.projects.get(project_id).await {
            Ok(project) => project,
            Err(err) => return drop_or_retry(&err, "loading project"),
        };

        match event.worker.status.phase {
            Phase::Pending => {}
            // A redelivery of a token this consumer nacked mid-launch:
            // the claim committed but the workload may not exist yet.
            Phase::Starting if attempt > 1 => {
                return self.launch_worker(&project, &event, attempt).await;
            }
            other => {
                tracing::debug!(
                    event_id = %token.event_id,
                    phase = %other,
                    "dropping duplicate worker token"
                );
                counter!(metrics_names::TOKENS_DROPPED).increment(1);
                return Disposition::Ack;
            }
        }

        // Admission: defer while the project's window is full.
        let active = match self
            .events
            .list(&EventSelector {
                project_id: Some(project_id.clone()),
                worker_phases: vec![Phase::Starting, Phase::Running],
            })
            .await
        {
            Ok(events) => events.len(),
            Err(err) => return drop_or_retry(&err, "counting active workers"),
        };
        if active >= project.spec.worker_limit as usize {
            tracing::debug!(
                project = %project_id,
                active,
                limit = project.spec.worker_limit,
                "admission window full; deferring worker"
            );
            counter!(metrics_names::ADMISSION_DEFERRALS).increment(1);
            return Disposition::Retry;
        }

        match self.workers.start(token.event_id).await {
            Ok(()) => {}
            // Someone else claimed it, or the event is gone: spent token.
            Err(Error::Conflict { .. } | Error::NotFound { .. }) => {
                counter!(metrics_names::TOKENS_DROPPED).increment(1);
                return Disposition::Ack;
            }
            Err(err) => return drop_or_retry(&err, "claiming worker"),
        }

        self.launch_worker(&project, &event, attempt).await
    }

    async fn launch_worker(
        &self,
        project: &Project,
        event: &Event,
        attempt: u32,
    ) -> Disposition {
        match self.substrate.create_worker(project, event).await {
            Ok(()) => {
                tracing::info!(event_id = %event.id, project = %project.id, "worker workload launched");
                counter!(metrics_names::WORKERS_LAUNCHED).increment(1);
                Disposition::Ack
            }
            Err(err) if attempt < self.config.max_launch_attempts => {
                tracing::warn!(
                    event_id = %event.id,
                    attempt,
                    error = %err,
                    "worker workload launch failed; will retry"
                );
                Disposition::Retry
            }
            Err(err) => {
                tracing::error!(
                    event_id = %event.id,
                    attempt,
                    error = %err,
                    "worker workload launch failed too many times; marking SCHEDULING_FAILED"
                );
                counter!(metrics_names::LAUNCH_FAILURES).increment(1);
                let status = WorkloadStatus::with_phase(Phase::SchedulingFailed)
                    .with_error(format!("creating worker workload: {err}"));
                if let Err(update_err) = self.workers.update_status(event.id, status).await {
                    tracing::error!(
                        event_id = %event.id,
                        error = %update_err,
                        "failed to mark worker SCHEDULING_FAILED"
                    );
                }
                Disposition::Ack
            }
        }
    }

    /// Handles one Job token.
    pub async fn handle_job_token(
        &self,
        project_id: &ProjectId,
        payload: &[u8],
        attempt: u32,
    ) -> Disposition {
        let token = match JobToken::decode(payload) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(project = %project_id, error = %err, "dropping malformed job token");
                counter!(metrics_names::TOKENS_DROPPED).increment(1);
                return Disposition::Ack;
            }
        };

        let event = match self.events.get(token.event_id).await {
            Ok(event) => event,
            Err(err) => return drop_or_retry(&err, "loading event"),
        };
        let project = match self.projects.get(project_id).await {
            Ok(project) => project,
            Err(err) => return drop_or_retry(&err, "loading project"),
        };
        let Some(job) = event.worker.jobs.get(&token.job_name) else {
            tracing::warn!(
                event_id = %token.event_id,
                job = %token.job_name,
                "dropping token for unknown job"
            );
            counter!(metrics_names::TOKENS_DROPPED).increment(1);
            return Disposition::Ack;
        };

        match job.status.phase {
            Phase::Pending => {}
            Phase::Starting if attempt > 1 => {
                return self
                    .launch_job(&project, &event, &token.job_name, attempt)
                    .await;
            }
            other => {
                tracing::debug!(
                    event_id = %token.event_id,
                    job = %token.job_name,
                    phase = %other,
                    "dropping duplicate job token"
                );
                counter!(metrics_names::TOKENS_DROPPED).increment(1);
                return Disposition::Ack;
            }
        }

        match self.jobs.start(token.event_id, &token.job_name).await {
            Ok(()) => {}
            Err(Error::Conflict { .. } | Error::NotFound { .. }) => {
                counter!(metrics_names::TOKENS_DROPPED).increment(1);
                return Disposition::Ack;
            }
            Err(err) => return drop_or_retry(&err, "claiming job"),
        }

        self.launch_job(&project, &event, &token.job_name, attempt)
            .await
    }

    async fn launch_job(
        &self,
        project: &Project,
        event: &Event,
        job_name: &str,
        attempt: u32,
    ) -> Disposition {
        let Some(job) = event.worker.jobs.get(job_name) else {
            return Disposition::Ack;
        };
        match self
            .substrate
            .create_job(project, event, job_name, &job.spec)
            .await
        {
            Ok(()) => {
                tracing::info!(event_id = %event.id, job = %job_name, "job workload launched");
                counter!(metrics_names::JOBS_LAUNCHED).increment(1);
                Disposition::Ack
            }
            Err(err) if attempt < self.config.max_launch_attempts => {
                tracing::warn!(
                    event_id = %event.id,
                    job = %job_name,
                    attempt,
                    error = %err,
                    "job workload launch failed; will retry"
                );
                Disposition::Retry
            }
            Err(err) => {
                tracing::error!(
                    event_id = %event.id,
                    job = %job_name,
                    attempt,
                    error = %err,
                    "job workload launch failed too many times; marking SCHEDULING_FAILED"
                );
                counter!(metrics_names::LAUNCH_FAILURES).increment(1);
                let status = WorkloadStatus::with_phase(Phase::SchedulingFailed)
                    .with_error(format!("creating job workload: {err}"));
                if let Err(update_err) = self
                    .jobs
                    .update_status(event.id, job_name, status)
                    .await
                {
                    tracing::error!(
                        event_id = %event.id,
                        job = %job_name,
                        error = %update_err,
                        "failed to mark job SCHEDULING_FAILED"
                    );
                }
                Disposition::Ack
            }
        }
    }
}

/// Error policy shared by every token-handling step: spent or bogus
/// tokens are acked, transient backend trouble is retried.
fn drop_or_retry(err: &Error, context: &str) -> Disposition {
    if err.is_transient() {
        tracing::warn!(error = %err, "{context} failed transiently; will retry");
        Disposition::Retry
    } else {
        tracing::warn!(error = %err, "{context} failed; dropping token");
        counter!(metrics_names::TOKENS_DROPPED).increment(1);
        Disposition::Ack
    }
}
