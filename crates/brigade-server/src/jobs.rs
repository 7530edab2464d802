//! The Jobs service: the authoritative Job state machine.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;

use brigade_core::job::validate_job_name;
use brigade_core::{
    Error, EventId, Job, NewJob, Phase, Principal, Result, Role, WorkloadStatus,
};
use brigade_queue::{JobToken, QueueBackend, QueueKind, QueueRef, QueueWriter as _};
use brigade_substrate::Substrate;

use crate::auth::Authorizer;
use crate::metrics::{labels, names as metrics_names};
use crate::store::{modify_event, EventsStore};
use crate::watch::{StatusWatch, StatusWatchHub};

/// Authoritative operations on Jobs.
pub struct JobsService {
    events: Arc<dyn EventsStore>,
    queues: Arc<dyn QueueBackend>,
    substrate: Arc<dyn Substrate>,
    authorizer: Arc<Authorizer>,
    watch_hub: Arc<StatusWatchHub>,
}

impl JobsService {
    /// Creates the service over its collaborators.
    pub fn new(
        events: Arc<dyn EventsStore>,
        queues: Arc<dyn QueueBackend>,
        substrate: Arc<dyn Substrate>,
        authorizer: Arc<Authorizer>,
        watch_hub: Arc<StatusWatchHub>,
    ) -> Self {
        Self {
            events,
            queues,
            substrate,
            authorizer,
            watch_hub,
        }
    }

    /// Creates a Job under a `RUNNING` Worker and enqueues a Job token.
    /// Requires `WORKER` scoped to the Event.
    ///
    /// # Errors
    ///
    /// `INVALID` for bad names, `CONFLICT` if the Worker is not running
    /// or the name is taken. A queue failure marks the Job
    /// `SCHEDULING_FAILED` and is surfaced.
    pub async fn create(
        &self,
        principal: &Principal,
        event_id: EventId,
        new_job: NewJob,
    ) -> Result<()> {
        self.authorizer
            .require_role(principal, Role::Worker, &event_id.to_string())
            .await?;
        validate_job_name(&new_job.name)?;

        let job_name = new_job.name.clone();
        let event = modify_event(self.events.as_ref(), event_id, |event| {
            if event.worker.status.phase != Phase::Running {
                return Err(Error::conflict(format!(
                    "worker is {}; jobs can only be created while it is RUNNING",
                    event.worker.status.phase
                )));
            }
            if event.worker.jobs.contains_key(&new_job.name) {
                return Err(Error::conflict(format!(
                    "job {} already exists",
                    new_job.name
                )));
            }
            event
                .worker
                .jobs
                .insert(new_job.name.clone(), Job::new(new_job.spec.clone()));
            Ok(())
        })
        .await?;

        let queue = QueueRef::new(event.project_id.clone(), QueueKind::Jobs);
        let token = JobToken {
            event_id,
            job_name: job_name.clone(),
        };
        let enqueue_result = match self.queues.writer(&queue).await {
            Ok(writer) => writer.write(token.encode()?).await,
            Err(err) => Err(err),
        };

        if let Err(queue_err) = enqueue_result {
            tracing::error!(
                event_id = %event_id,
                job = %job_name,
                error = %queue_err,
                "failed to enqueue job token; marking job SCHEDULING_FAILED"
            );
            let failed = modify_event(self.events.as_ref(), event_id, |event| {
                let job = event
                    .worker
                    .jobs
                    .get_mut(&job_name)
                    .ok_or_else(|| Error::not_found("Job", &job_name))?;
                job.status = job.status.transition_to(
                    Phase::SchedulingFailed,
                    Some(format!("enqueueing job token: {queue_err}")),
                    Utc::now(),
                )?;
                Ok(())
            })
            .await;
            if let Ok(event) = failed {
                if let Some(job) = event.worker.jobs.get(&job_name) {
                    self.watch_hub.publish_job(event_id, &job_name, &job.status);
                }
            }
            return Err(queue_err);
        }

        counter!(metrics_names::JOBS_CREATED).increment(1);
        Ok(())
    }

    /// Claims a `PENDING` Job for launch (`PENDING -> STARTING`).
    /// Requires `SCHEDULER`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the Job is already past `PENDING`.
    pub async fn start(
        &self,
        principal: &Principal,
        event_id: EventId,
        job_name: &str,
    ) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::Scheduler)
            .await?;

        let status = self
            .modify_job(event_id, job_name, |job, _| {
                if job.status.phase != Phase::Pending {
                    return Err(Error::conflict(format!(
                        "job is already {}",
                        job.status.phase
                    )));
                }
                job.status = job.status.transition_to(Phase::Starting, None, Utc::now())?;
                Ok(())
            })
            .await?;

        self.watch_hub.publish_job(event_id, job_name, &status);
        Ok(())
    }

    /// Fetches the Job's status. Requires `READER`.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the Event or Job does not exist.
    pub async fn get_status(
        &self,
        principal: &Principal,
        event_id: EventId,
        job_name: &str,
    ) -> Result<WorkloadStatus> {
        self.authorizer
            .require_unscoped_role(principal, Role::Reader)
            .await?;
        let stored = self.events.get(event_id).await?;
        stored
            .event
            .worker
            .jobs
            .get(job_name)
            .map(|job| job.status.clone())
            .ok_or_else(|| Error::not_found("Job", job_name))
    }

    /// Opens a status watch for the Job. Requires `READER`.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the Event or Job does not exist.
    pub async fn watch_status(
        &self,
        principal: &Principal,
        event_id: EventId,
        job_name: &str,
    ) -> Result<StatusWatch> {
        self.authorizer
            .require_unscoped_role(principal, Role::Reader)
            .await?;
        let rx = self.watch_hub.subscribe_job(event_id, job_name);
        let stored = self.events.get(event_id).await?;
        let current = stored
            .event
            .worker
            .jobs
            .get(job_name)
            .map(|job| job.status.clone())
            .ok_or_else(|| Error::not_found("Job", job_name))?;
        Ok(StatusWatch::new(current, rx))
    }

    /// Applies an observed status under the phase graph and returns the
    /// committed status. Requires `OBSERVER`, except that `SCHEDULER`
    /// may report `SCHEDULING_FAILED` for a launch it abandoned.
    ///
    /// Once the owning Worker is terminal, only updates that bring the
    /// Job to a terminal phase are accepted; anything else is `CONFLICT`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` for illegal transitions or on CAS exhaustion.
    pub async fn update_status(
        &self,
        principal: &Principal,
        event_id: EventId,
        job_name: &str,
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

        let current = self.get_job_status(event_id, job_name).await?;
        if current.phase == status.phase {
            return Ok(current);
        }

        let target = status.phase;
        let committed = self
            .modify_job(event_id, job_name, |job, worker_terminal| {
                if job.status.phase == target {
                    return Ok(());
                }
                if worker_terminal && !target.is_terminal() {
                    return Err(Error::conflict(format!(
                        "worker is terminal; job may only move to a terminal phase, not {target}"
                    )));
                }
                job.status = job
                    .status
                    .transition_to(target, status.error.clone(), Utc::now())?;
                Ok(())
            })
            .await?;

        counter!(
            metrics_names::JOB_TRANSITIONS,
            labels::PHASE => target.to_string(),
        )
        .increment(1);
        self.watch_hub.publish_job(event_id, job_name, &committed);
        Ok(committed)
    }

    /// Deletes the Job's workload artifacts. Only valid once the Job is
    /// terminal; idempotent. Requires `OBSERVER`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the Job has not reached a terminal phase.
    pub async fn cleanup(
        &self,
        principal: &Principal,
        event_id: EventId,
        job_name: &str,
    ) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::Observer)
            .await?;

        let status = self.get_job_status(event_id, job_name).await?;
        if !status.is_terminal() {
            return Err(Error::conflict(format!(
                "job is {}; cleanup requires a terminal phase",
                status.phase
            )));
        }
        self.substrate.delete_job(event_id, job_name).await
    }

    /// Forces a non-terminal Job to `TIMED_OUT`. Requires `OBSERVER`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the Job is already terminal.
    pub async fn timeout(
        &self,
        principal: &Principal,
        event_id: EventId,
        job_name: &str,
    ) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::Observer)
            .await?;

        let status = self
            .modify_job(event_id, job_name, |job, _| {
                if job.status.is_terminal() {
                    return Err(Error::conflict(format!(
                        "job is already {}",
                        job.status.phase
                    )));
                }
                job.status = job.status.transition_to(
                    Phase::TimedOut,
                    Some("job exceeded its timeout".to_string()),
                    Utc::now(),
                )?;
                Ok(())
            })
            .await?;

        counter!(
            metrics_names::JOB_TRANSITIONS,
            labels::PHASE => Phase::TimedOut.to_string(),
        )
        .increment(1);
        self.watch_hub.publish_job(event_id, job_name, &status);
        Ok(())
    }

    async fn get_job_status(&self, event_id: EventId, job_name: &str) -> Result<WorkloadStatus> {
        let stored = self.events.get(event_id).await?;
        stored
            .event
            .worker
            .jobs
            .get(job_name)
            .map(|job| job.status.clone())
            .ok_or_else(|| Error::not_found("Job", job_name))
    }

    /// CAS-modifies one Job, handing the closure the Job and whether the
    /// owning Worker is terminal. Returns the Job's committed status.
    async fn modify_job<F>(
        &self,
        event_id: EventId,
        job_name: &str,
        mut mutate: F,
    ) -> Result<WorkloadStatus>
    where
        F: FnMut(&mut Job, bool) -> Result<()> + Send,
    {
        let event = modify_event(self.events.as_ref(), event_id, |event| {
            let worker_terminal = event.worker.status.is_terminal();
            let job = event
                .worker
                .jobs
                .get_mut(job_name)
                .ok_or_else(|| Error::not_found("Job", job_name))?;
            mutate(job, worker_terminal)
        })
        .await?;
        event
            .worker
            .jobs
            .get(job_name)
            .map(|job| job.status.clone())
            .ok_or_else(|| Error::not_found("Job", job_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use brigade_core::{ContainerSpec, JobSpec};

    fn job_spec() -> JobSpec {
        JobSpec {
            primary_container: ContainerSpec {
                image: "example.com/job:v1".to_string(),
                command: vec!["make".to_string(), "test".to_string()],
                environment: Default::default(),
            },
            sidecar_containers: Default::default(),
            host: None,
            timeout_seconds: None,
        }
    }

    fn new_job(name: &str) -> NewJob {
        NewJob {
            name: name.to_string(),
            spec: job_spec(),
        }
    }

    #[tokio::test]
    async fn create_requires_a_running_worker() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        let worker_principal = Principal::Worker(event.id);

        let err = harness
            .jobs_service
            .create(&worker_principal, event.id, new_job("build"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        harness.drive_worker_to(event.id, Phase::Running).await;
        harness
            .jobs_service
            .create(&worker_principal, event.id, new_job("build"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_enqueues_one_job_token() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;

        harness
            .jobs_service
            .create(&Principal::Worker(event.id), event.id, new_job("build"))
            .await
            .unwrap();

        let queue = QueueRef::new(event.project_id.clone(), QueueKind::Jobs);
        assert_eq!(harness.queues.depth(&queue), 1);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_and_invalid_names() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;
        let worker_principal = Principal::Worker(event.id);

        harness
            .jobs_service
            .create(&worker_principal, event.id, new_job("build"))
            .await
            .unwrap();
        let err = harness
            .jobs_service
            .create(&worker_principal, event.id, new_job("build"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let err = harness
            .jobs_service
            .create(&worker_principal, event.id, new_job("Not A Dns Label"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
    }

    #[tokio::test]
    async fn a_worker_cannot_create_jobs_for_another_event() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        let other = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;

        let err = harness
            .jobs_service
            .create(&Principal::Worker(other.id), event.id, new_job("build"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthzFailed { .. }));
    }

    #[tokio::test]
    async fn job_lifecycle_walks_the_graph() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;
        harness
            .jobs_service
            .create(&Principal::Worker(event.id), event.id, new_job("build"))
            .await
            .unwrap();

        harness
            .jobs_service
            .start(&Principal::Scheduler, event.id, "build")
            .await
            .unwrap();
        let running = harness
            .jobs_service
            .update_status(
                &Principal::Observer,
                event.id,
                "build",
                WorkloadStatus::with_phase(Phase::Running),
            )
            .await
            .unwrap();
        assert!(running.started_at.is_some());

        let done = harness
            .jobs_service
            .update_status(
                &Principal::Observer,
                event.id,
                "build",
                WorkloadStatus::with_phase(Phase::Succeeded),
            )
            .await
            .unwrap();
        assert!(done.is_terminal());
    }

    #[tokio::test]
    async fn job_updates_after_worker_terminal_must_be_terminal() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;
        harness
            .jobs_service
            .create(&Principal::Worker(event.id), event.id, new_job("build"))
            .await
            .unwrap();
        harness
            .jobs_service
            .start(&Principal::Scheduler, event.id, "build")
            .await
            .unwrap();
        harness
            .jobs_service
            .update_status(
                &Principal::Observer,
                event.id,
                "build",
                WorkloadStatus::with_phase(Phase::Running),
            )
            .await
            .unwrap();

        // The worker finishes while the job pod lingers.
        harness.drive_worker_to(event.id, Phase::Succeeded).await;

        // A non-terminal job update is now rejected...
        let err = harness
            .jobs_service
            .update_status(
                &Principal::Observer,
                event.id,
                "build",
                WorkloadStatus::with_phase(Phase::Unknown),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        // ...but the job may still settle to a terminal phase.
        let done = harness
            .jobs_service
            .update_status(
                &Principal::Observer,
                event.id,
                "build",
                WorkloadStatus::with_phase(Phase::Failed),
            )
            .await
            .unwrap();
        assert_eq!(done.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn a_job_finishing_does_not_finish_the_worker() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;
        harness
            .jobs_service
            .create(&Principal::Worker(event.id), event.id, new_job("build"))
            .await
            .unwrap();
        harness
            .jobs_service
            .start(&Principal::Scheduler, event.id, "build")
            .await
            .unwrap();
        harness
            .jobs_service
            .update_status(
                &Principal::Observer,
                event.id,
                "build",
                WorkloadStatus::with_phase(Phase::Running),
            )
            .await
            .unwrap();
        harness
            .jobs_service
            .update_status(
                &Principal::Observer,
                event.id,
                "build",
                WorkloadStatus::with_phase(Phase::Succeeded),
            )
            .await
            .unwrap();

        let worker_status = harness
            .workers_service
            .get_status(&Principal::Observer, event.id)
            .await
            .unwrap();
        assert_eq!(worker_status.phase, Phase::Running);
    }

    #[tokio::test]
    async fn timeout_and_cleanup_mirror_worker_semantics() {
        let harness = TestHarness::new().await;
        let event = harness.seed_event("blue-book").await;
        harness.drive_worker_to(event.id, Phase::Running).await;
        harness
            .jobs_service
            .create(&Principal::Worker(event.id), event.id, new_job("build"))
            .await
            .unwrap();

        let err = harness
            .jobs_service
            .cleanup(&Principal::Observer, event.id, "build")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        harness
            .jobs_service
            .timeout(&Principal::Observer, event.id, "build")
            .await
            .unwrap();
        let status = harness
            .jobs_service
            .get_status(&Principal::Observer, event.id, "build")
            .await
            .unwrap();
        assert_eq!(status.phase, Phase::TimedOut);

        harness
            .jobs_service
            .cleanup(&Principal::Observer, event.id, "build")
            .await
            .unwrap();
    }
}
