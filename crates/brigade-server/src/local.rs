//! In-process implementations of the client contracts.
//!
//! When all three components share one process (single-node development,
//! scenario tests) the scheduler and observer talk to the services
//! directly through these adapters, pre-authenticated as their built-in
//! principals, instead of going over HTTP.

use std::sync::Arc;

use async_trait::async_trait;

use brigade_client::{
    EventsClient, HealthcheckClient, JobsClient, PingResponse, ProjectsClient, WorkersClient,
};
use brigade_core::{
    Event, EventId, EventSelector, JobSpec, NewEvent, NewJob, Principal, Project, ProjectId,
    Result, WorkloadStatus,
};

use crate::events::EventsService;
use crate::jobs::JobsService;
use crate::projects::ProjectsService;
use crate::server::VERSION;
use crate::workers::WorkersService;

/// Direct-call client over the in-process services, acting as one fixed
/// principal.
pub struct LocalApiClient {
    principal: Principal,
    events: Arc<EventsService>,
    workers: Arc<WorkersService>,
    jobs: Arc<JobsService>,
    projects: Arc<ProjectsService>,
}

impl LocalApiClient {
    /// Creates a client acting as `principal`.
    pub fn new(
        principal: Principal,
        events: Arc<EventsService>,
        workers: Arc<WorkersService>,
        jobs: Arc<JobsService>,
        projects: Arc<ProjectsService>,
    ) -> Self {
        Self {
            principal,
            events,
            workers,
            jobs,
            projects,
        }
    }
}

#[async_trait]
impl HealthcheckClient for LocalApiClient {
    async fn ping(&self) -> Result<PingResponse> {
        Ok(PingResponse {
            version: VERSION.to_string(),
        })
    }
}

#[async_trait]
impl ProjectsClient for LocalApiClient {
    async fn list(&self) -> Result<Vec<Project>> {
        self.projects.list(&self.principal).await
    }

    async fn get(&self, project_id: &ProjectId) -> Result<Project> {
        self.projects.get(&self.principal, project_id).await
    }
}

#[async_trait]
impl EventsClient for LocalApiClient {
    async fn create(&self, event: NewEvent) -> Result<Event> {
        self.events.create(&self.principal, event).await
    }

    async fn get(&self, event_id: EventId) -> Result<Event> {
        self.events.get(&self.principal, event_id).await
    }

    async fn list(&self, selector: &EventSelector) -> Result<Vec<Event>> {
        self.events.list(&self.principal, selector).await
    }

    async fn cancel(&self, event_id: EventId) -> Result<()> {
        self.events.cancel(&self.principal, event_id).await
    }
}

#[async_trait]
impl WorkersClient for LocalApiClient {
    async fn start(&self, event_id: EventId) -> Result<()> {
        self.workers.start(&self.principal, event_id).await
    }

    async fn get_status(&self, event_id: EventId) -> Result<WorkloadStatus> {
        self.workers.get_status(&self.principal, event_id).await
    }

    async fn update_status(
        &self,
        event_id: EventId,
        status: WorkloadStatus,
    ) -> Result<WorkloadStatus> {
        self.workers
            .update_status(&self.principal, event_id, status)
            .await
    }

    async fn cleanup(&self, event_id: EventId) -> Result<()> {
        self.workers.cleanup(&self.principal, event_id).await
    }

    async fn timeout(&self, event_id: EventId) -> Result<()> {
        self.workers.timeout(&self.principal, event_id).await
    }
}

#[async_trait]
impl JobsClient for LocalApiClient {
    async fn create(&self, event_id: EventId, job_name: &str, spec: JobSpec) -> Result<()> {
        self.jobs
            .create(
                &self.principal,
                event_id,
                NewJob {
                    name: job_name.to_string(),
                    spec,
                },
            )
            .await
    }

    async fn start(&self, event_id: EventId, job_name: &str) -> Result<()> {
        self.jobs.start(&self.principal, event_id, job_name).await
    }

    async fn get_status(&self, event_id: EventId, job_name: &str) -> Result<WorkloadStatus> {
        self.jobs
            .get_status(&self.principal, event_id, job_name)
            .await
    }

    async fn update_status(
        &self,
        event_id: EventId,
        job_name: &str,
        status: WorkloadStatus,
    ) -> Result<WorkloadStatus> {
        self.jobs
            .update_status(&self.principal, event_id, job_name, status)
            .await
    }

    async fn cleanup(&self, event_id: EventId, job_name: &str) -> Result<()> {
        self.jobs.cleanup(&self.principal, event_id, job_name).await
    }

    async fn timeout(&self, event_id: EventId, job_name: &str) -> Result<()> {
        self.jobs.timeout(&self.principal, event_id, job_name).await
    }
}
