//! # brigade-client
//!
//! The collaborator interfaces through which the scheduler and observer
//! talk to the API server, plus a REST implementation of each.
//!
//! The traits are the contract: tests hand the scheduler and observer
//! fakes (or in-process adapters over the real services), and production
//! binaries hand them [`rest::RestApiClient`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod rest;

pub use rest::RestApiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use brigade_core::{
    Event, EventId, EventSelector, JobSpec, NewEvent, Project, ProjectId, Result, WorkloadStatus,
};

/// Response of the versioned ping endpoint. The `Version` field name is
/// part of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    /// The API server's version string.
    #[serde(rename = "Version")]
    pub version: String,
}

/// Liveness checks against the API server.
#[async_trait]
pub trait HealthcheckClient: Send + Sync {
    /// Pings the versioned liveness endpoint.
    async fn ping(&self) -> Result<PingResponse>;
}

/// Read access to Projects.
#[async_trait]
pub trait ProjectsClient: Send + Sync {
    /// Lists all Projects.
    async fn list(&self) -> Result<Vec<Project>>;

    /// Fetches one Project.
    async fn get(&self, project_id: &ProjectId) -> Result<Project>;
}

/// Access to Events.
#[async_trait]
pub trait EventsClient: Send + Sync {
    /// Creates an Event, returning it with its assigned ID.
    async fn create(&self, event: NewEvent) -> Result<Event>;

    /// Fetches one Event.
    async fn get(&self, event_id: EventId) -> Result<Event>;

    /// Lists Events matching the selector.
    async fn list(&self, selector: &EventSelector) -> Result<Vec<Event>>;

    /// Cancels an Event: `PENDING` Workers become `CANCELED`, started ones
    /// become `ABORTED`.
    async fn cancel(&self, event_id: EventId) -> Result<()>;
}

/// Operations on an Event's Worker.
#[async_trait]
pub trait WorkersClient: Send + Sync {
    /// Claims a `PENDING` Worker for launch (`PENDING -> STARTING`).
    async fn start(&self, event_id: EventId) -> Result<()>;

    /// Fetches the Worker's current status.
    async fn get_status(&self, event_id: EventId) -> Result<WorkloadStatus>;

    /// Reports an observed status; the server applies it under the phase
    /// graph and returns the committed status.
    async fn update_status(&self, event_id: EventId, status: WorkloadStatus)
        -> Result<WorkloadStatus>;

    /// Deletes the Worker's workload artifacts. Valid only in a terminal
    /// phase; idempotent.
    async fn cleanup(&self, event_id: EventId) -> Result<()>;

    /// Forces a non-terminal Worker to `TIMED_OUT`.
    async fn timeout(&self, event_id: EventId) -> Result<()>;
}

/// Operations on an Event's Jobs.
#[async_trait]
pub trait JobsClient: Send + Sync {
    /// Creates a Job under a `RUNNING` Worker.
    async fn create(&self, event_id: EventId, job_name: &str, spec: JobSpec) -> Result<()>;

    /// Claims a `PENDING` Job for launch (`PENDING -> STARTING`).
    async fn start(&self, event_id: EventId, job_name: &str) -> Result<()>;

    /// Fetches the Job's current status.
    async fn get_status(&self, event_id: EventId, job_name: &str) -> Result<WorkloadStatus>;

    /// Reports an observed status; the server applies it under the phase
    /// graph and returns the committed status.
    async fn update_status(
        &self,
        event_id: EventId,
        job_name: &str,
        status: WorkloadStatus,
    ) -> Result<WorkloadStatus>;

    /// Deletes the Job's workload artifacts. Valid only in a terminal
    /// phase; idempotent.
    async fn cleanup(&self, event_id: EventId, job_name: &str) -> Result<()>;

    /// Forces a non-terminal Job to `TIMED_OUT`.
    async fn timeout(&self, event_id: EventId, job_name: &str) -> Result<()>;
}
