//! Shared wiring for tests: every service over in-memory backends.
//!
//! Used by this crate's unit tests and by the cross-component scenario
//! tests; not part of the production surface.

use std::sync::Arc;

use brigade_core::{
    Event, EventId, NewEvent, Phase, Principal, Project, ProjectId, WorkloadStatus,
};
use brigade_queue::memory::InMemoryQueueConfig;
use brigade_queue::InMemoryQueueBackend;
use brigade_substrate::{FakeSubstrate, Substrate as _};

use crate::auth::{Authorizer, ComponentTokens, TokenResolver};
use crate::events::EventsService;
use crate::jobs::JobsService;
use crate::local::LocalApiClient;
use crate::projects::ProjectsService;
use crate::roles::RolesService;
use crate::server::{AppState, VERSION};
use crate::store::memory::InMemoryStore;
use crate::store::ProjectsStore;
use crate::watch::StatusWatchHub;
use crate::workers::WorkersService;

/// Root bearer token accepted by harness-built app state.
pub const TEST_ROOT_TOKEN: &str = "test-root-token";
/// Scheduler bearer token accepted by harness-built app state.
pub const TEST_SCHEDULER_TOKEN: &str = "test-scheduler-token";
/// Observer bearer token accepted by harness-built app state.
pub const TEST_OBSERVER_TOKEN: &str = "test-observer-token";

/// All services wired over a shared in-memory store, queue backend, and
/// fake substrate.
pub struct TestHarness {
    /// The shared store (implements every store trait).
    pub store: Arc<InMemoryStore>,
    /// The shared queue backend.
    pub queues: Arc<InMemoryQueueBackend>,
    /// The shared fake substrate.
    pub substrate: Arc<FakeSubstrate>,
    /// The status watch hub.
    pub watch_hub: Arc<StatusWatchHub>,
    /// The authorizer.
    pub authorizer: Arc<Authorizer>,
    /// Events service.
    pub events_service: Arc<EventsService>,
    /// Workers service.
    pub workers_service: Arc<WorkersService>,
    /// Jobs service.
    pub jobs_service: Arc<JobsService>,
    /// Projects service.
    pub projects_service: Arc<ProjectsService>,
    /// Role-assignments service.
    pub roles_service: Arc<RolesService>,
}

impl TestHarness {
    /// Builds a harness with default queue tuning.
    pub async fn new() -> Self {
        Self::with_queue_config(InMemoryQueueConfig::default())
    }

    /// Builds a harness with explicit queue tuning (tests that exercise
    /// redelivery want short backoffs).
    #[must_use]
    pub fn with_queue_config(queue_config: InMemoryQueueConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let queues = Arc::new(InMemoryQueueBackend::new(queue_config));
        let substrate = Arc::new(FakeSubstrate::new());
        let watch_hub = Arc::new(StatusWatchHub::new());
        let authorizer = Arc::new(Authorizer::new(store.clone()));

        let events_service = Arc::new(EventsService::new(
            store.clone(),
            store.clone(),
            queues.clone(),
            authorizer.clone(),
            watch_hub.clone(),
        ));
        let workers_service = Arc::new(WorkersService::new(
            store.clone(),
            substrate.clone(),
            authorizer.clone(),
            watch_hub.clone(),
        ));
        let jobs_service = Arc::new(JobsService::new(
            store.clone(),
            queues.clone(),
            substrate.clone(),
            authorizer.clone(),
            watch_hub.clone(),
        ));
        let projects_service = Arc::new(ProjectsService::new(store.clone(), authorizer.clone()));
        let roles_service = Arc::new(RolesService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            authorizer.clone(),
        ));

        Self {
            store,
            queues,
            substrate,
            watch_hub,
            authorizer,
            events_service,
            workers_service,
            jobs_service,
            projects_service,
            roles_service,
        }
    }

    /// Builds an in-process client acting as `principal`.
    #[must_use]
    pub fn local_client(&self, principal: Principal) -> Arc<LocalApiClient> {
        Arc::new(LocalApiClient::new(
            principal,
            self.events_service.clone(),
            self.workers_service.clone(),
            self.jobs_service.clone(),
            self.projects_service.clone(),
        ))
    }

    /// Builds HTTP application state over this harness, accepting the
    /// `TEST_*_TOKEN` bearer tokens.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        let token_resolver = Arc::new(TokenResolver::new(
            ComponentTokens::new(
                Some(TEST_ROOT_TOKEN),
                TEST_SCHEDULER_TOKEN,
                TEST_OBSERVER_TOKEN,
            ),
            self.store.clone(),
            self.store.clone(),
        ));
        AppState {
            version: VERSION,
            token_resolver,
            events: self.events_service.clone(),
            workers: self.workers_service.clone(),
            jobs: self.jobs_service.clone(),
            projects: self.projects_service.clone(),
            roles: self.roles_service.clone(),
        }
    }

    /// Creates a default Project with the given ID (idempotent).
    pub async fn seed_project(&self, id: &str) -> ProjectId {
        let project_id = ProjectId::new(id).expect("valid project id");
        let _ = ProjectsStore::create(&*self.store, Project::new(project_id.clone())).await;
        project_id
    }

    /// Inserts a fully specified Project.
    pub async fn seed_custom_project(&self, project: Project) {
        ProjectsStore::create(&*self.store, project)
            .await
            .expect("project insert");
    }

    /// Creates an Event in the given project (created on demand) through
    /// the real service path, as root.
    pub async fn seed_event(&self, project: &str) -> Event {
        let project_id = self.seed_project(project).await;
        self.events_service
            .create(
                &Principal::Root,
                NewEvent {
                    project_id,
                    source: "test-gateway".to_string(),
                    event_type: "exec".to_string(),
                    payload: Vec::new(),
                },
            )
            .await
            .expect("event creation")
    }

    /// Materializes the Event's Worker workload on the fake substrate.
    pub async fn launch_worker(&self, event: &Event) {
        let project = ProjectsStore::get(&*self.store, &event.project_id)
            .await
            .expect("project present");
        self.substrate
            .create_worker(&project, event)
            .await
            .expect("workload creation");
    }

    /// Walks the Worker along the happy path until it reaches `target`
    /// (one of `STARTING`, `RUNNING`, `SUCCEEDED`, `FAILED`).
    pub async fn drive_worker_to(&self, event_id: EventId, target: Phase) {
        let mut current = self
            .workers_service
            .get_status(&Principal::Observer, event_id)
            .await
            .expect("worker status")
            .phase;
        while current != target {
            current = match current {
                Phase::Pending => {
                    self.workers_service
                        .start(&Principal::Scheduler, event_id)
                        .await
                        .expect("worker start");
                    Phase::Starting
                }
                Phase::Starting => {
                    self.workers_service
                        .update_status(
                            &Principal::Observer,
                            event_id,
                            WorkloadStatus::with_phase(Phase::Running),
                        )
                        .await
                        .expect("worker running");
                    Phase::Running
                }
                Phase::Running => {
                    self.workers_service
                        .update_status(
                            &Principal::Observer,
                            event_id,
                            WorkloadStatus::with_phase(target),
                        )
                        .await
                        .expect("worker terminal");
                    target
                }
                other => panic!("cannot drive worker from {other} to {target}"),
            };
        }
    }
}
