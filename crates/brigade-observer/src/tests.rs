//! Observer behavior tests against collaborator fakes and the fake
//! substrate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use brigade_client::{
    EventsClient, HealthcheckClient, JobsClient, PingResponse, ProjectsClient, WorkersClient,
};
use brigade_core::naming::worker_pod_name;
use brigade_core::{
    Error, Event, EventId, EventSelector, Job, JobSpec, NewEvent, Phase, Project, ProjectId,
    Result, Worker, WorkerSpec, WorkloadStatus,
};
use brigade_substrate::{FakeSubstrate, PodPhase, Substrate};

use crate::{Observer, ObserverConfig};

/// Fake control plane recording everything the observer does.
#[derive(Default)]
struct FakeControlPlane {
    ping_fails: AtomicBool,
    events: Mutex<HashMap<EventId, Event>>,
    worker_updates: Mutex<Vec<(EventId, Phase)>>,
    job_updates: Mutex<Vec<(EventId, String, Phase)>>,
    worker_cleanups: Mutex<Vec<EventId>>,
    job_cleanups: Mutex<Vec<(EventId, String)>>,
    worker_timeouts: Mutex<Vec<EventId>>,
    job_timeouts: Mutex<Vec<(EventId, String)>>,
}

impl FakeControlPlane {
    fn seed_event(&self, event: Event) {
        self.events.lock().unwrap().insert(event.id, event);
    }

    fn worker_phases(&self, event_id: EventId) -> Vec<Phase> {
        self.worker_updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == event_id)
            .map(|(_, phase)| *phase)
            .collect()
    }
}

#[async_trait]
impl HealthcheckClient for FakeControlPlane {
    async fn ping(&self) -> Result<PingResponse> {
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(Error::backend("api server unreachable"));
        }
        Ok(PingResponse {
            version: "test".to_string(),
        })
    }
}

#[async_trait]
impl ProjectsClient for FakeControlPlane {
    async fn list(&self) -> Result<Vec<Project>> {
        Ok(Vec::new())
    }

    async fn get(&self, project_id: &ProjectId) -> Result<Project> {
        Err(Error::not_found("Project", project_id))
    }
}

#[async_trait]
impl EventsClient for FakeControlPlane {
    async fn create(&self, _event: NewEvent) -> Result<Event> {
        unimplemented!("the observer never creates events")
    }

    async fn get(&self, event_id: EventId) -> Result<Event> {
        self.events
            .lock()
            .unwrap()
            .get(&event_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Event", event_id))
    }

    async fn list(&self, selector: &EventSelector) -> Result<Vec<Event>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|event| selector.matches(event))
            .cloned()
            .collect())
    }

    async fn cancel(&self, _event_id: EventId) -> Result<()> {
        unimplemented!("the observer never cancels events")
    }
}

#[async_trait]
impl WorkersClient for FakeControlPlane {
    async fn start(&self, _event_id: EventId) -> Result<()> {
        unimplemented!("the observer never starts workers")
    }

    async fn get_status(&self, event_id: EventId) -> Result<WorkloadStatus> {
        EventsClient::get(self, event_id)
            .await
            .map(|e| e.worker.status)
    }

    async fn update_status(
        &self,
        event_id: EventId,
        status: WorkloadStatus,
    ) -> Result<WorkloadStatus> {
        self.worker_updates
            .lock()
            .unwrap()
            .push((event_id, status.phase));
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.get_mut(&event_id) {
            event.worker.status.phase = status.phase;
        }
        Ok(status)
    }

    async fn cleanup(&self, event_id: EventId) -> Result<()> {
        self.worker_cleanups.lock().unwrap().push(event_id);
        Ok(())
    }

    async fn timeout(&self, event_id: EventId) -> Result<()> {
        self.worker_timeouts.lock().unwrap().push(event_id);
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.get_mut(&event_id) {
            event.worker.status.phase = Phase::TimedOut;
        }
        Ok(())
    }
}

#[async_trait]
impl JobsClient for FakeControlPlane {
    async fn create(&self, _event_id: EventId, _job_name: &str, _spec: JobSpec) -> Result<()> {
        unimplemented!("the observer never creates jobs")
    }

    async fn start(&self, _event_id: EventId, _job_name: &str) -> Result<()> {
        unimplemented!("the observer never starts jobs")
    }

    async fn get_status(&self, _event_id: EventId, _job_name: &str) -> Result<WorkloadStatus> {
        unimplemented!("unused in these tests")
    }

    async fn update_status(
        &self,
        event_id: EventId,
        job_name: &str,
        status: WorkloadStatus,
    ) -> Result<WorkloadStatus> {
        self.job_updates
            .lock()
            .unwrap()
            .push((event_id, job_name.to_string(), status.phase));
        Ok(status)
    }

    async fn cleanup(&self, event_id: EventId, job_name: &str) -> Result<()> {
        self.job_cleanups
            .lock()
            .unwrap()
            .push((event_id, job_name.to_string()));
        Ok(())
    }

    async fn timeout(&self, event_id: EventId, job_name: &str) -> Result<()> {
        self.job_timeouts
            .lock()
            .unwrap()
            .push((event_id, job_name.to_string()));
        Ok(())
    }
}

fn fast_config() -> ObserverConfig {
    ObserverConfig {
        healthcheck_interval: Duration::from_millis(20),
        delay_before_cleanup: Duration::from_millis(50),
        timeout_sweep_interval: Duration::from_millis(20),
    }
}

fn observer_over(api: Arc<FakeControlPlane>, substrate: Arc<FakeSubstrate>) -> Arc<Observer> {
    Observer::new(
        fast_config(),
        api.clone(),
        api.clone(),
        api.clone(),
        api,
        substrate,
    )
}

fn test_event(project: &Project) -> Event {
    Event {
        id: EventId::generate(),
        project_id: project.id.clone(),
        source: "test-gateway".to_string(),
        event_type: "exec".to_string(),
        payload: Vec::new(),
        created_at: Utc::now(),
        worker: Worker::new(WorkerSpec::default()),
    }
}

/// Polls `condition` until it holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[test]
fn from_env_requires_api_address_and_token() {
    // The only test in this binary touching these variables.
    std::env::remove_var("API_ADDRESS");
    std::env::remove_var("API_TOKEN");
    assert!(Observer::from_env(Arc::new(FakeSubstrate::new())).is_err());

    std::env::set_var("API_ADDRESS", "http://127.0.0.1:9");
    std::env::set_var("API_TOKEN", "observer-token");
    assert!(Observer::from_env(Arc::new(FakeSubstrate::new())).is_ok());
    std::env::remove_var("API_ADDRESS");
    std::env::remove_var("API_TOKEN");
}

#[tokio::test]
async fn healthcheck_failure_is_fatal_and_shutdown_is_bounded() {
    let api = Arc::new(FakeControlPlane::default());
    api.ping_fails.store(true, Ordering::SeqCst);
    let observer = observer_over(api, Arc::new(FakeSubstrate::new()));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let started = tokio::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(5), observer.run(shutdown_rx))
        .await
        .expect("observer must exit on its own");

    assert!(result.is_err(), "ping failure must surface as an error");
    // Healthcheck interval + the 3s drain grace, with headroom.
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn running_pod_is_reported_as_running() {
    let api = Arc::new(FakeControlPlane::default());
    let substrate = Arc::new(FakeSubstrate::new());
    let project = Project::new(ProjectId::new("blue-book").unwrap());
    let event = test_event(&project);
    api.seed_event(event.clone());
    substrate.create_worker(&project, &event).await.unwrap();

    let observer = observer_over(api.clone(), substrate.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(observer.run(shutdown_rx));

    substrate.set_pod_phase(&worker_pod_name(event.id), PodPhase::Running);
    wait_until(
        || api.worker_phases(event.id).contains(&Phase::Running),
        "worker reported RUNNING",
    )
    .await;

    let _ = shutdown_tx.send(true);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn terminal_pod_is_cleaned_up_exactly_once_after_the_delay() {
    let api = Arc::new(FakeControlPlane::default());
    let substrate = Arc::new(FakeSubstrate::new());
    let project = Project::new(ProjectId::new("blue-book").unwrap());
    let event = test_event(&project);
    api.seed_event(event.clone());
    substrate.create_worker(&project, &event).await.unwrap();

    let observer = observer_over(api.clone(), substrate.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(observer.run(shutdown_rx));

    // Duplicate terminal events, as a real watch delivers.
    substrate.set_pod_phase(&worker_pod_name(event.id), PodPhase::Succeeded);
    substrate.set_pod_phase(&worker_pod_name(event.id), PodPhase::Succeeded);

    wait_until(
        || !api.worker_cleanups.lock().unwrap().is_empty(),
        "worker cleanup requested",
    )
    .await;
    // Give a would-be duplicate cleanup time to fire, then check it
    // did not.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(*api.worker_cleanups.lock().unwrap(), vec![event.id]);

    let _ = shutdown_tx.send(true);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn pod_deleted_while_running_marks_the_worker_unknown() {
    let api = Arc::new(FakeControlPlane::default());
    let substrate = Arc::new(FakeSubstrate::new());
    let project = Project::new(ProjectId::new("blue-book").unwrap());
    let event = test_event(&project);
    api.seed_event(event.clone());
    substrate.create_worker(&project, &event).await.unwrap();

    let observer = observer_over(api.clone(), substrate.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(observer.run(shutdown_rx));

    substrate.set_pod_phase(&worker_pod_name(event.id), PodPhase::Running);
    wait_until(
        || api.worker_phases(event.id).contains(&Phase::Running),
        "worker reported RUNNING",
    )
    .await;

    substrate.delete_pod_out_of_band(&worker_pod_name(event.id));
    wait_until(
        || api.worker_phases(event.id).contains(&Phase::Unknown),
        "worker reported UNKNOWN",
    )
    .await;

    let _ = shutdown_tx.send(true);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn sweep_times_out_overdue_workers_and_jobs() {
    let api = Arc::new(FakeControlPlane::default());
    let substrate = Arc::new(FakeSubstrate::new());
    let project = Project::new(ProjectId::new("blue-book").unwrap());

    let mut overdue = test_event(&project);
    overdue.worker.spec.timeout_seconds = Some(1);
    overdue.worker.status.phase = Phase::Running;
    overdue.worker.status.started_at = Some(Utc::now() - chrono::Duration::seconds(5));
    let mut job = Job::new(JobSpec {
        primary_container: Default::default(),
        sidecar_containers: Default::default(),
        host: None,
        timeout_seconds: Some(1),
    });
    job.status.phase = Phase::Running;
    job.status.started_at = Some(Utc::now() - chrono::Duration::seconds(5));
    overdue.worker.jobs.insert("build".to_string(), job);

    let mut within_budget = test_event(&project);
    within_budget.worker.spec.timeout_seconds = Some(3600);
    within_budget.worker.status.phase = Phase::Running;
    within_budget.worker.status.started_at = Some(Utc::now());

    let mut no_budget = test_event(&project);
    no_budget.worker.status.phase = Phase::Running;
    no_budget.worker.status.started_at = Some(Utc::now() - chrono::Duration::days(2));

    api.seed_event(overdue.clone());
    api.seed_event(within_budget.clone());
    api.seed_event(no_budget.clone());

    let observer = observer_over(api.clone(), substrate);
    observer.sweep_timeouts(Utc::now()).await.unwrap();

    assert_eq!(*api.worker_timeouts.lock().unwrap(), vec![overdue.id]);
    assert_eq!(
        *api.job_timeouts.lock().unwrap(),
        vec![(overdue.id, "build".to_string())]
    );
}
