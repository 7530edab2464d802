//! In-memory substrate for tests and local development.
//!
//! Tracks workloads as the cluster would and lets tests drive pod phase
//! changes and deletions, observing the resulting watch events exactly as
//! the observer does against a real cluster.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use brigade_core::naming::{
    event_secret_name, job_labels, job_pod_name, job_secret_name, worker_labels, worker_pod_name,
    workspace_volume_name,
};
use brigade_core::{Error, Event, EventId, JobSpec, Project, Result};

use crate::{LabelSelector, PodEvent, PodEventStream, PodPhase, PodSnapshot, Substrate};

/// The namespace the fake substrate places all workloads in.
pub const FAKE_NAMESPACE: &str = "brigade";

const WATCH_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct FakeState {
    pods: HashMap<String, PodSnapshot>,
    volumes: HashSet<String>,
    secrets: HashSet<String>,
    worker_create_calls: HashMap<String, u32>,
    job_create_calls: HashMap<String, u32>,
    failures_to_inject: u32,
}

/// In-memory [`Substrate`] implementation.
#[derive(Debug, Clone)]
pub struct FakeSubstrate {
    state: Arc<Mutex<FakeState>>,
    events: broadcast::Sender<PodEvent>,
}

impl Default for FakeSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSubstrate {
    /// Creates an empty fake substrate.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake substrate lock poisoned")
    }

    fn emit(&self, event: PodEvent) {
        // No receivers is fine; watches may not have started yet.
        let _ = self.events.send(event);
    }

    /// Makes the next `count` create calls fail with
    /// [`Error::BackendUnavailable`].
    pub fn fail_next_creates(&self, count: u32) {
        self.lock().failures_to_inject = count;
    }

    /// How many times `create_worker` was invoked for the Event
    /// (idempotent replays included).
    #[must_use]
    pub fn worker_create_calls(&self, event_id: EventId) -> u32 {
        self.lock()
            .worker_create_calls
            .get(&worker_pod_name(event_id))
            .copied()
            .unwrap_or(0)
    }

    /// How many times `create_job` was invoked for the Job.
    #[must_use]
    pub fn job_create_calls(&self, event_id: EventId, job_name: &str) -> u32 {
        self.lock()
            .job_create_calls
            .get(&job_pod_name(event_id, job_name))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the current snapshot of a pod, if it exists.
    #[must_use]
    pub fn pod(&self, name: &str) -> Option<PodSnapshot> {
        self.lock().pods.get(name).cloned()
    }

    /// Returns true if the Event's workspace volume exists.
    #[must_use]
    pub fn has_workspace_volume(&self, event_id: EventId) -> bool {
        self.lock().volumes.contains(&workspace_volume_name(event_id))
    }

    /// Drives a pod to a new phase, emitting a `Modified` watch event.
    ///
    /// # Panics
    ///
    /// Panics if the pod does not exist; tests drive only pods they
    /// created.
    pub fn set_pod_phase(&self, name: &str, phase: PodPhase) {
        let snapshot = {
            let mut state = self.lock();
            let pod = state
                .pods
                .get_mut(name)
                .unwrap_or_else(|| panic!("no such pod: {name}"));
            pod.phase = phase;
            pod.clone()
        };
        self.emit(PodEvent::Modified(snapshot));
    }

    /// Deletes a pod out from under the control plane (as a node failure
    /// or manual `kubectl delete` would), emitting a `Deleted` event.
    pub fn delete_pod_out_of_band(&self, name: &str) {
        let snapshot = self.lock().pods.remove(name);
        if let Some(snapshot) = snapshot {
            self.emit(PodEvent::Deleted(snapshot));
        }
    }

    /// Severs all active watches, forcing each to resync against a fresh
    /// listing on its next poll.
    pub fn interrupt_watches(&self) {
        // Flood the broadcast channel so every receiver observes a lagged
        // error, which the stream surfaces as a resync.
        for _ in 0..=WATCH_BUFFER {
            self.emit(PodEvent::Resync(Vec::new()));
        }
    }

    fn take_injected_failure(state: &mut FakeState) -> Result<()> {
        if state.failures_to_inject > 0 {
            state.failures_to_inject -= 1;
            return Err(Error::backend("substrate temporarily unavailable"));
        }
        Ok(())
    }

    fn list_matching(&self, selector: &LabelSelector) -> Vec<PodSnapshot> {
        let state = self.lock();
        let mut pods: Vec<PodSnapshot> = state
            .pods
            .values()
            .filter(|p| selector.matches(&p.labels))
            .cloned()
            .collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));
        pods
    }
}

#[async_trait]
impl Substrate for FakeSubstrate {
    async fn create_worker(&self, project: &Project, event: &Event) -> Result<()> {
        let pod_name = worker_pod_name(event.id);
        let snapshot = {
            let mut state = self.lock();
            Self::take_injected_failure(&mut state)?;
            *state.worker_create_calls.entry(pod_name.clone()).or_insert(0) += 1;
            if state.pods.contains_key(&pod_name) {
                // Already materialized; names derive from the Event ID, so
                // a replayed create is a no-op.
                return Ok(());
            }
            state.volumes.insert(workspace_volume_name(event.id));
            state.secrets.insert(event_secret_name(event.id));
            let snapshot = PodSnapshot {
                namespace: FAKE_NAMESPACE.to_string(),
                name: pod_name.clone(),
                labels: worker_labels(project.id.as_str(), event.id),
                phase: PodPhase::Pending,
            };
            state.pods.insert(pod_name, snapshot.clone());
            snapshot
        };
        self.emit(PodEvent::Added(snapshot));
        Ok(())
    }

    async fn create_job(
        &self,
        project: &Project,
        event: &Event,
        job_name: &str,
        _spec: &JobSpec,
    ) -> Result<()> {
        let pod_name = job_pod_name(event.id, job_name);
        let snapshot = {
            let mut state = self.lock();
            Self::take_injected_failure(&mut state)?;
            *state.job_create_calls.entry(pod_name.clone()).or_insert(0) += 1;
            if state.pods.contains_key(&pod_name) {
                return Ok(());
            }
            state.secrets.insert(job_secret_name(event.id, job_name));
            let snapshot = PodSnapshot {
                namespace: FAKE_NAMESPACE.to_string(),
                name: pod_name.clone(),
                labels: job_labels(project.id.as_str(), event.id, job_name),
                phase: PodPhase::Pending,
            };
            state.pods.insert(pod_name, snapshot.clone());
            snapshot
        };
        self.emit(PodEvent::Added(snapshot));
        Ok(())
    }

    async fn delete_worker(&self, event_id: EventId) -> Result<()> {
        let pod_name = worker_pod_name(event_id);
        let snapshot = {
            let mut state = self.lock();
            state.volumes.remove(&workspace_volume_name(event_id));
            state.secrets.remove(&event_secret_name(event_id));
            state.pods.remove(&pod_name)
        };
        if let Some(snapshot) = snapshot {
            self.emit(PodEvent::Deleted(snapshot));
        }
        Ok(())
    }

    async fn delete_job(&self, event_id: EventId, job_name: &str) -> Result<()> {
        let pod_name = job_pod_name(event_id, job_name);
        let snapshot = {
            let mut state = self.lock();
            state.secrets.remove(&job_secret_name(event_id, job_name));
            state.pods.remove(&pod_name)
        };
        if let Some(snapshot) = snapshot {
            self.emit(PodEvent::Deleted(snapshot));
        }
        Ok(())
    }

    async fn watch_pods(&self, selector: LabelSelector) -> Result<Box<dyn PodEventStream>> {
        let backlog = self
            .list_matching(&selector)
            .into_iter()
            .map(PodEvent::Added)
            .collect();
        Ok(Box::new(FakePodStream {
            substrate: self.clone(),
            selector,
            backlog,
            rx: self.events.subscribe(),
        }))
    }
}

struct FakePodStream {
    substrate: FakeSubstrate,
    selector: LabelSelector,
    backlog: std::collections::VecDeque<PodEvent>,
    rx: broadcast::Receiver<PodEvent>,
}

#[async_trait]
impl PodEventStream for FakePodStream {
    async fn next(&mut self) -> Result<PodEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Ok(event);
            }
            match self.rx.recv().await {
                Ok(event) => {
                    let matches = match &event {
                        PodEvent::Added(p) | PodEvent::Modified(p) | PodEvent::Deleted(p) => {
                            self.selector.matches(&p.labels)
                        }
                        PodEvent::Resync(_) => false,
                    };
                    if matches {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Transport loss: re-list and hand the consumer a
                    // fresh snapshot to reconcile against.
                    return Ok(PodEvent::Resync(
                        self.substrate.list_matching(&self.selector),
                    ));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::backend("pod watch closed"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brigade_core::naming::{COMPONENT_WORKER, LABEL_COMPONENT};
    use brigade_core::{ProjectId, Worker, WorkerSpec};
    use chrono::Utc;

    fn test_project() -> Project {
        Project::new(ProjectId::new("blue-book").unwrap())
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

    fn worker_selector() -> LabelSelector {
        LabelSelector::new().with(LABEL_COMPONENT, COMPONENT_WORKER)
    }

    #[tokio::test]
    async fn create_worker_is_idempotent() {
        let substrate = FakeSubstrate::new();
        let project = test_project();
        let event = test_event(&project);

        substrate.create_worker(&project, &event).await.unwrap();
        substrate.create_worker(&project, &event).await.unwrap();

        assert_eq!(substrate.worker_create_calls(event.id), 2);
        assert!(substrate.pod(&worker_pod_name(event.id)).is_some());
        assert!(substrate.has_workspace_volume(event.id));
    }

    #[tokio::test]
    async fn delete_worker_is_idempotent() {
        let substrate = FakeSubstrate::new();
        let project = test_project();
        let event = test_event(&project);

        substrate.create_worker(&project, &event).await.unwrap();
        substrate.delete_worker(event.id).await.unwrap();
        substrate.delete_worker(event.id).await.unwrap();

        assert!(substrate.pod(&worker_pod_name(event.id)).is_none());
        assert!(!substrate.has_workspace_volume(event.id));
    }

    #[tokio::test]
    async fn watch_sees_existing_pods_then_changes() {
        let substrate = FakeSubstrate::new();
        let project = test_project();
        let event = test_event(&project);
        substrate.create_worker(&project, &event).await.unwrap();

        let mut watch = substrate.watch_pods(worker_selector()).await.unwrap();
        let first = watch.next().await.unwrap();
        assert!(matches!(first, PodEvent::Added(ref p) if p.name == worker_pod_name(event.id)));

        substrate.set_pod_phase(&worker_pod_name(event.id), PodPhase::Running);
        let second = watch.next().await.unwrap();
        assert!(
            matches!(second, PodEvent::Modified(ref p) if p.phase == PodPhase::Running),
            "unexpected event: {second:?}"
        );
    }

    #[tokio::test]
    async fn watch_filters_by_selector() {
        let substrate = FakeSubstrate::new();
        let project = test_project();
        let event = test_event(&project);
        substrate.create_worker(&project, &event).await.unwrap();
        substrate
            .create_job(&project, &event, "build", &JobSpec {
                primary_container: brigade_core::ContainerSpec::default(),
                sidecar_containers: Default::default(),
                host: None,
                timeout_seconds: None,
            })
            .await
            .unwrap();

        let mut watch = substrate.watch_pods(worker_selector()).await.unwrap();
        let first = watch.next().await.unwrap();
        assert!(matches!(first, PodEvent::Added(ref p) if p.name == worker_pod_name(event.id)));

        // The job pod never shows up on a worker-filtered watch.
        substrate.set_pod_phase(&job_pod_name(event.id, "build"), PodPhase::Running);
        substrate.set_pod_phase(&worker_pod_name(event.id), PodPhase::Running);
        let next = watch.next().await.unwrap();
        assert!(matches!(next, PodEvent::Modified(ref p) if p.name == worker_pod_name(event.id)));
    }

    #[tokio::test]
    async fn lagged_watch_resyncs_with_a_fresh_listing() {
        let substrate = FakeSubstrate::new();
        let project = test_project();
        let event = test_event(&project);
        substrate.create_worker(&project, &event).await.unwrap();

        let mut watch = substrate.watch_pods(worker_selector()).await.unwrap();
        assert!(matches!(watch.next().await.unwrap(), PodEvent::Added(_)));

        substrate.set_pod_phase(&worker_pod_name(event.id), PodPhase::Succeeded);
        substrate.interrupt_watches();

        // Whatever was missed, the resync listing reports the truth.
        loop {
            match watch.next().await.unwrap() {
                PodEvent::Resync(pods) => {
                    assert_eq!(pods.len(), 1);
                    assert_eq!(pods[0].phase, PodPhase::Succeeded);
                    break;
                }
                PodEvent::Modified(_) => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn injected_failures_surface_as_backend_unavailable() {
        let substrate = FakeSubstrate::new();
        let project = test_project();
        let event = test_event(&project);

        substrate.fail_next_creates(1);
        let err = substrate.create_worker(&project, &event).await.unwrap_err();
        assert!(err.is_transient());

        // The failure budget is spent; the retry succeeds.
        substrate.create_worker(&project, &event).await.unwrap();
    }
}
