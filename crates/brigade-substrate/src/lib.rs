//! # brigade-substrate
//!
//! The abstract cluster behind the Brigade control plane.
//!
//! The substrate materializes Worker and Job workloads (pods plus their
//! secrets and volumes) and exposes a label-filtered pod watch. Workload
//! names derive purely from Event IDs ([`brigade_core::naming`]), so every
//! create operation is idempotent: recreating an existing workload is a
//! success, not an error.
//!
//! The production implementation wraps a Kubernetes client; that plumbing
//! lives outside this repository. [`fake::FakeSubstrate`] implements the
//! same contract in memory for tests and local development.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod fake;

pub use fake::FakeSubstrate;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use brigade_core::{Event, EventId, JobSpec, Project, Result};

/// Phase of a pod as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PodPhase {
    /// The pod has been accepted but its containers are not all running.
    Pending,
    /// All containers are running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container terminated in failure.
    Failed,
}

impl PodPhase {
    /// Returns true if the pod has finished executing.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A point-in-time snapshot of one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    /// The pod's namespace.
    pub namespace: String,
    /// The pod's name.
    pub name: String,
    /// The pod's labels.
    pub labels: BTreeMap<String, String>,
    /// The pod's phase.
    pub phase: PodPhase,
}

impl PodSnapshot {
    /// The label value under `key`, if present.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// One element of a pod watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    /// A pod matching the selector appeared (including pods that existed
    /// when the watch started).
    Added(PodSnapshot),
    /// A matching pod changed.
    Modified(PodSnapshot),
    /// A matching pod was deleted. The snapshot is the pod's last known
    /// state.
    Deleted(PodSnapshot),
    /// The watch transport was lost and re-established; the payload is a
    /// fresh listing of all matching pods. Consumers reconcile against it.
    Resync(Vec<PodSnapshot>),
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Creates an empty selector (matches every pod).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `key == value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns true if `labels` satisfies every requirement.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// A lazy, restartable sequence of pod events.
#[async_trait]
pub trait PodEventStream: Send {
    /// Waits for and returns the next event.
    ///
    /// # Errors
    ///
    /// Returns [`brigade_core::Error::BackendUnavailable`] if the watch
    /// cannot be re-established; consumers treat that as fatal.
    async fn next(&mut self) -> Result<PodEvent>;
}

/// The cluster contract.
///
/// All create and delete operations are idempotent; the scheduler and the
/// API server retry them freely under at-least-once queue delivery.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Materializes an Event's Worker: workspace volume, event secret, and
    /// Worker pod, all named by the Event ID. Success if they already
    /// exist.
    async fn create_worker(&self, project: &Project, event: &Event) -> Result<()>;

    /// Materializes a Job pod and its environment secret, named by
    /// `(event ID, job name)`. Success if they already exist.
    async fn create_job(
        &self,
        project: &Project,
        event: &Event,
        job_name: &str,
        spec: &JobSpec,
    ) -> Result<()>;

    /// Deletes an Event's Worker workload artifacts. Success if already
    /// gone.
    async fn delete_worker(&self, event_id: EventId) -> Result<()>;

    /// Deletes a Job's workload artifacts. Success if already gone.
    async fn delete_job(&self, event_id: EventId, job_name: &str) -> Result<()>;

    /// Opens a pod watch filtered by `selector`. The stream begins with
    /// `Added` events for all currently matching pods.
    async fn watch_pods(&self, selector: LabelSelector) -> Result<Box<dyn PodEventStream>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_on_all_requirements() {
        let selector = LabelSelector::new()
            .with("brigade.sh/component", "worker")
            .with("brigade.sh/project", "blue-book");

        let mut labels = BTreeMap::new();
        labels.insert("brigade.sh/component".to_string(), "worker".to_string());
        assert!(!selector.matches(&labels));

        labels.insert("brigade.sh/project".to_string(), "blue-book".to_string());
        assert!(selector.matches(&labels));

        labels.insert("extra".to_string(), "ignored".to_string());
        assert!(selector.matches(&labels));
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(LabelSelector::new().matches(&BTreeMap::new()));
    }

    #[test]
    fn pod_phase_terminality() {
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
        assert!(!PodPhase::Pending.is_terminal());
    }
}
