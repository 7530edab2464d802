//! Workers: the top-level workload of an Event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::status::WorkloadStatus;

/// Specification of a Worker's workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// OCI image reference for the worker container.
    pub image: String,
    /// Command to run in the worker container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Size of the shared workspace volume (e.g. `10Gi`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_size: Option<String>,
    /// Wall-clock budget for the Worker, after which the observer times it
    /// out. `None` means the Worker is never swept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self {
            image: String::from("brigadecore/brigade2-worker:latest"),
            command: Vec::new(),
            workspace_size: None,
            timeout_seconds: None,
        }
    }
}

/// A Worker: exactly one per Event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    /// The Worker's workload specification.
    pub spec: WorkerSpec,
    /// Current observed status.
    #[serde(default)]
    pub status: WorkloadStatus,
    /// Jobs spawned by this Worker, keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub jobs: BTreeMap<String, Job>,
}

impl Worker {
    /// Creates a pending Worker from a spec.
    #[must_use]
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            status: WorkloadStatus::pending(),
            jobs: BTreeMap::new(),
        }
    }
}
