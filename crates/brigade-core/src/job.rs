//! Jobs: subordinate workloads spawned by a running Worker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::validate_dns_label;
use crate::status::WorkloadStatus;
use crate::Result;

/// A single container within a Job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// OCI image reference.
    pub image: String,
    /// Command to run in the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Environment variables. Values are mounted through the Job secret so
    /// they never appear in the pod manifest.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

/// Host requirements for a Job's pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHost {
    /// Required operating system (`linux` or `windows`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Node selector labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

/// Specification of a Job's workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// The Job's primary container.
    pub primary_container: ContainerSpec,
    /// Sidecar containers, keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sidecar_containers: BTreeMap<String, ContainerSpec>,
    /// Host requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<JobHost>,
    /// Wall-clock budget for the Job. `None` means the Job is never swept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// A Job: zero or more per Worker, keyed by a name unique within the
/// Worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// The Job's workload specification.
    pub spec: JobSpec,
    /// Current observed status.
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Job {
    /// Creates a pending Job from a spec.
    #[must_use]
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            status: WorkloadStatus::pending(),
        }
    }
}

/// A Worker's request to create a Job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    /// Name for the Job, unique within its Worker.
    pub name: String,
    /// The Job's workload specification.
    pub spec: JobSpec,
}

/// Validates a Job name.
///
/// Job names are embedded in pod and secret names, so they are held to the
/// same DNS-label rules as project IDs.
pub fn validate_job_name(name: &str) -> Result<()> {
    validate_dns_label("job name", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_follow_dns_label_rules() {
        assert!(validate_job_name("build-and-test").is_ok());
        assert!(validate_job_name("Build").is_err());
        assert!(validate_job_name("").is_err());
        assert!(validate_job_name("-x").is_err());
    }

    #[test]
    fn sidecars_are_ordered_by_name() {
        let mut spec = JobSpec {
            primary_container: ContainerSpec::default(),
            sidecar_containers: BTreeMap::new(),
            host: None,
            timeout_seconds: None,
        };
        spec.sidecar_containers
            .insert("zeta".to_string(), ContainerSpec::default());
        spec.sidecar_containers
            .insert("alpha".to_string(), ContainerSpec::default());
        let names: Vec<_> = spec.sidecar_containers.keys().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
