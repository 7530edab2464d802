//! Projects: configuration, secrets, and authorization scope for a stream
//! of Events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::ProjectId;
use crate::worker::WorkerSpec;

/// Default per-project cap on concurrently starting/running Workers.
pub const DEFAULT_WORKER_LIMIT: u32 = 1;

/// Project-level specification applied to every Event's Worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Template for Workers created for this Project's Events.
    pub worker_template: WorkerSpec,
    /// Admission window: the maximum number of this Project's Workers that
    /// may be `STARTING` or `RUNNING` at once.
    #[serde(default = "default_worker_limit")]
    pub worker_limit: u32,
}

fn default_worker_limit() -> u32 {
    DEFAULT_WORKER_LIMIT
}

impl Default for ProjectSpec {
    fn default() -> Self {
        Self {
            worker_template: WorkerSpec::default(),
            worker_limit: DEFAULT_WORKER_LIMIT,
        }
    }
}

/// A Project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Stable, user-chosen identifier.
    pub id: ProjectId,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Worker defaults and admission configuration.
    #[serde(default)]
    pub spec: ProjectSpec,
    /// Opaque key/value secrets mounted into the Project's Workers.
    /// Write-only: never serialized into API responses.
    #[serde(default, skip_serializing)]
    pub secrets: BTreeMap<String, String>,
}

impl Project {
    /// Creates a project with default spec and no secrets.
    #[must_use]
    pub fn new(id: ProjectId) -> Self {
        Self {
            id,
            description: None,
            spec: ProjectSpec::default(),
            secrets: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_never_serialized() {
        let mut project = Project::new(ProjectId::new("blue-book").unwrap());
        project
            .secrets
            .insert("githubToken".to_string(), "hunter2".to_string());
        let json = serde_json::to_string(&project).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("secrets"));
    }

    #[test]
    fn worker_limit_defaults_when_absent() {
        let project: Project =
            serde_json::from_str(r#"{"id":"blue-book","spec":{"workerTemplate":{"image":"w"}}}"#)
                .unwrap();
        assert_eq!(project.spec.worker_limit, DEFAULT_WORKER_LIMIT);
    }
}
