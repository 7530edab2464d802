//! The Projects service.

use std::sync::Arc;

use brigade_core::{Error, Principal, Project, ProjectId, ProjectRole, Result, Role};

use crate::auth::Authorizer;
use crate::store::ProjectsStore;

/// Operations on Projects.
pub struct ProjectsService {
    projects: Arc<dyn ProjectsStore>,
    authorizer: Arc<Authorizer>,
}

impl ProjectsService {
    /// Creates the service over its collaborators.
    pub fn new(projects: Arc<dyn ProjectsStore>, authorizer: Arc<Authorizer>) -> Self {
        Self {
            projects,
            authorizer,
        }
    }

    /// Creates a Project. Requires `PROJECT_CREATOR`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the ID is taken, `INVALID` for a zero worker limit.
    pub async fn create(&self, principal: &Principal, project: Project) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::ProjectCreator)
            .await?;
        if project.spec.worker_limit == 0 {
            return Err(Error::invalid("worker limit must be at least 1"));
        }
        self.projects.create(project).await
    }

    /// Fetches a Project. Requires `READER`.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if absent.
    pub async fn get(&self, principal: &Principal, project_id: &ProjectId) -> Result<Project> {
        self.authorizer
            .require_unscoped_role(principal, Role::Reader)
            .await?;
        self.projects.get(project_id).await
    }

    /// Lists all Projects. Requires `READER`.
    ///
    /// # Errors
    ///
    /// Surfaces store errors.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<Project>> {
        self.authorizer
            .require_unscoped_role(principal, Role::Reader)
            .await?;
        self.projects.list().await
    }

    /// Deletes a Project. Requires project role `ADMIN` on it.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if absent.
    pub async fn delete(&self, principal: &Principal, project_id: &ProjectId) -> Result<()> {
        self.authorizer
            .require_project_role(principal, ProjectRole::Admin, project_id)
            .await?;
        self.projects.delete(project_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;

    #[tokio::test]
    async fn create_get_delete_roundtrip() {
        let harness = TestHarness::new().await;
        let project = Project::new(ProjectId::new("blue-book").unwrap());

        harness
            .projects_service
            .create(&Principal::Root, project.clone())
            .await
            .unwrap();
        let fetched = harness
            .projects_service
            .get(&Principal::Root, &project.id)
            .await
            .unwrap();
        assert_eq!(fetched.id, project.id);

        harness
            .projects_service
            .delete(&Principal::Root, &project.id)
            .await
            .unwrap();
        assert!(harness
            .projects_service
            .get(&Principal::Root, &project.id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn create_requires_project_creator() {
        let harness = TestHarness::new().await;
        let project = Project::new(ProjectId::new("blue-book").unwrap());
        let err = harness
            .projects_service
            .create(&Principal::Scheduler, project)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthzFailed { .. }));
    }

    #[tokio::test]
    async fn zero_worker_limit_is_invalid() {
        let harness = TestHarness::new().await;
        let mut project = Project::new(ProjectId::new("blue-book").unwrap());
        project.spec.worker_limit = 0;
        let err = harness
            .projects_service
            .create(&Principal::Root, project)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
    }
}
