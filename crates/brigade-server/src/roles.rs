//! The role-assignments service: system- and project-level grants.

use std::sync::Arc;

use brigade_core::{
    Principal, PrincipalReference, PrincipalType, ProjectId, ProjectRole, ProjectRoleAssignment,
    Result, Role, RoleAssignment,
};

use crate::auth::Authorizer;
use crate::store::{ProjectsStore, RoleAssignmentsStore, ServiceAccountsStore, UsersStore};

/// Grants and revokes roles for stored principals.
///
/// Every grant and revoke first verifies that the referenced principal
/// actually exists, so typos surface as `NOT_FOUND` instead of silently
/// minting assignments nobody holds.
pub struct RolesService {
    users: Arc<dyn UsersStore>,
    service_accounts: Arc<dyn ServiceAccountsStore>,
    projects: Arc<dyn ProjectsStore>,
    role_assignments: Arc<dyn RoleAssignmentsStore>,
    authorizer: Arc<Authorizer>,
}

impl RolesService {
    /// Creates the service over its collaborators.
    pub fn new(
        users: Arc<dyn UsersStore>,
        service_accounts: Arc<dyn ServiceAccountsStore>,
        projects: Arc<dyn ProjectsStore>,
        role_assignments: Arc<dyn RoleAssignmentsStore>,
        authorizer: Arc<Authorizer>,
    ) -> Self {
        Self {
            users,
            service_accounts,
            projects,
            role_assignments,
            authorizer,
        }
    }

    async fn ensure_principal_exists(&self, reference: &PrincipalReference) -> Result<()> {
        match reference.principal_type {
            PrincipalType::User => self.users.get(&reference.id).await.map(|_| ()),
            PrincipalType::ServiceAccount => {
                self.service_accounts.get(&reference.id).await.map(|_| ())
            }
        }
    }

    /// Grants a system role. Requires `ADMIN`. Idempotent.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the referenced principal does not exist.
    pub async fn grant(&self, principal: &Principal, assignment: RoleAssignment) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::Admin)
            .await?;
        self.ensure_principal_exists(&assignment.principal).await?;
        self.role_assignments.grant(assignment).await
    }

    /// Revokes a system role. Requires `ADMIN`. Idempotent.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the referenced principal does not exist.
    pub async fn revoke(&self, principal: &Principal, assignment: &RoleAssignment) -> Result<()> {
        self.authorizer
            .require_unscoped_role(principal, Role::Admin)
            .await?;
        self.ensure_principal_exists(&assignment.principal).await?;
        self.role_assignments.revoke(assignment).await
    }

    /// Grants a project role. Requires project `ADMIN` on the target
    /// project. Idempotent.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the project or the referenced principal does not
    /// exist.
    pub async fn grant_project(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
        reference: PrincipalReference,
        role: ProjectRole,
    ) -> Result<()> {
        self.authorizer
            .require_project_role(principal, ProjectRole::Admin, project_id)
            .await?;
        self.projects.get(project_id).await?;
        self.ensure_principal_exists(&reference).await?;
        self.role_assignments
            .grant_project(ProjectRoleAssignment {
                principal: reference,
                role,
                project_id: project_id.to_string(),
            })
            .await
    }

    /// Revokes a project role. Requires project `ADMIN` on the target
    /// project. Idempotent.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the project or the referenced principal does not
    /// exist.
    pub async fn revoke_project(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
        reference: PrincipalReference,
        role: ProjectRole,
    ) -> Result<()> {
        self.authorizer
            .require_project_role(principal, ProjectRole::Admin, project_id)
            .await?;
        self.projects.get(project_id).await?;
        self.ensure_principal_exists(&reference).await?;
        self.role_assignments
            .revoke_project(&ProjectRoleAssignment {
                principal: reference,
                role,
                project_id: project_id.to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ServiceAccount;
    use crate::testing::TestHarness;
    use brigade_core::Error;

    fn gateway_ref() -> PrincipalReference {
        PrincipalReference {
            principal_type: PrincipalType::ServiceAccount,
            id: "github-gateway".to_string(),
        }
    }

    async fn seed_gateway(harness: &TestHarness) {
        ServiceAccountsStore::create(
            &*harness.store,
            ServiceAccount {
                id: "github-gateway".to_string(),
                description: None,
                hashed_token: "digest".to_string(),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn grant_validates_the_principal_exists() {
        let harness = TestHarness::new().await;
        let assignment = RoleAssignment {
            principal: gateway_ref(),
            role: Role::EventCreator,
            scope: "gateway-a".to_string(),
        };

        let err = harness
            .roles_service
            .grant(&Principal::Root, assignment.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        seed_gateway(&harness).await;
        harness
            .roles_service
            .grant(&Principal::Root, assignment)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn granted_gateway_can_create_events_in_its_scope() {
        let harness = TestHarness::new().await;
        seed_gateway(&harness).await;
        let project_id = harness.seed_project("blue-book").await;
        harness
            .roles_service
            .grant(
                &Principal::Root,
                RoleAssignment {
                    principal: gateway_ref(),
                    role: Role::EventCreator,
                    scope: "gateway-a".to_string(),
                },
            )
            .await
            .unwrap();

        let gateway = Principal::ServiceAccount("github-gateway".to_string());
        harness
            .events_service
            .create(
                &gateway,
                brigade_core::NewEvent {
                    project_id: project_id.clone(),
                    source: "gateway-a".to_string(),
                    event_type: "push".to_string(),
                    payload: Vec::new(),
                },
            )
            .await
            .unwrap();

        // It cannot impersonate another gateway.
        let err = harness
            .events_service
            .create(
                &gateway,
                brigade_core::NewEvent {
                    project_id,
                    source: "gateway-b".to_string(),
                    event_type: "push".to_string(),
                    payload: Vec::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthzFailed { .. }));
    }

    #[tokio::test]
    async fn revoke_removes_the_grant() {
        let harness = TestHarness::new().await;
        seed_gateway(&harness).await;
        let assignment = RoleAssignment {
            principal: gateway_ref(),
            role: Role::Reader,
            scope: brigade_core::SCOPE_GLOBAL.to_string(),
        };
        harness
            .roles_service
            .grant(&Principal::Root, assignment.clone())
            .await
            .unwrap();
        harness
            .roles_service
            .revoke(&Principal::Root, &assignment)
            .await
            .unwrap();

        let gateway = Principal::ServiceAccount("github-gateway".to_string());
        assert!(harness
            .projects_service
            .list(&gateway)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn project_grants_require_project_admin() {
        let harness = TestHarness::new().await;
        seed_gateway(&harness).await;
        let project_id = harness.seed_project("blue-book").await;

        let err = harness
            .roles_service
            .grant_project(
                &Principal::Scheduler,
                &project_id,
                gateway_ref(),
                ProjectRole::User,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthzFailed { .. }));

        harness
            .roles_service
            .grant_project(&Principal::Root, &project_id, gateway_ref(), ProjectRole::User)
            .await
            .unwrap();
    }
}
