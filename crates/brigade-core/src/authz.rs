//! Authorization core: principals, roles, role assignments, and the
//! permission predicate.
//!
//! Built-in principals (root, the scheduler, the observer, and per-Event
//! workers) carry their grants intrinsically; grants for users and service
//! accounts come from a role-assignments store. Resolution is a pure
//! function over the principal variant plus whatever the store returns.

use serde::{Deserialize, Serialize};

use crate::id::EventId;

/// The wildcard scope: a grant with this scope matches any required scope.
pub const SCOPE_GLOBAL: &str = "*";

/// Authenticated identity presented with every API operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The root user.
    Root,
    /// The scheduler component. Uniquely able to start Workers and Jobs.
    Scheduler,
    /// The observer component. Uniquely able to update Worker and Job
    /// statuses, time them out, and clean them up.
    Observer,
    /// An Event's Worker. Uniquely able to create Jobs for its own Event.
    Worker(EventId),
    /// A human user, identified by their stored ID.
    User(String),
    /// A service account (typically an event gateway).
    ServiceAccount(String),
}

impl Principal {
    /// Returns the grants held intrinsically by built-in principal
    /// variants, or `None` for principals whose grants live in the store.
    #[must_use]
    pub fn builtin_grants(&self) -> Option<PrincipalGrants> {
        match self {
            Self::Root => Some(PrincipalGrants {
                system: vec![
                    RoleGrant::unscoped(Role::Admin),
                    RoleGrant::unscoped(Role::Reader),
                    RoleGrant::scoped(Role::EventCreator, SCOPE_GLOBAL),
                    RoleGrant::unscoped(Role::ProjectCreator),
                ],
                project: vec![
                    ProjectRoleGrant::scoped(ProjectRole::Admin, SCOPE_GLOBAL),
                    ProjectRoleGrant::scoped(ProjectRole::Developer, SCOPE_GLOBAL),
                    ProjectRoleGrant::scoped(ProjectRole::User, SCOPE_GLOBAL),
                ],
            }),
            Self::Scheduler => Some(PrincipalGrants {
                system: vec![
                    RoleGrant::unscoped(Role::Reader),
                    RoleGrant::unscoped(Role::Scheduler),
                ],
                project: vec![],
            }),
            Self::Observer => Some(PrincipalGrants {
                system: vec![
                    RoleGrant::unscoped(Role::Reader),
                    RoleGrant::unscoped(Role::Observer),
                ],
                project: vec![],
            }),
            Self::Worker(event_id) => Some(PrincipalGrants {
                system: vec![
                    RoleGrant::unscoped(Role::Reader),
                    RoleGrant::scoped(Role::Worker, event_id.to_string()),
                ],
                project: vec![],
            }),
            Self::User(_) | Self::ServiceAccount(_) => None,
        }
    }

    /// Returns a reference usable in stored role assignments, or `None`
    /// for built-in principals (which cannot be granted or revoked roles).
    #[must_use]
    pub fn reference(&self) -> Option<PrincipalReference> {
        match self {
            Self::User(id) => Some(PrincipalReference {
                principal_type: PrincipalType::User,
                id: id.clone(),
            }),
            Self::ServiceAccount(id) => Some(PrincipalReference {
                principal_type: PrincipalType::ServiceAccount,
                id: id.clone(),
            }),
            _ => None,
        }
    }
}

/// The kind of a storable principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    /// A human user.
    User,
    /// A service account.
    ServiceAccount,
}

/// Reference to a storable principal in a role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalReference {
    /// The principal's kind.
    #[serde(rename = "type")]
    pub principal_type: PrincipalType,
    /// The principal's stored identifier.
    pub id: String,
}

/// System-level roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Manage users, service accounts, and system role assignments.
    Admin,
    /// Read-only access to system state.
    Reader,
    /// Create Events whose source matches the grant's scope.
    EventCreator,
    /// Create new Projects.
    ProjectCreator,
    /// Start Workers and Jobs (the scheduler component).
    Scheduler,
    /// Update Worker/Job statuses, time out, and clean up (the observer
    /// component).
    Observer,
    /// Create Jobs for the Event named by the grant's scope.
    Worker,
}

/// Project-level roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectRole {
    /// Manage the Project, its secrets, and its role assignments.
    Admin,
    /// Update the Project's definition.
    Developer,
    /// Create and manage Events for the Project.
    User,
}

/// A system role held by a principal, with the scope it was granted at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    /// The granted role.
    pub role: Role,
    /// The grant's scope; [`SCOPE_GLOBAL`] matches any required scope.
    pub scope: String,
}

impl RoleGrant {
    /// A grant at global scope, for roles that are not scoped.
    #[must_use]
    pub fn unscoped(role: Role) -> Self {
        Self::scoped(role, SCOPE_GLOBAL)
    }

    /// A grant at a specific scope.
    #[must_use]
    pub fn scoped(role: Role, scope: impl Into<String>) -> Self {
        Self {
            role,
            scope: scope.into(),
        }
    }
}

/// A project role held by a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRoleGrant {
    /// The granted role.
    pub role: ProjectRole,
    /// The project ID the grant applies to; [`SCOPE_GLOBAL`] matches all.
    pub project_id: String,
}

impl ProjectRoleGrant {
    /// A grant for a specific project (or [`SCOPE_GLOBAL`]).
    #[must_use]
    pub fn scoped(role: ProjectRole, project_id: impl Into<String>) -> Self {
        Self {
            role,
            project_id: project_id.into(),
        }
    }
}

/// A stored system role assignment: `(principal, role, scope)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// The principal the role is assigned to.
    pub principal: PrincipalReference,
    /// The assigned role.
    pub role: Role,
    /// The assignment's scope; defaults to [`SCOPE_GLOBAL`].
    #[serde(default = "global_scope")]
    pub scope: String,
}

/// A stored project role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRoleAssignment {
    /// The principal the role is assigned to.
    pub principal: PrincipalReference,
    /// The assigned role.
    pub role: ProjectRole,
    /// The project the assignment applies to.
    pub project_id: String,
}

fn global_scope() -> String {
    SCOPE_GLOBAL.to_string()
}

/// The full set of grants resolved for a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalGrants {
    /// System-level grants.
    pub system: Vec<RoleGrant>,
    /// Project-level grants.
    pub project: Vec<ProjectRoleGrant>,
}

/// The permission predicate: true iff some grant carries `role` at a scope
/// equal to `scope` or [`SCOPE_GLOBAL`].
#[must_use]
pub fn grants_allow(grants: &[RoleGrant], role: Role, scope: &str) -> bool {
    grants
        .iter()
        .any(|g| g.role == role && (g.scope == SCOPE_GLOBAL || g.scope == scope))
}

/// The project-level permission predicate.
#[must_use]
pub fn project_grants_allow(
    grants: &[ProjectRoleGrant],
    role: ProjectRole,
    project_id: &str,
) -> bool {
    grants
        .iter()
        .any(|g| g.role == role && (g.project_id == SCOPE_GLOBAL || g.project_id == project_id))
}
