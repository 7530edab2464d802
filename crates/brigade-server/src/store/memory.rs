//! In-memory store implementation for tests and single-node deployments.
//!
//! One struct implements every store trait; all state sits behind a single
//! `RwLock`, which is more than enough serialization for the scale this
//! implementation targets.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use brigade_core::{
    Error, Event, EventId, EventSelector, Project, ProjectId, ProjectRoleAssignment,
    ProjectRoleGrant, PrincipalReference, Result, RoleAssignment, RoleGrant,
};

use super::{
    EventsStore, ProjectsStore, RoleAssignmentsStore, ServiceAccount, ServiceAccountsStore,
    StoredEvent, User, UsersStore,
};

#[derive(Debug, Default)]
struct StoreInner {
    projects: BTreeMap<ProjectId, Project>,
    events: BTreeMap<EventId, StoredEvent>,
    service_accounts: HashMap<String, ServiceAccount>,
    users: HashMap<String, User>,
    role_assignments: HashSet<StoredRoleAssignment>,
    project_role_assignments: HashSet<StoredProjectRoleAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StoredRoleAssignment {
    principal: PrincipalReference,
    role: brigade_core::Role,
    scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StoredProjectRoleAssignment {
    principal: PrincipalReference,
    role: brigade_core::ProjectRole,
    project_id: String,
}

/// Converts a lock poison error to a backend error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::backend("store lock poisoned")
}

/// In-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>> {
        self.inner.read().map_err(poison_err)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>> {
        self.inner.write().map_err(poison_err)
    }
}

#[async_trait]
impl ProjectsStore for InMemoryStore {
    async fn create(&self, project: Project) -> Result<()> {
        let mut inner = self.write()?;
        if inner.projects.contains_key(&project.id) {
            return Err(Error::conflict(format!(
                "project {} already exists",
                project.id
            )));
        }
        inner.projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn get(&self, project_id: &ProjectId) -> Result<Project> {
        self.read()?
            .projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Project", project_id))
    }

    async fn list(&self) -> Result<Vec<Project>> {
        Ok(self.read()?.projects.values().cloned().collect())
    }

    async fn delete(&self, project_id: &ProjectId) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .projects
            .remove(project_id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("Project", project_id))
    }
}

#[async_trait]
impl EventsStore for InMemoryStore {
    async fn create(&self, event: Event, worker_token_hash: String) -> Result<()> {
        let mut inner = self.write()?;
        if inner.events.contains_key(&event.id) {
            return Err(Error::conflict(format!("event {} already exists", event.id)));
        }
        inner.events.insert(
            event.id,
            StoredEvent {
                event,
                version: 0,
                worker_token_hash,
            },
        );
        Ok(())
    }

    async fn get(&self, event_id: EventId) -> Result<StoredEvent> {
        self.read()?
            .events
            .get(&event_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Event", event_id))
    }

    async fn get_by_worker_token_hash(&self, hash: &str) -> Result<StoredEvent> {
        self.read()?
            .events
            .values()
            .find(|stored| stored.worker_token_hash == hash)
            .cloned()
            .ok_or_else(|| Error::not_found("Event", "<by worker token>"))
    }

    async fn list(&self, selector: &EventSelector) -> Result<Vec<Event>> {
        Ok(self
            .read()?
            .events
            .values()
            .map(|stored| &stored.event)
            .filter(|event| selector.matches(event))
            .cloned()
            .collect())
    }

    async fn update(&self, event_id: EventId, expected_version: u64, event: Event) -> Result<()> {
        let mut inner = self.write()?;
        let stored = inner
            .events
            .get_mut(&event_id)
            .ok_or_else(|| Error::not_found("Event", event_id))?;
        if stored.version != expected_version {
            return Err(Error::conflict(format!(
                "event {event_id} version mismatch: expected {expected_version}, is {}",
                stored.version
            )));
        }
        stored.event = event;
        stored.version += 1;
        Ok(())
    }
}

#[async_trait]
impl ServiceAccountsStore for InMemoryStore {
    async fn create(&self, account: ServiceAccount) -> Result<()> {
        let mut inner = self.write()?;
        if inner.service_accounts.contains_key(&account.id) {
            return Err(Error::conflict(format!(
                "service account {} already exists",
                account.id
            )));
        }
        inner.service_accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ServiceAccount> {
        self.read()?
            .service_accounts
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("ServiceAccount", id))
    }

    async fn get_by_token_hash(&self, hash: &str) -> Result<ServiceAccount> {
        self.read()?
            .service_accounts
            .values()
            .find(|account| account.hashed_token == hash)
            .cloned()
            .ok_or_else(|| Error::not_found("ServiceAccount", "<by token>"))
    }
}

#[async_trait]
impl UsersStore for InMemoryStore {
    async fn create(&self, user: User) -> Result<()> {
        let mut inner = self.write()?;
        if inner.users.contains_key(&user.id) {
            return Err(Error::conflict(format!("user {} already exists", user.id)));
        }
        inner.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<User> {
        self.read()?
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("User", id))
    }
}

#[async_trait]
impl RoleAssignmentsStore for InMemoryStore {
    async fn grant(&self, assignment: RoleAssignment) -> Result<()> {
        self.write()?.role_assignments.insert(StoredRoleAssignment {
            principal: assignment.principal,
            role: assignment.role,
            scope: assignment.scope,
        });
        Ok(())
    }

    async fn revoke(&self, assignment: &RoleAssignment) -> Result<()> {
        self.write()?.role_assignments.remove(&StoredRoleAssignment {
            principal: assignment.principal.clone(),
            role: assignment.role,
            scope: assignment.scope.clone(),
        });
        Ok(())
    }

    async fn grants_for(&self, principal: &PrincipalReference) -> Result<Vec<RoleGrant>> {
        Ok(self
            .read()?
            .role_assignments
            .iter()
            .filter(|a| a.principal == *principal)
            .map(|a| RoleGrant::scoped(a.role, a.scope.clone()))
            .collect())
    }

    async fn grant_project(&self, assignment: ProjectRoleAssignment) -> Result<()> {
        self.write()?
            .project_role_assignments
            .insert(StoredProjectRoleAssignment {
                principal: assignment.principal,
                role: assignment.role,
                project_id: assignment.project_id,
            });
        Ok(())
    }

    async fn revoke_project(&self, assignment: &ProjectRoleAssignment) -> Result<()> {
        self.write()?
            .project_role_assignments
            .remove(&StoredProjectRoleAssignment {
                principal: assignment.principal.clone(),
                role: assignment.role,
                project_id: assignment.project_id.clone(),
            });
        Ok(())
    }

    async fn project_grants_for(
        &self,
        principal: &PrincipalReference,
    ) -> Result<Vec<ProjectRoleGrant>> {
        Ok(self
            .read()?
            .project_role_assignments
            .iter()
            .filter(|a| a.principal == *principal)
            .map(|a| ProjectRoleGrant::scoped(a.role, a.project_id.clone()))
            .collect())
    }
}
