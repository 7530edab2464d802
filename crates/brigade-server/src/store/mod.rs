//! Pluggable persistence for control-plane state.
//!
//! Stores are traits so the same services run against the in-memory
//! implementation (tests, single-node development) or a document database.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: every write to an Event's embedded Worker/Job state
//!   goes through a compare-and-swap on the Event's version, which is the
//!   serialization point for concurrent status updates
//! - **Stores hold state, services hold rules**: phase-graph legality,
//!   authorization, and queue writes all live above this layer

pub mod memory;

use async_trait::async_trait;

use brigade_core::{
    Error, Event, EventId, EventSelector, Project, ProjectId, ProjectRoleAssignment,
    ProjectRoleGrant, PrincipalReference, Result, RoleAssignment, RoleGrant,
};

/// Upper bound on internal CAS retries before surfacing `CONFLICT`.
pub const MAX_CAS_ATTEMPTS: u32 = 3;

/// An Event as persisted: the Event itself plus store bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// The Event.
    pub event: Event,
    /// Version for optimistic concurrency; bumped on every update.
    pub version: u64,
    /// SHA-256 digest of the Event's Worker bearer token.
    pub worker_token_hash: String,
}

/// Persistence for Projects.
#[async_trait]
pub trait ProjectsStore: Send + Sync {
    /// Inserts a Project. `CONFLICT` if the ID is taken.
    async fn create(&self, project: Project) -> Result<()>;

    /// Fetches a Project. `NOT_FOUND` if absent.
    async fn get(&self, project_id: &ProjectId) -> Result<Project>;

    /// Lists all Projects, ordered by ID.
    async fn list(&self) -> Result<Vec<Project>>;

    /// Deletes a Project. `NOT_FOUND` if absent.
    async fn delete(&self, project_id: &ProjectId) -> Result<()>;
}

/// Persistence for Events and their embedded Worker/Job state.
#[async_trait]
pub trait EventsStore: Send + Sync {
    /// Inserts an Event at version 0. `CONFLICT` if the ID is taken.
    async fn create(&self, event: Event, worker_token_hash: String) -> Result<()>;

    /// Fetches an Event. `NOT_FOUND` if absent.
    async fn get(&self, event_id: EventId) -> Result<StoredEvent>;

    /// Fetches the Event owning the Worker token with the given digest.
    /// `NOT_FOUND` if no Event matches.
    async fn get_by_worker_token_hash(&self, hash: &str) -> Result<StoredEvent>;

    /// Lists Events matching the selector, ordered by ID (and therefore by
    /// creation time).
    async fn list(&self, selector: &EventSelector) -> Result<Vec<Event>>;

    /// Replaces an Event's mutable state if `expected_version` matches,
    /// bumping the version. `CONFLICT` on version mismatch.
    async fn update(&self, event_id: EventId, expected_version: u64, event: Event) -> Result<()>;
}

/// A stored service account (typically an event gateway).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    /// Stable identifier.
    pub id: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// SHA-256 digest of the account's bearer token.
    pub hashed_token: String,
}

/// Persistence for service accounts.
#[async_trait]
pub trait ServiceAccountsStore: Send + Sync {
    /// Inserts a service account. `CONFLICT` if the ID is taken.
    async fn create(&self, account: ServiceAccount) -> Result<()>;

    /// Fetches a service account. `NOT_FOUND` if absent.
    async fn get(&self, id: &str) -> Result<ServiceAccount>;

    /// Fetches the account owning the token with the given digest.
    /// `NOT_FOUND` if no account matches.
    async fn get_by_token_hash(&self, hash: &str) -> Result<ServiceAccount>;
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
}

/// Persistence for users.
#[async_trait]
pub trait UsersStore: Send + Sync {
    /// Inserts a user. `CONFLICT` if the ID is taken.
    async fn create(&self, user: User) -> Result<()>;

    /// Fetches a user. `NOT_FOUND` if absent.
    async fn get(&self, id: &str) -> Result<User>;
}

/// Persistence for system- and project-level role assignments.
#[async_trait]
pub trait RoleAssignmentsStore: Send + Sync {
    /// Records a system role assignment. Idempotent.
    async fn grant(&self, assignment: RoleAssignment) -> Result<()>;

    /// Removes a system role assignment. Idempotent.
    async fn revoke(&self, assignment: &RoleAssignment) -> Result<()>;

    /// All system grants held by the principal.
    async fn grants_for(&self, principal: &PrincipalReference) -> Result<Vec<RoleGrant>>;

    /// Records a project role assignment. Idempotent.
    async fn grant_project(&self, assignment: ProjectRoleAssignment) -> Result<()>;

    /// Removes a project role assignment. Idempotent.
    async fn revoke_project(&self, assignment: &ProjectRoleAssignment) -> Result<()>;

    /// All project grants held by the principal.
    async fn project_grants_for(
        &self,
        principal: &PrincipalReference,
    ) -> Result<Vec<ProjectRoleGrant>>;
}

/// Reads, mutates, and CAS-writes one Event, retrying version conflicts up
/// to [`MAX_CAS_ATTEMPTS`] times.
///
/// `mutate` sees a fresh copy on every attempt and may veto the write by
/// returning an error (surfaced verbatim, never retried). Store-level
/// version conflicts are retried; if the budget runs out the caller gets
/// `CONFLICT`.
pub async fn modify_event<F>(
    events: &dyn EventsStore,
    event_id: EventId,
    mut mutate: F,
) -> Result<Event>
where
    F: FnMut(&mut Event) -> Result<()> + Send,
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let stored = events.get(event_id).await?;
        let mut event = stored.event;
        mutate(&mut event)?;
        match events.update(event_id, stored.version, event.clone()).await {
            Ok(()) => return Ok(event),
            Err(Error::Conflict { .. }) => continue,
            Err(err) => return Err(err),
        }
    }
    Err(Error::conflict(format!(
        "event {event_id} was concurrently modified too many times"
    )))
}
