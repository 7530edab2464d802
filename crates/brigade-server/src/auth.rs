//! Bearer-token authentication and the authorization predicate.
//!
//! Tokens are opaque strings; only their SHA-256 digests are stored or
//! compared. Resolution order: the fixed component tokens (root,
//! scheduler, observer), then service accounts, then per-Event Worker
//! tokens. An unresolvable token is `AUTHN_FAILED`; a resolved principal
//! missing a grant is `AUTHZ_FAILED`.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use ulid::Ulid;

use brigade_core::authz::{grants_allow, project_grants_allow};
use brigade_core::{
    Error, Principal, ProjectId, ProjectRole, Result, Role, SCOPE_GLOBAL,
};

use crate::store::{EventsStore, RoleAssignmentsStore, ServiceAccountsStore};

/// Returns the hex SHA-256 digest of a bearer token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generates a fresh opaque bearer token.
#[must_use]
pub fn generate_token() -> String {
    format!("{}{}", Ulid::new(), Ulid::new()).to_ascii_lowercase()
}

/// Fixed component tokens, hashed at construction.
#[derive(Debug, Clone)]
pub struct ComponentTokens {
    root: Option<String>,
    scheduler: String,
    observer: String,
}

impl ComponentTokens {
    /// Hashes and retains the configured component tokens. Root login is
    /// disabled when `root_token` is `None`.
    #[must_use]
    pub fn new(root_token: Option<&str>, scheduler_token: &str, observer_token: &str) -> Self {
        Self {
            root: root_token.map(hash_token),
            scheduler: hash_token(scheduler_token),
            observer: hash_token(observer_token),
        }
    }
}

/// Resolves bearer tokens to principals.
pub struct TokenResolver {
    tokens: ComponentTokens,
    service_accounts: Arc<dyn ServiceAccountsStore>,
    events: Arc<dyn EventsStore>,
}

impl TokenResolver {
    /// Creates a resolver over the given stores.
    pub fn new(
        tokens: ComponentTokens,
        service_accounts: Arc<dyn ServiceAccountsStore>,
        events: Arc<dyn EventsStore>,
    ) -> Self {
        Self {
            tokens,
            service_accounts,
            events,
        }
    }

    /// Resolves a bearer token to its principal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthnFailed`] if no principal owns the token.
    pub async fn resolve(&self, token: &str) -> Result<Principal> {
        let digest = hash_token(token);

        if self.tokens.root.as_deref() == Some(digest.as_str()) {
            return Ok(Principal::Root);
        }
        if self.tokens.scheduler == digest {
            return Ok(Principal::Scheduler);
        }
        if self.tokens.observer == digest {
            return Ok(Principal::Observer);
        }

        match self.service_accounts.get_by_token_hash(&digest).await {
            Ok(account) => return Ok(Principal::ServiceAccount(account.id)),
            Err(Error::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        match self.events.get_by_worker_token_hash(&digest).await {
            Ok(stored) => Ok(Principal::Worker(stored.event.id)),
            Err(Error::NotFound { .. }) => Err(Error::AuthnFailed),
            Err(err) => Err(err),
        }
    }
}

/// Answers "may this principal do that" for every service operation.
pub struct Authorizer {
    role_assignments: Arc<dyn RoleAssignmentsStore>,
}

impl Authorizer {
    /// Creates an authorizer over the role-assignments store.
    pub fn new(role_assignments: Arc<dyn RoleAssignmentsStore>) -> Self {
        Self { role_assignments }
    }

    /// Requires a system `role` at `scope` (or the global scope).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthzFailed`] if the principal holds no matching
    /// grant.
    pub async fn require_role(
        &self,
        principal: &Principal,
        role: Role,
        scope: &str,
    ) -> Result<()> {
        let allowed = match principal.builtin_grants() {
            Some(grants) => grants_allow(&grants.system, role, scope),
            None => {
                let reference = principal
                    .reference()
                    .ok_or_else(|| Error::internal("unreferencable principal"))?;
                let grants = self.role_assignments.grants_for(&reference).await?;
                grants_allow(&grants, role, scope)
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::authz(format!("requires role {role:?}")))
        }
    }

    /// Requires a system `role` at the global scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthzFailed`] if the principal holds no matching
    /// grant.
    pub async fn require_unscoped_role(&self, principal: &Principal, role: Role) -> Result<()> {
        self.require_role(principal, role, SCOPE_GLOBAL).await
    }

    /// Requires a project-level `role` on `project_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthzFailed`] if the principal holds no matching
    /// grant.
    pub async fn require_project_role(
        &self,
        principal: &Principal,
        role: ProjectRole,
        project_id: &ProjectId,
    ) -> Result<()> {
        let allowed = match principal.builtin_grants() {
            Some(grants) => project_grants_allow(&grants.project, role, project_id.as_str()),
            None => {
                let reference = principal
                    .reference()
                    .ok_or_else(|| Error::internal("unreferencable principal"))?;
                let grants = self.role_assignments.project_grants_for(&reference).await?;
                project_grants_allow(&grants, role, project_id.as_str())
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::authz(format!(
                "requires project role {role:?} on {project_id}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::{EventsStore, ServiceAccount, ServiceAccountsStore};
    use brigade_core::{Event, EventId, Worker, WorkerSpec};
    use chrono::Utc;

    fn resolver(store: Arc<InMemoryStore>) -> TokenResolver {
        TokenResolver::new(
            ComponentTokens::new(Some("root-token"), "sched-token", "obs-token"),
            store.clone(),
            store,
        )
    }

    #[tokio::test]
    async fn component_tokens_resolve_to_builtin_principals() {
        let resolver = resolver(Arc::new(InMemoryStore::new()));
        assert_eq!(resolver.resolve("root-token").await.unwrap(), Principal::Root);
        assert_eq!(
            resolver.resolve("sched-token").await.unwrap(),
            Principal::Scheduler
        );
        assert_eq!(
            resolver.resolve("obs-token").await.unwrap(),
            Principal::Observer
        );
    }

    #[tokio::test]
    async fn unknown_token_is_authn_failed() {
        let resolver = resolver(Arc::new(InMemoryStore::new()));
        let err = resolver.resolve("who-dis").await.unwrap_err();
        assert!(matches!(err, Error::AuthnFailed));
    }

    #[tokio::test]
    async fn service_account_tokens_resolve_by_digest() {
        let store = Arc::new(InMemoryStore::new());
        let token = generate_token();
        ServiceAccountsStore::create(
            &*store,
            ServiceAccount {
                id: "github-gateway".to_string(),
                description: None,
                hashed_token: hash_token(&token),
            },
        )
        .await
        .unwrap();

        let resolver = resolver(store);
        assert_eq!(
            resolver.resolve(&token).await.unwrap(),
            Principal::ServiceAccount("github-gateway".to_string())
        );
    }

    #[tokio::test]
    async fn worker_tokens_resolve_to_the_owning_event() {
        let store = Arc::new(InMemoryStore::new());
        let token = generate_token();
        let event = Event {
            id: EventId::generate(),
            project_id: brigade_core::ProjectId::new("blue-book").unwrap(),
            source: "gw".to_string(),
            event_type: "exec".to_string(),
            payload: Vec::new(),
            created_at: Utc::now(),
            worker: Worker::new(WorkerSpec::default()),
        };
        let event_id = event.id;
        EventsStore::create(&*store, event, hash_token(&token))
            .await
            .unwrap();

        let resolver = resolver(store);
        assert_eq!(
            resolver.resolve(&token).await.unwrap(),
            Principal::Worker(event_id)
        );
    }

    #[tokio::test]
    async fn stored_grants_gate_stored_principals() {
        let store = Arc::new(InMemoryStore::new());
        let authorizer = Authorizer::new(store.clone());
        let principal = Principal::ServiceAccount("gw".to_string());

        let err = authorizer
            .require_role(&principal, Role::EventCreator, "gateway-a")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthzFailed { .. }));

        use crate::store::RoleAssignmentsStore as _;
        store
            .grant(brigade_core::RoleAssignment {
                principal: principal.reference().unwrap(),
                role: Role::EventCreator,
                scope: "gateway-a".to_string(),
            })
            .await
            .unwrap();

        authorizer
            .require_role(&principal, Role::EventCreator, "gateway-a")
            .await
            .unwrap();
        // Scope still matters.
        assert!(authorizer
            .require_role(&principal, Role::EventCreator, "gateway-b")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn builtin_grants_need_no_store() {
        let authorizer = Authorizer::new(Arc::new(InMemoryStore::new()));
        authorizer
            .require_unscoped_role(&Principal::Scheduler, Role::Scheduler)
            .await
            .unwrap();
        assert!(authorizer
            .require_unscoped_role(&Principal::Scheduler, Role::Observer)
            .await
            .is_err());
    }
}
