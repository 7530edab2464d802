//! API server assembly: application state, router, and serve loop.

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use brigade_core::{Error, Result};

use crate::api;
use crate::auth::TokenResolver;
use crate::events::EventsService;
use crate::jobs::JobsService;
use crate::projects::ProjectsService;
use crate::roles::RolesService;
use crate::workers::WorkersService;

/// The server's version string, reported by the ping endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Version string reported by ping.
    pub version: &'static str,
    /// Bearer-token resolution.
    pub token_resolver: Arc<TokenResolver>,
    /// Events service.
    pub events: Arc<EventsService>,
    /// Workers service.
    pub workers: Arc<WorkersService>,
    /// Jobs service.
    pub jobs: Arc<JobsService>,
    /// Projects service.
    pub projects: Arc<ProjectsService>,
    /// Role-assignments service.
    pub roles: Arc<RolesService>,
}

/// Builds the `/v2` router over the given state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(api::system::unversioned_ping))
        .route("/v2/ping", get(api::system::versioned_ping))
        .route("/v2/events", post(api::events::create).get(api::events::list))
        .route("/v2/events/:id", get(api::events::get))
        .route(
            "/v2/events/:id/worker",
            delete(api::workers::cleanup),
        )
        .route(
            "/v2/events/:id/worker/cancellation",
            post(api::events::cancel),
        )
        .route("/v2/events/:id/worker/start", put(api::workers::start))
        .route(
            "/v2/events/:id/worker/status",
            get(api::workers::get_status).put(api::workers::update_status),
        )
        .route("/v2/events/:id/worker/timeout", put(api::workers::timeout))
        .route("/v2/events/:id/worker/jobs", post(api::jobs::create))
        .route(
            "/v2/events/:id/worker/jobs/:job",
            delete(api::jobs::cleanup),
        )
        .route(
            "/v2/events/:id/worker/jobs/:job/start",
            put(api::jobs::start),
        )
        .route(
            "/v2/events/:id/worker/jobs/:job/status",
            get(api::jobs::get_status).put(api::jobs::update_status),
        )
        .route(
            "/v2/events/:id/worker/jobs/:job/timeout",
            put(api::jobs::timeout),
        )
        .route(
            "/v2/projects",
            post(api::projects::create).get(api::projects::list),
        )
        .route(
            "/v2/projects/:id",
            get(api::projects::get).delete(api::projects::delete),
        )
        .route(
            "/v2/projects/:id/role-assignments",
            post(api::projects::grant_project_role).delete(api::projects::revoke_project_role),
        )
        .route(
            "/v2/role-assignments",
            post(api::projects::grant_system_role).delete(api::projects::revoke_system_role),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on the given listener until the task is aborted.
///
/// # Errors
///
/// Returns [`Error::Internal`] if the server loop fails.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> Result<()> {
    tracing::info!(
        addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        "API server listening"
    );
    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::internal(format!("server error: {e}")))
}
