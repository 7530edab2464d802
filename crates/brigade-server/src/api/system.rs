//! Liveness endpoints.

use axum::extract::State;
use axum::Json;

use brigade_client::PingResponse;

use crate::server::AppState;

/// `GET /v2/ping`: versioned liveness, returning the server version.
pub async fn versioned_ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        version: state.version.to_string(),
    })
}

/// `GET /ping`: unversioned liveness, returning an opaque banner.
pub async fn unversioned_ping(State(state): State<AppState>) -> String {
    format!("Brigade API Server v{}", state.version)
}
