//! Worker endpoints.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;

use brigade_core::WorkloadStatus;

use crate::api::context::Authenticated;
use crate::api::error::ApiResult;
use crate::api::events::parse_event_id;
use crate::server::AppState;
use crate::watch::StatusWatch;

/// Query parameters for the status endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// When true, stream status snapshots instead of returning one.
    #[serde(default)]
    pub(crate) watch: bool,
}

/// Renders a status watch as a newline-delimited JSON streaming body.
pub(crate) fn stream_response(watch: StatusWatch) -> Response {
    let stream = futures::stream::unfold(watch, |mut watch| async move {
        let status = watch.next().await?;
        let mut line = serde_json::to_vec(&status).unwrap_or_default();
        line.push(b'\n');
        Some((Ok::<_, std::convert::Infallible>(Bytes::from(line)), watch))
    });
    (
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// `PUT /v2/events/:id/worker/start`: claim the Worker for launch.
pub async fn start(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let event_id = parse_event_id(&id)?;
    state.workers.start(&principal, event_id).await?;
    Ok(StatusCode::OK)
}

/// `GET /v2/events/:id/worker/status`: read the Worker's status, or
/// stream it with `?watch=true`.
pub async fn get_status(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Response> {
    let event_id = parse_event_id(&id)?;
    if query.watch {
        let watch = state.workers.watch_status(&principal, event_id).await?;
        return Ok(stream_response(watch));
    }
    let status = state.workers.get_status(&principal, event_id).await?;
    Ok(Json(status).into_response())
}

/// `PUT /v2/events/:id/worker/status`: apply an observed status.
pub async fn update_status(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(status): Json<WorkloadStatus>,
) -> ApiResult<Json<WorkloadStatus>> {
    let event_id = parse_event_id(&id)?;
    Ok(Json(
        state
            .workers
            .update_status(&principal, event_id, status)
            .await?,
    ))
}

/// `DELETE /v2/events/:id/worker`: delete the Worker's workload.
pub async fn cleanup(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let event_id = parse_event_id(&id)?;
    state.workers.cleanup(&principal, event_id).await?;
    Ok(StatusCode::OK)
}

/// `PUT /v2/events/:id/worker/timeout`: force `TIMED_OUT`.
pub async fn timeout(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let event_id = parse_event_id(&id)?;
    state.workers.timeout(&principal, event_id).await?;
    Ok(StatusCode::OK)
}
