//! Job endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use brigade_core::{NewJob, WorkloadStatus};

use crate::api::context::Authenticated;
use crate::api::error::ApiResult;
use crate::api::events::parse_event_id;
use crate::api::workers::{stream_response, StatusQuery};
use crate::server::AppState;

/// `POST /v2/events/:id/worker/jobs`: create a Job.
pub async fn create(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(new_job): Json<NewJob>,
) -> ApiResult<StatusCode> {
    let event_id = parse_event_id(&id)?;
    state.jobs.create(&principal, event_id, new_job).await?;
    Ok(StatusCode::CREATED)
}

/// `PUT /v2/events/:id/worker/jobs/:job/start`: claim the Job for
/// launch.
pub async fn start(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((id, job)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let event_id = parse_event_id(&id)?;
    state.jobs.start(&principal, event_id, &job).await?;
    Ok(StatusCode::OK)
}

/// `GET /v2/events/:id/worker/jobs/:job/status`: read the Job's status,
/// or stream it with `?watch=true`.
pub async fn get_status(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((id, job)): Path<(String, String)>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Response> {
    let event_id = parse_event_id(&id)?;
    if query.watch {
        let watch = state.jobs.watch_status(&principal, event_id, &job).await?;
        return Ok(stream_response(watch));
    }
    let status = state.jobs.get_status(&principal, event_id, &job).await?;
    Ok(Json(status).into_response())
}

/// `PUT /v2/events/:id/worker/jobs/:job/status`: apply an observed
/// status.
pub async fn update_status(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((id, job)): Path<(String, String)>,
    Json(status): Json<WorkloadStatus>,
) -> ApiResult<Json<WorkloadStatus>> {
    let event_id = parse_event_id(&id)?;
    Ok(Json(
        state
            .jobs
            .update_status(&principal, event_id, &job, status)
            .await?,
    ))
}

/// `DELETE /v2/events/:id/worker/jobs/:job`: delete the Job's workload.
pub async fn cleanup(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((id, job)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let event_id = parse_event_id(&id)?;
    state.jobs.cleanup(&principal, event_id, &job).await?;
    Ok(StatusCode::OK)
}

/// `PUT /v2/events/:id/worker/jobs/:job/timeout`: force `TIMED_OUT`.
pub async fn timeout(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((id, job)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let event_id = parse_event_id(&id)?;
    state.jobs.timeout(&principal, event_id, &job).await?;
    Ok(StatusCode::OK)
}
