//! Event endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use brigade_core::{Event, EventId, EventSelector, NewEvent, Phase, ProjectId};

use crate::api::context::Authenticated;
use crate::api::error::{ApiError, ApiResult};
use crate::server::AppState;

pub(crate) fn parse_event_id(raw: &str) -> Result<EventId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("malformed event ID '{raw}'")))
}

/// Query parameters accepted by the Events list endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    #[serde(rename = "projectID")]
    project_id: Option<String>,
    /// Comma-separated Worker phases.
    worker_phases: Option<String>,
}

impl EventsQuery {
    fn into_selector(self) -> Result<EventSelector, ApiError> {
        let project_id = self
            .project_id
            .map(|raw| {
                ProjectId::new(&raw)
                    .map_err(|_| ApiError::bad_request(format!("malformed project ID '{raw}'")))
            })
            .transpose()?;
        let worker_phases = self
            .worker_phases
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|raw| {
                raw.parse::<Phase>()
                    .map_err(|_| ApiError::bad_request(format!("unknown phase '{raw}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventSelector {
            project_id,
            worker_phases,
        })
    }
}

/// `POST /v2/events`: create an Event.
pub async fn create(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(new_event): Json<NewEvent>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let event = state.events.create(&principal, new_event).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// `GET /v2/events`: list Events matching the selector.
pub async fn list(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let selector = query.into_selector()?;
    Ok(Json(state.events.list(&principal, &selector).await?))
}

/// `GET /v2/events/:id`: read an Event.
pub async fn get(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<Event>> {
    let event_id = parse_event_id(&id)?;
    Ok(Json(state.events.get(&principal, event_id).await?))
}

/// `POST /v2/events/:id/worker/cancellation`: cancel or abort the
/// Event's Worker.
pub async fn cancel(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let event_id = parse_event_id(&id)?;
    state.events.cancel(&principal, event_id).await?;
    Ok(StatusCode::OK)
}
