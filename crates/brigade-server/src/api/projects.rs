//! Project and role-assignment endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use brigade_core::{
    PrincipalReference, PrincipalType, Project, ProjectId, ProjectRole, Role, RoleAssignment,
    SCOPE_GLOBAL,
};

use crate::api::context::Authenticated;
use crate::api::error::{ApiError, ApiResult};
use crate::server::AppState;

fn parse_project_id(raw: &str) -> Result<ProjectId, ApiError> {
    ProjectId::new(raw).map_err(|_| ApiError::bad_request(format!("malformed project ID '{raw}'")))
}

/// `POST /v2/projects`: create a Project.
pub async fn create(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(project): Json<Project>,
) -> ApiResult<StatusCode> {
    state.projects.create(&principal, project).await?;
    Ok(StatusCode::CREATED)
}

/// `GET /v2/projects`: list Projects.
pub async fn list(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.projects.list(&principal).await?))
}

/// `GET /v2/projects/:id`: read a Project.
pub async fn get(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    let project_id = parse_project_id(&id)?;
    Ok(Json(state.projects.get(&principal, &project_id).await?))
}

/// `DELETE /v2/projects/:id`: delete a Project.
pub async fn delete(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let project_id = parse_project_id(&id)?;
    state.projects.delete(&principal, &project_id).await?;
    Ok(StatusCode::OK)
}

/// `POST /v2/role-assignments`: grant a system role.
pub async fn grant_system_role(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(assignment): Json<RoleAssignment>,
) -> ApiResult<StatusCode> {
    state.roles.grant(&principal, assignment).await?;
    Ok(StatusCode::OK)
}

/// Query parameters identifying a system role assignment to revoke.
#[derive(Debug, Deserialize)]
pub struct RevokeSystemRoleQuery {
    role: Role,
    #[serde(rename = "principalType")]
    principal_type: PrincipalType,
    #[serde(rename = "principalID")]
    principal_id: String,
    scope: Option<String>,
}

/// `DELETE /v2/role-assignments`: revoke a system role.
pub async fn revoke_system_role(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Query(query): Query<RevokeSystemRoleQuery>,
) -> ApiResult<StatusCode> {
    let assignment = RoleAssignment {
        principal: PrincipalReference {
            principal_type: query.principal_type,
            id: query.principal_id,
        },
        role: query.role,
        scope: query.scope.unwrap_or_else(|| SCOPE_GLOBAL.to_string()),
    };
    state.roles.revoke(&principal, &assignment).await?;
    Ok(StatusCode::OK)
}

/// Body granting a project role; the project comes from the path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRoleGrantBody {
    principal: PrincipalReference,
    role: ProjectRole,
}

/// `POST /v2/projects/:id/role-assignments`: grant a project role.
pub async fn grant_project_role(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(body): Json<ProjectRoleGrantBody>,
) -> ApiResult<StatusCode> {
    let project_id = parse_project_id(&id)?;
    state
        .roles
        .grant_project(&principal, &project_id, body.principal, body.role)
        .await?;
    Ok(StatusCode::OK)
}

/// Query parameters identifying a project role assignment to revoke.
#[derive(Debug, Deserialize)]
pub struct RevokeProjectRoleQuery {
    role: ProjectRole,
    #[serde(rename = "principalType")]
    principal_type: PrincipalType,
    #[serde(rename = "principalID")]
    principal_id: String,
}

/// `DELETE /v2/projects/:id/role-assignments`: revoke a project role.
pub async fn revoke_project_role(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Query(query): Query<RevokeProjectRoleQuery>,
) -> ApiResult<StatusCode> {
    let project_id = parse_project_id(&id)?;
    state
        .roles
        .revoke_project(
            &principal,
            &project_id,
            PrincipalReference {
                principal_type: query.principal_type,
                id: query.principal_id,
            },
            query.role,
        )
        .await?;
    Ok(StatusCode::OK)
}
