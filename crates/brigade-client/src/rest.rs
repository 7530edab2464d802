//! REST implementation of the client contracts.
//!
//! Thin JSON-over-HTTP binding for the `/v2` API. Every response status is
//! mapped back onto the shared error kinds so callers branch exactly as
//! they would against the in-process services.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use brigade_core::{
    Error, Event, EventId, EventSelector, JobSpec, NewEvent, NewJob, Project, ProjectId, Result,
    WorkloadStatus,
};

use crate::{
    EventsClient, HealthcheckClient, JobsClient, PingResponse, ProjectsClient, WorkersClient,
};

/// Error body returned by the API server.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    message: String,
}

/// A REST client for the Brigade API, authenticated with a bearer token.
///
/// One instance implements all of the collaborator traits; components
/// share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RestApiClient {
    http: reqwest::Client,
    address: String,
    token: String,
}

impl RestApiClient {
    /// Creates a client for the API server at `address` (e.g.
    /// `https://brigade.example.com`).
    #[must_use]
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            http: reqwest::Client::new(),
            address: address.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.address, path))
            .bearer_auth(&self.token)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::backend_with_source("api request failed", e))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| Error::internal(format!("malformed api response: {e}")));
        }
        Err(error_from_response(status, response).await)
    }

    async fn execute_empty(&self, request: RequestBuilder) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::backend_with_source("api request failed", e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(error_from_response(status, response).await)
    }
}

async fn error_from_response(status: StatusCode, response: reqwest::Response) -> Error {
    let message = match response.json::<ApiErrorBody>().await {
        Ok(body) => format!("{}: {}", body.code, body.message),
        Err(_) => format!("api returned {status}"),
    };
    match status {
        StatusCode::NOT_FOUND => Error::NotFound {
            resource_type: "resource",
            id: message,
        },
        StatusCode::CONFLICT => Error::conflict(message),
        StatusCode::BAD_REQUEST => Error::invalid(message),
        StatusCode::UNAUTHORIZED => Error::AuthnFailed,
        StatusCode::FORBIDDEN => Error::authz(message),
        StatusCode::SERVICE_UNAVAILABLE => Error::backend(message),
        _ => Error::internal(message),
    }
}

fn selector_query(selector: &EventSelector) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(project_id) = &selector.project_id {
        query.push(("projectID", project_id.to_string()));
    }
    if !selector.worker_phases.is_empty() {
        let phases = selector
            .worker_phases
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        query.push(("workerPhases", phases));
    }
    query
}

#[async_trait]
impl HealthcheckClient for RestApiClient {
    async fn ping(&self) -> Result<PingResponse> {
        self.execute(self.request(Method::GET, "v2/ping")).await
    }
}

#[async_trait]
impl ProjectsClient for RestApiClient {
    async fn list(&self) -> Result<Vec<Project>> {
        self.execute(self.request(Method::GET, "v2/projects")).await
    }

    async fn get(&self, project_id: &ProjectId) -> Result<Project> {
        self.execute(self.request(Method::GET, &format!("v2/projects/{project_id}")))
            .await
    }
}

#[async_trait]
impl EventsClient for RestApiClient {
    async fn create(&self, event: NewEvent) -> Result<Event> {
        self.execute(self.request(Method::POST, "v2/events").json(&event))
            .await
    }

    async fn get(&self, event_id: EventId) -> Result<Event> {
        self.execute(self.request(Method::GET, &format!("v2/events/{event_id}")))
            .await
    }

    async fn list(&self, selector: &EventSelector) -> Result<Vec<Event>> {
        self.execute(
            self.request(Method::GET, "v2/events")
                .query(&selector_query(selector)),
        )
        .await
    }

    async fn cancel(&self, event_id: EventId) -> Result<()> {
        self.execute_empty(
            self.request(
                Method::POST,
                &format!("v2/events/{event_id}/worker/cancellation"),
            ),
        )
        .await
    }
}

#[async_trait]
impl WorkersClient for RestApiClient {
    async fn start(&self, event_id: EventId) -> Result<()> {
        self.execute_empty(self.request(Method::PUT, &format!("v2/events/{event_id}/worker/start")))
            .await
    }

    async fn get_status(&self, event_id: EventId) -> Result<WorkloadStatus> {
        self.execute(self.request(Method::GET, &format!("v2/events/{event_id}/worker/status")))
            .await
    }

    async fn update_status(
        &self,
        event_id: EventId,
        status: WorkloadStatus,
    ) -> Result<WorkloadStatus> {
        self.execute(
            self.request(Method::PUT, &format!("v2/events/{event_id}/worker/status"))
                .json(&status),
        )
        .await
    }

    async fn cleanup(&self, event_id: EventId) -> Result<()> {
        self.execute_empty(self.request(Method::DELETE, &format!("v2/events/{event_id}/worker")))
            .await
    }

    async fn timeout(&self, event_id: EventId) -> Result<()> {
        self.execute_empty(
            self.request(Method::PUT, &format!("v2/events/{event_id}/worker/timeout")),
        )
        .await
    }
}

#[async_trait]
impl JobsClient for RestApiClient {
    async fn create(&self, event_id: EventId, job_name: &str, spec: JobSpec) -> Result<()> {
        self.execute_empty(
            self.request(Method::POST, &format!("v2/events/{event_id}/worker/jobs"))
                .json(&NewJob {
                    name: job_name.to_string(),
                    spec,
                }),
        )
        .await
    }

    async fn start(&self, event_id: EventId, job_name: &str) -> Result<()> {
        self.execute_empty(self.request(
            Method::PUT,
            &format!("v2/events/{event_id}/worker/jobs/{job_name}/start"),
        ))
        .await
    }

    async fn get_status(&self, event_id: EventId, job_name: &str) -> Result<WorkloadStatus> {
        self.execute(self.request(
            Method::GET,
            &format!("v2/events/{event_id}/worker/jobs/{job_name}/status"),
        ))
        .await
    }

    async fn update_status(
        &self,
        event_id: EventId,
        job_name: &str,
        status: WorkloadStatus,
    ) -> Result<WorkloadStatus> {
        self.execute(
            self.request(
                Method::PUT,
                &format!("v2/events/{event_id}/worker/jobs/{job_name}/status"),
            )
            .json(&status),
        )
        .await
    }

    async fn cleanup(&self, event_id: EventId, job_name: &str) -> Result<()> {
        self.execute_empty(self.request(
            Method::DELETE,
            &format!("v2/events/{event_id}/worker/jobs/{job_name}"),
        ))
        .await
    }

    async fn timeout(&self, event_id: EventId, job_name: &str) -> Result<()> {
        self.execute_empty(self.request(
            Method::PUT,
            &format!("v2/events/{event_id}/worker/jobs/{job_name}/timeout"),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_trailing_slash_is_normalized() {
        let client = RestApiClient::new("http://localhost:8080/", "token");
        assert_eq!(client.address, "http://localhost:8080");
    }

    #[test]
    fn selector_query_encodes_phases_comma_separated() {
        let selector = EventSelector {
            project_id: Some(ProjectId::new("blue-book").unwrap()),
            worker_phases: vec![brigade_core::Phase::Starting, brigade_core::Phase::Running],
        };
        let query = selector_query(&selector);
        assert!(query.contains(&("projectID", "blue-book".to_string())));
        assert!(query.contains(&("workerPhases", "STARTING,RUNNING".to_string())));
    }

    #[test]
    fn ping_response_uses_capitalized_version_field() {
        let parsed: PingResponse = serde_json::from_str(r#"{"Version":"2.0.1"}"#).unwrap();
        assert_eq!(parsed.version, "2.0.1");
    }
}
