//! Events: the unit of work submitted against a Project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{EventId, ProjectId};
use crate::worker::Worker;

/// A request to execute a pipeline.
///
/// Immutable after creation except for the embedded Worker (and its Jobs),
/// whose status the API server advances on behalf of the scheduler and
/// observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier, assigned at creation.
    pub id: EventId,
    /// The Project this Event executes under.
    pub project_id: ProjectId,
    /// Identifier of the gateway that produced the Event.
    pub source: String,
    /// Event type, interpreted by the worker script.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload handed to the worker script.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "payload_base64")]
    pub payload: Vec<u8>,
    /// When the Event was accepted.
    pub created_at: DateTime<Utc>,
    /// The Event's Worker.
    pub worker: Worker,
}

/// A caller's request to create an Event.
///
/// The API server assigns the ID, stamps `created_at`, and builds the
/// Worker from the Project's worker template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    /// The Project to execute under.
    pub project_id: ProjectId,
    /// Identifier of the gateway producing the Event.
    pub source: String,
    /// Event type, interpreted by the worker script.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload handed to the worker script.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "payload_base64")]
    pub payload: Vec<u8>,
}

/// Selector for listing Events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSelector {
    /// Restrict to Events of one Project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    /// Restrict to Events whose Worker is in one of these phases. Empty
    /// means any phase.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_phases: Vec<crate::phase::Phase>,
}

impl EventSelector {
    /// Returns true if the Event satisfies the selector.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(project_id) = &self.project_id {
            if event.project_id != *project_id {
                return false;
            }
        }
        self.worker_phases.is_empty() || self.worker_phases.contains(&event.worker.status.phase)
    }
}

mod payload_base64 {
    //! Payload bytes travel base64-encoded in JSON bodies.

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
