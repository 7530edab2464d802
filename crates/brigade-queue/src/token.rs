//! Queue token payloads.

use serde::{Deserialize, Serialize};

use brigade_core::{Error, EventId, Result};

/// Token enqueued to a Project's `workers` queue: one per Event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerToken {
    /// The Event whose Worker awaits scheduling.
    pub event_id: EventId,
}

/// Token enqueued to a Project's `jobs` queue: one per created Job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobToken {
    /// The Event owning the Job.
    pub event_id: EventId,
    /// The Job's name, unique within its Worker.
    pub job_name: String,
}

impl WorkerToken {
    /// Serializes the token for enqueueing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::internal(format!("token encode: {e}")))
    }

    /// Parses a token from a queue payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] for malformed payloads, which consumers
    /// ack and drop.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::invalid(format!("worker token: {e}")))
    }
}

impl JobToken {
    /// Serializes the token for enqueueing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::internal(format!("token encode: {e}")))
    }

    /// Parses a token from a queue payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] for malformed payloads, which consumers
    /// ack and drop.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::invalid(format!("job token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_token_roundtrips() {
        let token = WorkerToken {
            event_id: EventId::generate(),
        };
        let decoded = WorkerToken::decode(&token.encode().unwrap()).unwrap();
        assert_eq!(token, decoded);
    }

    #[test]
    fn job_token_roundtrips() {
        let token = JobToken {
            event_id: EventId::generate(),
            job_name: "build".to_string(),
        };
        let decoded = JobToken::decode(&token.encode().unwrap()).unwrap();
        assert_eq!(token, decoded);
    }

    #[test]
    fn garbage_payloads_are_invalid_not_fatal() {
        let err = WorkerToken::decode(b"not json").unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
    }
}
