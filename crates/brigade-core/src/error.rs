//! Error types and result aliases shared across the Brigade control plane.
//!
//! Every error carries one of seven kinds so that callers (HTTP handlers,
//! the scheduler's ack/nack logic, the observer's loops) can branch on the
//! kind without parsing messages.

use std::fmt;

/// The result type used throughout Brigade.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Brigade control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity does not exist.
    #[error("not found: {resource_type} with id {id}")]
    NotFound {
        /// The type of resource that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// An optimistic-concurrency failure or an illegal state transition.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting operation.
        message: String,
    },

    /// Schema or semantic validation failure.
    #[error("invalid: {message}")]
    Invalid {
        /// Description of what made the input invalid.
        message: String,
    },

    /// The caller could not be identified.
    #[error("authentication failed")]
    AuthnFailed,

    /// The caller was identified but is not permitted to perform the
    /// operation.
    #[error("authorization failed: {message}")]
    AuthzFailed {
        /// Description of the missing permission.
        message: String,
    },

    /// A store, queue, or substrate backend is transiently unreachable.
    #[error("backend unavailable: {message}")]
    BackendUnavailable {
        /// Description of the backend failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new validation error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Creates a new authorization error.
    #[must_use]
    pub fn authz(message: impl Into<String>) -> Self {
        Self::AuthzFailed {
            message: message.into(),
        }
    }

    /// Creates a new backend-unavailable error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new backend-unavailable error with a source cause.
    #[must_use]
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if retrying the operation against the same backend may
    /// succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}
