//! Strongly-typed identifiers for Brigade entities.
//!
//! Event identifiers are ULIDs: lexicographically sortable by creation time
//! and globally unique without coordination. Project identifiers are chosen
//! by users and validated against the same character set Kubernetes accepts
//! for object names, because workload names are derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for an Event.
///
/// Worker pod names, workspace volume names, and the Event secret name are
/// all derived from this value, which keeps workload creation idempotent
/// across queue redeliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Ulid);

impl EventId {
    /// Generates a new unique event ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates an event ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        chrono::DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s).map(Self).map_err(|e| Error::Invalid {
            message: format!("invalid event ID '{s}': {e}"),
        })
    }
}

/// A user-chosen, stable identifier for a Project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Validates and wraps a project identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if the identifier is not a valid DNS
    /// label (lowercase alphanumerics and `-`, at most 63 characters,
    /// starting and ending with an alphanumeric).
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_dns_label("project ID", &id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Validates that `value` is usable as a Kubernetes object-name fragment.
///
/// Job names and project IDs both pass through here; both end up embedded
/// in pod and secret names.
pub fn validate_dns_label(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 63 {
        return Err(Error::invalid(format!(
            "{what} '{value}' must be between 1 and 63 characters"
        )));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_ends = value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric());
    if !valid_chars || !valid_ends {
        return Err(Error::invalid(format!(
            "{what} '{value}' must consist of lowercase alphanumerics and '-', \
             and must start and end with an alphanumeric"
        )));
    }
    Ok(())
}
