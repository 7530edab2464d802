//! Observed status of a Worker or Job workload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::phase::Phase;

/// Status of a Worker or Job: current phase, execution timestamps, and an
/// error string for phases that represent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// Current lifecycle phase.
    pub phase: Phase,
    /// When the workload began running, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the workload reached a terminal phase, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Description of the failure, for failure phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for WorkloadStatus {
    fn default() -> Self {
        Self::pending()
    }
}

impl WorkloadStatus {
    /// Returns the initial status of a freshly created workload.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            phase: Phase::Pending,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Returns a status with the given phase and no timestamps.
    ///
    /// Callers reporting an observed phase (the observer's pod sync loops)
    /// use this; the API server stamps `started_at`/`ended_at` when it
    /// commits the transition.
    #[must_use]
    pub const fn with_phase(phase: Phase) -> Self {
        Self {
            phase,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Attaches an error description.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Returns true if the status is in a terminal phase.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Applies a transition to `target`, stamping timestamps per the
    /// transition rules: entering `RUNNING` from a non-terminal phase sets
    /// `started_at`, entering any terminal phase sets `ended_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the transition is not an edge of the
    /// phase graph.
    pub fn transition_to(
        &self,
        target: Phase,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !self.phase.can_transition_to(target) {
            return Err(Error::conflict(format!(
                "illegal phase transition {} -> {}",
                self.phase, target
            )));
        }
        let mut next = self.clone();
        next.phase = target;
        if let Some(error) = error {
            next.error = Some(error);
        }
        if target == Phase::Running && next.started_at.is_none() {
            next.started_at = Some(now);
        }
        if target.is_terminal() {
            next.ended_at = Some(now);
        }
        Ok(next)
    }

    /// The deduplication key used by status watches: consecutive snapshots
    /// with an equal key are suppressed.
    #[must_use]
    pub fn dedupe_key(&self) -> (Phase, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.phase, self.started_at, self.ended_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_to_running_stamps_started_at() {
        let now = Utc::now();
        let status = WorkloadStatus::with_phase(Phase::Starting)
            .transition_to(Phase::Running, None, now)
            .unwrap();
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.started_at, Some(now));
        assert!(status.ended_at.is_none());
    }

    #[test]
    fn transition_to_terminal_stamps_ended_at() {
        let started = Utc::now();
        let running = WorkloadStatus::with_phase(Phase::Starting)
            .transition_to(Phase::Running, None, started)
            .unwrap();
        let ended = Utc::now();
        let done = running.transition_to(Phase::Succeeded, None, ended).unwrap();
        assert_eq!(done.started_at, Some(started));
        assert_eq!(done.ended_at, Some(ended));
        assert!(done.is_terminal());
    }

    #[test]
    fn started_at_is_not_overwritten_on_recovery() {
        let started = Utc::now();
        let running = WorkloadStatus::with_phase(Phase::Starting)
            .transition_to(Phase::Running, None, started)
            .unwrap();
        let lost = running.transition_to(Phase::Unknown, None, Utc::now()).unwrap();
        let recovered = lost.transition_to(Phase::Running, None, Utc::now()).unwrap();
        assert_eq!(recovered.started_at, Some(started));
    }

    #[test]
    fn illegal_transition_is_a_conflict() {
        let status = WorkloadStatus::pending();
        let err = status
            .transition_to(Phase::Succeeded, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn error_string_survives_transition() {
        let status = WorkloadStatus::with_phase(Phase::Starting)
            .transition_to(
                Phase::SchedulingFailed,
                Some("image pull failed".to_string()),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(status.error.as_deref(), Some("image pull failed"));
    }
}
