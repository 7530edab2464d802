//! Worker and Job lifecycle phases.
//!
//! Workers and Jobs share one phase vocabulary and one transition graph.
//! Phase transitions are monotonic: terminal phases are sinks, and the API
//! server rejects any status update whose transition is not an edge of this
//! graph.

use serde::{Deserialize, Serialize};

/// The lifecycle phase of a Worker or Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Awaiting pickup by the scheduler.
    Pending,
    /// The scheduler has claimed the work and is launching the workload.
    Starting,
    /// The workload's pod is running.
    Running,
    /// The workload ran to completion successfully.
    Succeeded,
    /// The workload ran and failed.
    Failed,
    /// Canceled before the workload was launched.
    Canceled,
    /// Aborted after the workload was launched.
    Aborted,
    /// The workload exceeded its declared timeout.
    TimedOut,
    /// The workload could not be launched.
    SchedulingFailed,
    /// The observer lost track of the workload's pod.
    Unknown,
}

impl Phase {
    /// Returns true if this phase permits no further transitions.
    ///
    /// [`Phase::Unknown`] is not terminal: a watch resync may still recover
    /// the true phase.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::Canceled
                | Self::Aborted
                | Self::TimedOut
                | Self::SchedulingFailed
        )
    }

    /// Returns true if the workload has been launched (or an attempt was in
    /// flight) when in this phase.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Unknown)
    }

    /// Returns true if `target` is reachable from this phase in one step.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(
                target,
                Self::Starting
                    | Self::Canceled
                    | Self::TimedOut
                    | Self::SchedulingFailed
                    | Self::Unknown
            ),
            Self::Starting => matches!(
                target,
                Self::Running
                    | Self::Aborted
                    | Self::TimedOut
                    | Self::SchedulingFailed
                    | Self::Unknown
            ),
            Self::Running => matches!(
                target,
                Self::Succeeded | Self::Failed | Self::Aborted | Self::TimedOut | Self::Unknown
            ),
            // A resync may recover the true phase of a lost pod.
            Self::Unknown => matches!(
                target,
                Self::Running | Self::Succeeded | Self::Failed | Self::Aborted | Self::TimedOut
            ),
            Self::Succeeded
            | Self::Failed
            | Self::Canceled
            | Self::Aborted
            | Self::TimedOut
            | Self::SchedulingFailed => false,
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "STARTING" => Ok(Self::Starting),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            "ABORTED" => Ok(Self::Aborted),
            "TIMED_OUT" => Ok(Self::TimedOut),
            "SCHEDULING_FAILED" => Ok(Self::SchedulingFailed),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(crate::error::Error::invalid(format!(
                "unknown phase '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Aborted => "ABORTED",
            Self::TimedOut => "TIMED_OUT",
            Self::SchedulingFailed => "SCHEDULING_FAILED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Phase; 10] = [
        Phase::Pending,
        Phase::Starting,
        Phase::Running,
        Phase::Succeeded,
        Phase::Failed,
        Phase::Canceled,
        Phase::Aborted,
        Phase::TimedOut,
        Phase::SchedulingFailed,
        Phase::Unknown,
    ];

    #[test]
    fn happy_path_is_a_valid_walk() {
        assert!(Phase::Pending.can_transition_to(Phase::Starting));
        assert!(Phase::Starting.can_transition_to(Phase::Running));
        assert!(Phase::Running.can_transition_to(Phase::Succeeded));
        assert!(Phase::Running.can_transition_to(Phase::Failed));
    }

    #[test]
    fn terminal_phases_are_sinks() {
        for phase in ALL.iter().filter(|p| p.is_terminal()) {
            for target in ALL {
                assert!(
                    !phase.can_transition_to(target),
                    "{phase} -> {target} should be rejected"
                );
            }
        }
    }

    #[test]
    fn unknown_is_not_terminal_and_can_recover() {
        assert!(!Phase::Unknown.is_terminal());
        assert!(Phase::Unknown.can_transition_to(Phase::Running));
        assert!(Phase::Unknown.can_transition_to(Phase::Succeeded));
        assert!(Phase::Unknown.can_transition_to(Phase::Failed));
        assert!(!Phase::Unknown.can_transition_to(Phase::Pending));
    }

    #[test]
    fn canceled_only_before_start_aborted_only_after() {
        assert!(Phase::Pending.can_transition_to(Phase::Canceled));
        assert!(!Phase::Pending.can_transition_to(Phase::Aborted));
        assert!(Phase::Starting.can_transition_to(Phase::Aborted));
        assert!(!Phase::Starting.can_transition_to(Phase::Canceled));
        assert!(Phase::Running.can_transition_to(Phase::Aborted));
        assert!(!Phase::Running.can_transition_to(Phase::Canceled));
    }

    #[test]
    fn scheduling_failed_only_during_or_before_starting() {
        assert!(Phase::Pending.can_transition_to(Phase::SchedulingFailed));
        assert!(Phase::Starting.can_transition_to(Phase::SchedulingFailed));
        assert!(!Phase::Running.can_transition_to(Phase::SchedulingFailed));
        assert!(!Phase::Unknown.can_transition_to(Phase::SchedulingFailed));
    }

    #[test]
    fn every_non_terminal_can_time_out() {
        for phase in ALL.iter().filter(|p| !p.is_terminal()) {
            assert!(
                phase.can_transition_to(Phase::TimedOut),
                "{phase} -> TIMED_OUT should be allowed"
            );
        }
    }

    #[test]
    fn wire_format_is_screaming_snake_case() {
        let json = serde_json::to_string(&Phase::SchedulingFailed).unwrap();
        assert_eq!(json, "\"SCHEDULING_FAILED\"");
        let parsed: Phase = serde_json::from_str("\"TIMED_OUT\"").unwrap();
        assert_eq!(parsed, Phase::TimedOut);
    }
}
