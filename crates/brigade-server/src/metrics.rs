//! Metric names emitted by the API server.
//!
//! Centralized so dashboards and alerts have one place to look.

/// Metric name constants.
pub mod names {
    /// Counter: Events accepted.
    pub const EVENTS_CREATED: &str = "brigade_apiserver_events_created_total";
    /// Counter: Events canceled or aborted by callers.
    pub const EVENTS_CANCELED: &str = "brigade_apiserver_events_canceled_total";
    /// Counter: committed Worker status transitions.
    pub const WORKER_TRANSITIONS: &str = "brigade_apiserver_worker_transitions_total";
    /// Counter: committed Job status transitions.
    pub const JOB_TRANSITIONS: &str = "brigade_apiserver_job_transitions_total";
    /// Counter: Jobs created.
    pub const JOBS_CREATED: &str = "brigade_apiserver_jobs_created_total";
}

/// Metric label keys.
pub mod labels {
    /// The phase a transition committed to.
    pub const PHASE: &str = "phase";
}
