//! Metric names emitted by the observer.

/// Counter: pod events applied to Worker status.
pub const WORKER_POD_SYNCS: &str = "brigade_observer_worker_pod_syncs_total";
/// Counter: pod events applied to Job status.
pub const JOB_POD_SYNCS: &str = "brigade_observer_job_pod_syncs_total";
/// Counter: workload cleanups requested.
pub const CLEANUPS: &str = "brigade_observer_cleanups_total";
/// Counter: Workers and Jobs forced to `TIMED_OUT`.
pub const TIMEOUTS: &str = "brigade_observer_timeouts_total";
/// Counter: watch resyncs observed.
pub const WATCH_RESYNCS: &str = "brigade_observer_watch_resyncs_total";
