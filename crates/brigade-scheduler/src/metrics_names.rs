//! Metric names emitted by the scheduler.

/// Counter: Worker workloads launched.
pub const WORKERS_LAUNCHED: &str = "brigade_scheduler_workers_launched_total";
/// Counter: Job workloads launched.
pub const JOBS_LAUNCHED: &str = "brigade_scheduler_jobs_launched_total";
/// Counter: tokens acked without side effect (duplicates, missing
/// entities, malformed payloads).
pub const TOKENS_DROPPED: &str = "brigade_scheduler_tokens_dropped_total";
/// Counter: tokens deferred because the project's admission window was
/// full.
pub const ADMISSION_DEFERRALS: &str = "brigade_scheduler_admission_deferrals_total";
/// Counter: workload launches abandoned as `SCHEDULING_FAILED`.
pub const LAUNCH_FAILURES: &str = "brigade_scheduler_launch_failures_total";
