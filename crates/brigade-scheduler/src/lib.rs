//! # brigade-scheduler
//!
//! The scheduler consumes per-project Worker and Job token queues and
//! launches the corresponding workloads on the substrate.
//!
//! Correctness under at-least-once delivery rests on two facts:
//!
//! - the API server's `PENDING -> STARTING` claim is the single
//!   serialization point, so duplicate tokens cannot double-start work
//! - workload names derive from Event IDs, so replayed substrate creates
//!   collide harmlessly
//!
//! Per project, Workers start in token order; an admission window caps
//! how many of a Project's Workers may be `STARTING` or `RUNNING` at
//! once. There is no coordination across projects.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

mod config;
mod loops;
pub mod metrics_names;

pub use config::SchedulerConfig;
pub use loops::{Disposition, Scheduler};
