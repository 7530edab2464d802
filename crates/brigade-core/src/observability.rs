//! Logging for the Brigade control plane.
//!
//! All three components (API server, scheduler, observer) initialize
//! logging the same way: `BRIGADE_LOG_FORMAT` picks the output format
//! and `RUST_LOG` overrides levels. Log lines carry their correlating
//! fields inline (`event_id`, `project_id`, `job`, `phase`), so one
//! line is enough to follow a workload across components without
//! reconstructing span context.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt, EnvFilter};

/// Level directives applied when `RUST_LOG` is unset: Brigade itself at
/// `info`, the HTTP stack's per-request chatter at `warn`.
const DEFAULT_DIRECTIVES: &str = "info,tower_http=warn,hyper=warn";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Log output format, chosen by `BRIGADE_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// One JSON object per line, for log aggregation.
    Json,
    /// Human-readable output for local development.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Reads `BRIGADE_LOG_FORMAT`: `json` selects JSON; anything else,
    /// including unset, is pretty.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("BRIGADE_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initializes logging for a component from the environment. Repeated
/// calls are no-ops.
pub fn init_from_env() {
    init_logging(LogFormat::from_env());
}

/// Initializes logging with an explicit format. Repeated calls are
/// no-ops, so tests and embedded components may call this freely.
pub fn init_logging(format: LogFormat) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let builder = fmt().with_env_filter(filter).with_target(true);
    match format {
        // Flattened events keep `event_id` and friends as top-level
        // JSON keys, where log pipelines can index them.
        LogFormat::Json => builder.json().flatten_event(true).init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_a_no_op() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
        init_from_env();
    }

    #[test]
    fn format_defaults_to_pretty() {
        assert!(matches!(LogFormat::default(), LogFormat::Pretty));
    }
}
