//! Scheduler configuration.

use std::time::Duration;

use brigade_core::{Error, Result};

/// Tuning for the scheduler process.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// How often the project list is refreshed to pick up new and
    /// deleted projects.
    pub project_refresh_interval: Duration,
    /// Delivery attempts before a failing workload launch is abandoned
    /// and the work is marked `SCHEDULING_FAILED`.
    pub max_launch_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            project_refresh_interval: Duration::from_secs(30),
            max_launch_attempts: 5,
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from the environment:
    /// `PROJECT_REFRESH_INTERVAL` (seconds) and `MAX_LAUNCH_ATTEMPTS`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] for unparseable values.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("PROJECT_REFRESH_INTERVAL") {
            let secs = value
                .parse::<u64>()
                .map_err(|_| Error::invalid("invalid PROJECT_REFRESH_INTERVAL"))?;
            config.project_refresh_interval = Duration::from_secs(secs);
        }
        if let Ok(value) = std::env::var("MAX_LAUNCH_ATTEMPTS") {
            config.max_launch_attempts = value
                .parse::<u32>()
                .map_err(|_| Error::invalid("invalid MAX_LAUNCH_ATTEMPTS"))?;
            if config.max_launch_attempts == 0 {
                return Err(Error::invalid("MAX_LAUNCH_ATTEMPTS must be at least 1"));
            }
        }
        Ok(config)
    }
}
