//! Observer configuration.

use std::time::Duration;

use brigade_core::{Error, Result};

/// Tuning for the observer process.
#[derive(Debug, Clone, Copy)]
pub struct ObserverConfig {
    /// How often the API server is pinged. Any ping failure is fatal.
    pub healthcheck_interval: Duration,
    /// Grace period between a workload reaching a terminal phase and its
    /// deletion, so log collectors can finish scraping.
    pub delay_before_cleanup: Duration,
    /// How often non-terminal Workers and Jobs are checked against their
    /// declared timeouts.
    pub timeout_sweep_interval: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            healthcheck_interval: Duration::from_secs(30),
            delay_before_cleanup: Duration::from_secs(60),
            timeout_sweep_interval: Duration::from_secs(30),
        }
    }
}

impl ObserverConfig {
    /// Loads configuration from the environment: `HEALTHCHECK_INTERVAL`,
    /// `DELAY_BEFORE_CLEANUP`, and `TIMEOUT_SWEEP_INTERVAL`, all in
    /// seconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] for unparseable values.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.healthcheck_interval = seconds_env("HEALTHCHECK_INTERVAL", config.healthcheck_interval)?;
        config.delay_before_cleanup = seconds_env("DELAY_BEFORE_CLEANUP", config.delay_before_cleanup)?;
        config.timeout_sweep_interval =
            seconds_env("TIMEOUT_SWEEP_INTERVAL", config.timeout_sweep_interval)?;
        Ok(config)
    }
}

fn seconds_env(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::invalid(format!("invalid {key}: expected seconds"))),
        Err(_) => Ok(default),
    }
}
