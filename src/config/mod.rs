//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. Nothing here
//! is reloaded while the process runs.

use std::time::Duration;

use crate::dispatcher::{DEFAULT_JOB_EXPIRY, DEFAULT_WORKERS, DispatcherConfig};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of parallel workers (`JOBQ_WORKERS`).
    pub workers: usize,
    /// Retention for completed jobs (`JOBQ_JOB_EXPIRY_MS`).
    pub job_expiry: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let workers = optional_var("JOBQ_WORKERS")?.unwrap_or(DEFAULT_WORKERS as u64);
        let job_expiry = optional_var("JOBQ_JOB_EXPIRY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_JOB_EXPIRY);

        Ok(Self {
            workers: usize::try_from(workers)
                .map_err(|_| Error::Config(format!("JOBQ_WORKERS out of range: {workers}")))?,
            job_expiry,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Dispatcher options carried by this configuration.
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .workers(self.workers)
            .job_expiry(self.job_expiry)
    }
}

fn optional_var(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is not a number: {e}"))),
        Err(_) => Ok(None),
    }
}
