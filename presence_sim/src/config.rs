//! Harness configuration: defaults, environment overrides, CLI overrides.

use crate::orchestrator::WaitBounds;
use presence_core::{ReportLog, TelemetryStore};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ENV_ARTIFACTS_DIR: &str = "PERSONA_ARTIFACTS_DIR";
pub const ENV_REPORT_PATH: &str = "PERSONA_REPORT_PATH";
pub const ENV_SEED: &str = "PERSONA_SEED";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be an unsigned integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Master seed for simulated latencies; run ids stay random per run
    pub seed: u64,

    /// Where telemetry files are written and read back
    pub artifacts_dir: PathBuf,

    /// Cumulative friction report
    pub report_path: PathBuf,

    pub affordance_timeout: Duration,
    pub event_timeout: Duration,
    pub poll_interval: Duration,

    /// Virtual latency range for each simulated navigation
    pub navigation_latency_ms: (u64, u64),
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            artifacts_dir: PathBuf::from("artifacts/persona-runs"),
            report_path: PathBuf::from("docs/testing/persona-feedback.md"),
            affordance_timeout: Duration::from_millis(2000),
            event_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(25),
            navigation_latency_ms: (80, 400),
        }
    }
}

impl HarnessConfig {
    /// Defaults with `PERSONA_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_ARTIFACTS_DIR).filter(|v| !v.is_empty()) {
            config.artifacts_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_REPORT_PATH).filter(|v| !v.is_empty()) {
            config.report_path = PathBuf::from(path);
        }
        if let Some(seed) = lookup(ENV_SEED).filter(|v| !v.is_empty()) {
            config.seed = seed.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                var: ENV_SEED,
                value: seed.clone(),
            })?;
        }
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = path.into();
        self
    }

    pub fn with_waits(mut self, waits: WaitBounds) -> Self {
        self.affordance_timeout = waits.affordance_timeout;
        self.event_timeout = waits.event_timeout;
        self.poll_interval = waits.poll_interval;
        self
    }

    pub fn with_navigation_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.navigation_latency_ms = (min_ms, max_ms);
        self
    }

    pub fn wait_bounds(&self) -> WaitBounds {
        WaitBounds {
            affordance_timeout: self.affordance_timeout,
            event_timeout: self.event_timeout,
            poll_interval: self.poll_interval,
        }
    }

    pub fn telemetry_store(&self) -> TelemetryStore {
        TelemetryStore::new(&self.artifacts_dir)
    }

    pub fn report_log(&self) -> ReportLog {
        ReportLog::new(&self.report_path)
    }
}
