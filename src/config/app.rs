//! Application configuration structures.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delivery::{DEFAULT_REQUEST_TIMEOUT, RetryPolicy};
use crate::reporter::{DEFAULT_GRANT_LABEL, DEFAULT_INTERVAL, ReporterConfig};
use crate::sample::{DEFAULT_SYSFS_PATH, FixedLevel, MetricSource, SysfsBattery};
use crate::window::{ExecutionHost, TimeBoxedHost, UnrestrictedHost};

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default collector endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://jsonplaceholder.typicode.com/posts";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_sysfs_path() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_PATH)
}

fn default_grant_label() -> String {
    DEFAULT_GRANT_LABEL.to_string()
}

// =============================================================================
// Metric Source Configuration
// =============================================================================

/// Where battery readings come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Linux power-supply capacity file.
    Sysfs {
        #[serde(default = "default_sysfs_path")]
        path: PathBuf,
    },
    /// Constant level in `[-1.0, 1.0]`.
    Fixed { level: f64 },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Sysfs {
            path: default_sysfs_path(),
        }
    }
}

impl SourceConfig {
    /// Build the configured source.
    pub fn build(&self) -> Arc<dyn MetricSource> {
        match self {
            Self::Sysfs { path } => Arc::new(SysfsBattery::new(path)),
            Self::Fixed { level } => Arc::new(FixedLevel(*level)),
        }
    }
}

// =============================================================================
// Execution Window Configuration
// =============================================================================

/// Background-execution budget of the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionWindowConfig {
    /// Per-grant budget. Absent means the process is never suspended.
    #[serde(default, with = "humantime_serde")]
    pub budget: Option<Duration>,

    /// Grant label (default: "SendBatteryData").
    #[serde(default = "default_grant_label")]
    pub label: String,
}

impl Default for ExecutionWindowConfig {
    fn default() -> Self {
        Self {
            budget: None,
            label: default_grant_label(),
        }
    }
}

impl ExecutionWindowConfig {
    /// Build the execution host matching the budget.
    pub fn build_host(&self) -> Arc<dyn ExecutionHost> {
        match self.budget {
            Some(budget) => Arc::new(TimeBoxedHost::new(budget)),
            None => Arc::new(UnrestrictedHost::new()),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Collector URL. `${VAR}` and `${VAR:-default}` are expanded on load.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Reporting period (default: 120s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Catch-up threshold on reactivation (default: same as `interval`).
    #[serde(default, with = "humantime_serde")]
    pub stale_after: Option<Duration>,

    /// Connect and total request timeout (default: 20s).
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Retry policy (default: 3 attempts, 2s apart).
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Metric source (default: sysfs BAT0).
    #[serde(default)]
    pub source: SourceConfig,

    /// Execution-window settings.
    #[serde(default)]
    pub execution_window: ExecutionWindowConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            interval: DEFAULT_INTERVAL,
            stale_after: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            source: SourceConfig::default(),
            execution_window: ExecutionWindowConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from YAML text.
    ///
    /// # Errors
    /// Returns `ConfigError` if the YAML is malformed or a field is invalid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.endpoint = expand_env_vars(&config.endpoint);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::invalid("endpoint", format!("'{}' is not a URL: {}", self.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "endpoint",
                format!("scheme must be http or https, got '{}'", url.scheme()),
            ));
        }

        if self.interval.is_zero() {
            return Err(ConfigError::invalid("interval", "must be non-zero"));
        }
        if self.stale_after.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::invalid("stale_after", "must be non-zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be non-zero"));
        }

        if let SourceConfig::Fixed { level } = self.source {
            if !(-1.0..=1.0).contains(&level) {
                return Err(ConfigError::invalid(
                    "source.level",
                    format!("must be within [-1.0, 1.0], got {level}"),
                ));
            }
        }

        if self.execution_window.budget.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::invalid("execution_window.budget", "must be non-zero"));
        }

        Ok(())
    }

    /// Effective catch-up threshold.
    pub fn stale_after(&self) -> Duration {
        self.stale_after.unwrap_or(self.interval)
    }

    /// Scheduler settings derived from this configuration.
    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig::default()
            .with_interval(self.interval)
            .with_stale_after(self.stale_after())
            .with_grant_label(self.execution_window.label.clone())
    }
}
