//! Configuration module for Beacon.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Collector endpoint and request timeout
//! - Reporting interval and catch-up threshold
//! - Retry policy
//! - Metric source and execution-window budget

mod app;
mod validation;

pub use app::{AppConfig, DEFAULT_ENDPOINT, ExecutionWindowConfig, SourceConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
