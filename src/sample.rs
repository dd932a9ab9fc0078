//! Metric samples and the sources they are read from.
//!
//! A [`Sample`] pairs one metric reading with its capture time. Readings come
//! from a [`MetricSource`], which is any synchronous function returning a
//! level in `[0.0, 1.0]` or [`UNAVAILABLE`].

use std::path::PathBuf;

use chrono::{DateTime, SubsecRound, Utc};

/// Sentinel level meaning the metric could not be read.
pub const UNAVAILABLE: f64 = -1.0;

/// Default Linux power-supply capacity file.
pub const DEFAULT_SYSFS_PATH: &str = "/sys/class/power_supply/BAT0/capacity";

/// One metric reading paired with its capture timestamp.
///
/// Immutable once created. Levels are normalized on construction:
/// NaN and negative readings become [`UNAVAILABLE`], readings above `1.0`
/// are clamped to `1.0`. Timestamps are truncated to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    value: f64,
    captured_at: DateTime<Utc>,
}

impl Sample {
    /// Create a sample from a raw reading.
    pub fn new(value: f64, captured_at: DateTime<Utc>) -> Self {
        let value = if value.is_nan() || value < 0.0 {
            UNAVAILABLE
        } else {
            value.min(1.0)
        };

        Self {
            value,
            captured_at: captured_at.trunc_subsecs(0),
        }
    }

    /// Read `source` and stamp the reading with the current time.
    pub fn capture(source: &dyn MetricSource) -> Self {
        Self::new(source.read(), Utc::now())
    }

    /// Metric level, or [`UNAVAILABLE`].
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Capture time (UTC, second precision).
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Whether the source reported the metric as unavailable.
    pub fn is_unavailable(&self) -> bool {
        self.value == UNAVAILABLE
    }
}

/// Synchronous source of a single metric level.
///
/// Implemented for any `Fn() -> f64` closure, so tests can inject readings
/// directly.
///
/// `read` runs on a runtime worker while the scheduler state is locked, so
/// it must be cheap and must not block on I/O that can stall. A local sysfs
/// read qualifies; a network or IPC query does not and should be cached by
/// a background task instead.
pub trait MetricSource: Send + Sync + 'static {
    /// Read the current level: `[0.0, 1.0]`, or negative when unavailable.
    fn read(&self) -> f64;
}

impl<F> MetricSource for F
where
    F: Fn() -> f64 + Send + Sync + 'static,
{
    fn read(&self) -> f64 {
        self()
    }
}

/// Battery level read from a Linux power-supply `capacity` file.
///
/// The file holds an integer percentage; it is scaled to `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    path: PathBuf,
}

impl SysfsBattery {
    /// Create a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the capacity file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Default for SysfsBattery {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_PATH)
    }
}

impl MetricSource for SysfsBattery {
    fn read(&self) -> f64 {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Battery level unavailable");
                return UNAVAILABLE;
            }
        };

        match raw.trim().parse::<f64>() {
            Ok(percent) => percent / 100.0,
            Err(e) => {
                tracing::debug!(
                    path = %self.path.display(),
                    raw = %raw.trim(),
                    error = %e,
                    "Unparseable battery capacity"
                );
                UNAVAILABLE
            }
        }
    }
}

/// Constant level, for demos and hosts without a battery.
#[derive(Debug, Clone, Copy)]
pub struct FixedLevel(pub f64);

impl MetricSource for FixedLevel {
    fn read(&self) -> f64 {
        self.0
    }
}
