//! Configuration errors and value parsing helpers.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Errors from loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for [`AppConfig`](super::AppConfig).
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds a value the reporter cannot run with.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Parse a humantime duration such as `120s`, `2m` or `1m30s`.
///
/// Used as the clap value parser for `--interval`.
///
/// # Examples
///
/// ```
/// use beacon::config::parse_duration;
///
/// assert_eq!(parse_duration("120s").unwrap().as_secs(), 120);
/// assert_eq!(parse_duration("2m").unwrap().as_secs(), 120);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Expand `${VAR}` and `${VAR:-default}` references from the process
/// environment.
pub fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expand variable references using `lookup`. Unset variables without a
/// default expand to the empty string.
fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    static VAR_REF: OnceLock<Regex> = OnceLock::new();

    let pattern = VAR_REF.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("variable reference pattern is valid")
    });

    pattern
        .replace_all(input, |caps: &Captures| {
            lookup(&caps[1]).unwrap_or_else(|| {
                caps.get(2)
                    .map(|m| m.as_str().to_owned())
                    .unwrap_or_default()
            })
        })
        .into_owned()
}
