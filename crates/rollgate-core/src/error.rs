//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration and registry operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised before any remote action is taken.
///
/// All of these are fatal for a run: the orchestrator refuses to touch the
/// fleet when it cannot trust its own view of it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read fleet file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed fleet file: {0}")]
    Parse(String),

    #[error("target list is empty")]
    Empty,

    #[error("malformed target in role '{role}': {reason}")]
    MalformedTarget { role: String, reason: String },

    #[error("duplicate target name: {0}")]
    DuplicateTarget(String),

    #[error("invalid duration '{0}' (expected e.g. 500ms, 5s, 2m, 1h)")]
    InvalidDuration(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("nothing to do: {0}")]
    EmptyPlan(String),
}
