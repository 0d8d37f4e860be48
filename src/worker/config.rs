//! Worker runtime knobs from the environment and params-file loading.

use crate::ledger::SubmissionProtocol;
use crate::params::{format_violations, GlobalParams, Violation};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Runtime knobs for a batch processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How often the processor polls the ledger without an event.
    pub poll_interval: Duration,
    /// Caller-side deadline on every blob store operation.
    pub io_timeout: Duration,
    /// Upper bound of the random delay before a reveal.
    pub reveal_backoff: Duration,
    /// Submission protocol the processor speaks.
    pub protocol: SubmissionProtocol,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2_000),
            io_timeout: Duration::from_millis(10_000),
            reveal_backoff: Duration::from_millis(1_500),
            protocol: SubmissionProtocol::Direct,
        }
    }
}

impl WorkerConfig {
    /// Reads `BQ_POLL_INTERVAL_MS`, `BQ_IO_TIMEOUT_MS`,
    /// `BQ_REVEAL_BACKOFF_MS` and `BQ_PROTOCOL`, falling back to defaults
    /// for unset or unparsable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        Self {
            poll_interval: millis("BQ_POLL_INTERVAL_MS", defaults.poll_interval),
            io_timeout: millis("BQ_IO_TIMEOUT_MS", defaults.io_timeout),
            reveal_backoff: millis("BQ_REVEAL_BACKOFF_MS", defaults.reveal_backoff),
            protocol: lookup("BQ_PROTOCOL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.protocol),
        }
    }
}

/// Errors raised while loading a params file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid params JSON.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// The params violate one or more rules.
    #[error("invalid params: {}", format_violations(.0))]
    Invalid(Vec<Violation>),
}

/// Loads camelCase JSON params from `path` and validates them.
pub fn load_params(path: &Path) -> Result<GlobalParams, ConfigError> {
    let display = path.display().to_string();
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    let params: GlobalParams =
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
    params.ensure_valid().map_err(ConfigError::Invalid)?;
    Ok(params)
}
