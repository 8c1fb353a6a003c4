//! Domain error types.
//!
//! Three tiers with different blast radius:
//! - [`DataError`] fails a single run, which keeps its partial result.
//! - [`ComputationError`] skips signal generation for one bar.
//! - [`ConfigError`] aborts the whole batch before any run starts.

use chrono::NaiveDateTime;

/// Malformed or inconsistent market data. Fatal to the affected run only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("bar series is empty")]
    Empty,

    #[error("duplicate timestamp {timestamp} at bar {index}")]
    DuplicateTimestamp {
        index: usize,
        timestamp: NaiveDateTime,
    },

    #[error("bar {index} at {timestamp} is not after previous bar at {previous}")]
    OutOfOrder {
        index: usize,
        previous: NaiveDateTime,
        timestamp: NaiveDateTime,
    },

    #[error("malformed bar {index} at {timestamp}: {reason}")]
    Malformed {
        index: usize,
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("gap between {previous} and {timestamp} at bar {index} exceeds {max_gap_secs}s")]
    Gap {
        index: usize,
        previous: NaiveDateTime,
        timestamp: NaiveDateTime,
        max_gap_secs: i64,
    },

    #[error("hedge asset {asset} has no bar at {timestamp}")]
    MissingPairBar {
        asset: String,
        timestamp: NaiveDateTime,
    },

    #[error("no data loaded for asset {asset}: {reason}")]
    MissingAsset { asset: String, reason: String },
}

/// A strategy could not produce a usable signal for the current bar.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputationError {
    #[error("{indicator} produced non-finite value {value}")]
    NonFinite { indicator: &'static str, value: f64 },

    #[error("{indicator} window is degenerate: {reason}")]
    DegenerateWindow {
        indicator: &'static str,
        reason: String,
    },
}

/// Invalid batch configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error in {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    Missing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    Invalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid asset spec: {0}")]
    InvalidAsset(String),
}

impl ConfigError {
    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level error type for nexora.
#[derive(Debug, thiserror::Error)]
pub enum NexoraError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("no data for {asset}")]
    NoData { asset: String },

    #[error("{file}:{line}: {reason}")]
    Parse {
        file: String,
        line: u64,
        reason: String,
    },

    #[error("worker pool error: {reason}")]
    WorkerPool { reason: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&NexoraError> for std::process::ExitCode {
    fn from(err: &NexoraError) -> Self {
        let code: u8 = match err {
            NexoraError::Io(_) | NexoraError::Csv(_) | NexoraError::WorkerPool { .. } => 1,
            NexoraError::Config(_) => 2,
            NexoraError::Data(_) | NexoraError::NoData { .. } | NexoraError::Parse { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
