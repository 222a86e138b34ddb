use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while calibrating a device model
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("column '{column}' not found in {path}")]
    UnknownColumn { path: PathBuf, column: String },

    #[error("row {row} out of range in {path} ({rows} data rows)")]
    RowOutOfRange {
        path: PathBuf,
        row: usize,
        rows: usize,
    },

    #[error("{0} is read-only")]
    ReadOnly(PathBuf),

    #[error("failed to start simulator '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("simulator failed ({status}): {stderr}")]
    SimulatorFailed { status: String, stderr: String },

    #[error("simulator did not finish within {0:?}")]
    SimulatorTimeout(Duration),

    #[error("template error: {0}")]
    Template(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("objective error: {0}")]
    Objective(String),

    #[error("optimizer error: {0}")]
    Optimizer(String),
}

impl CalibrationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Whether this error comes from running the simulator or reading what it produced.
    ///
    /// These are scored with the failure penalty instead of aborting the run.
    pub fn is_evaluation_failure(&self) -> bool {
        matches!(
            self,
            Self::SimulatorFailed { .. }
                | Self::SimulatorTimeout(_)
                | Self::Parse { .. }
                | Self::Objective(_)
        ) || matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, CalibrationError>;
