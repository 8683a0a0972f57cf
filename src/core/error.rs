/// Error taxonomy for the backup engine
///
/// Every failure the core can produce is one of these typed variants.
/// None of the messages ever carry a credential secret.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = BackupError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("catalog I/O failure at {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog at {path} is corrupt: {reason}")]
    CorruptData { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }
}

/// One rejected input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub problem: FieldProblem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldProblem {
    Missing,
    Invalid(String),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            FieldProblem::Missing => write!(f, "{} is required", self.field),
            FieldProblem::Invalid(why) => write!(f, "{} is invalid: {}", self.field, why),
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_after(after: &Duration) -> String {
    humantime::format_duration(*after).to_string()
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid target: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("target {0} not found")]
    NotFound(u64),

    #[error("a backup for target {0} is already running")]
    AlreadyRunning(u64),

    #[error("no command template registered for engine '{0}'")]
    UnsupportedEngine(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The dump tool exited non-zero or could not be launched
    #[error("backup run {run_id} failed: {detail}")]
    ExecutionFailure {
        run_id: u64,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("backup run {run_id} timed out after {}", format_after(.after))]
    Timeout { run_id: u64, after: Duration },
}

/// Machine-readable error kind carried by every boundary response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    AlreadyRunning,
    UnsupportedEngine,
    StoreError,
    ExecutionFailure,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::UnsupportedEngine => "unsupported_engine",
            ErrorKind::StoreError => "store_error",
            ErrorKind::ExecutionFailure => "execution_failure",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Validation(_) => ErrorKind::ValidationError,
            BackupError::NotFound(_) => ErrorKind::NotFound,
            BackupError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            BackupError::UnsupportedEngine(_) => ErrorKind::UnsupportedEngine,
            BackupError::Store(_) => ErrorKind::StoreError,
            BackupError::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
            BackupError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}
