//! Error types for devpush-deploy.

use std::path::PathBuf;

use thiserror::Error;

use devpush_core::{ErrorOutcome, PushFailure, TableName};

/// Failures from the collaborators a push talks to: the deployment HTTP API,
/// the code generator's writes, and blocking tasks.
#[derive(Debug, Error)]
pub enum DeployError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The deployment answered with a non-2xx status.
    #[error("deployment returned HTTP {status} ({}): {message}", .code.as_deref().unwrap_or("no code"))]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
        table: Option<TableName>,
    },

    /// The request never got an HTTP answer (DNS, refused, TLS, timeout).
    #[error("could not reach deployment: {0}")]
    Transport(String),

    /// A 2xx response whose body did not match the expected shape.
    #[error("malformed response from deployment: {0}")]
    Decode(String),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(String),
}

impl DeployError {
    /// Decide how the control loop should react to this error.
    pub fn outcome(&self) -> ErrorOutcome {
        match self {
            DeployError::Http {
                status,
                code,
                table,
                ..
            } => classify_http(*status, code.as_deref(), table.as_ref()),
            DeployError::Transport(_) | DeployError::Decode(_) => ErrorOutcome::Transient,
            DeployError::Io { .. } => ErrorOutcome::InvalidLocalState,
            DeployError::Json(_) | DeployError::Join(_) => ErrorOutcome::Fatal,
        }
    }
}

/// Map an HTTP error response onto the retry taxonomy.
///
/// Error codes take precedence over the status class.
pub fn classify_http(status: u16, code: Option<&str>, table: Option<&TableName>) -> ErrorOutcome {
    match (status, code) {
        (401 | 403, _) => ErrorOutcome::Fatal,
        (_, Some("IncompatibleServerVersion")) => ErrorOutcome::Fatal,
        (_, Some("MissingEnvironmentVariable")) => ErrorOutcome::InvalidLocalStateOrEnvVars,
        (_, Some("SchemaValidationFailed")) => match table {
            Some(table) => ErrorOutcome::InvalidLocalStateOrRemoteData {
                table: table.clone(),
            },
            None => ErrorOutcome::InvalidLocalState,
        },
        (408 | 429, _) | (500..=599, _) => ErrorOutcome::Transient,
        (400..=499, _) => ErrorOutcome::InvalidLocalState,
        _ => ErrorOutcome::Transient,
    }
}

impl From<DeployError> for PushFailure {
    fn from(err: DeployError) -> Self {
        PushFailure::new(err.outcome(), err.to_string())
    }
}

/// Convenience constructor for [`DeployError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeployError {
    DeployError::Io {
        path: path.into(),
        source,
    }
}
