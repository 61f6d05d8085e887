//! Domain types shared by the push pipeline and the watch loop.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Credentials;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a table in the remote deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(pub String);

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TableName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TableName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Deployment credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployKey(pub String);

impl DeployKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeployKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeployKey(***)")
    }
}

impl From<&str> for DeployKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How the type checker participates in a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TypecheckMode {
    /// Type errors block the push.
    Enable,
    /// Type errors are reported but the push proceeds.
    #[default]
    Try,
    /// The type checker is not run.
    Disable,
}

impl fmt::Display for TypecheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypecheckMode::Enable => write!(f, "enable"),
            TypecheckMode::Try => write!(f, "try"),
            TypecheckMode::Disable => write!(f, "disable"),
        }
    }
}

/// How long the control loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Push, then watch for changes until interrupted or a fatal error.
    #[default]
    WatchForever,
    /// Return after the first push attempt, whatever its outcome.
    Once,
    /// Keep retrying and watching until one push succeeds, then return.
    UntilSuccess,
}

/// Classification of a failed push attempt.
///
/// Each variant decides the control loop's next state: exit, back off and
/// retry, or wait for a change (local, and possibly remote) before retrying.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorOutcome {
    /// Requires human action (bad credentials, incompatible server).
    Fatal,
    /// Network or infrastructure blip.
    Transient,
    /// The local source does not build or type-check.
    InvalidLocalState,
    /// Local source is invalid, or a deployment environment variable is missing.
    InvalidLocalStateOrEnvVars,
    /// Local source is invalid, or existing rows in `table` reject the change.
    InvalidLocalStateOrRemoteData { table: TableName },
}

impl ErrorOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorOutcome::Fatal => "fatal",
            ErrorOutcome::Transient => "transient",
            ErrorOutcome::InvalidLocalState => "invalid local state",
            ErrorOutcome::InvalidLocalStateOrEnvVars => "invalid local state or env vars",
            ErrorOutcome::InvalidLocalStateOrRemoteData { .. } => {
                "invalid local state or remote data"
            }
        }
    }

    /// The remote table whose contents may unblock the next push.
    pub fn watched_table(&self) -> Option<&TableName> {
        match self {
            ErrorOutcome::InvalidLocalStateOrRemoteData { table } => Some(table),
            _ => None,
        }
    }

    pub fn watches_env_vars(&self) -> bool {
        matches!(self, ErrorOutcome::InvalidLocalStateOrEnvVars)
    }
}

impl fmt::Display for ErrorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorOutcome::InvalidLocalStateOrRemoteData { table } => {
                write!(f, "{} (table `{table}`)", self.label())
            }
            other => f.write_str(other.label()),
        }
    }
}

/// Error value returned by every stage of a push attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PushFailure {
    pub outcome: ErrorOutcome,
    pub message: String,
}

impl PushFailure {
    pub fn new(outcome: ErrorOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorOutcome::Fatal, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorOutcome::Transient, message)
    }

    pub fn invalid_local_state(message: impl Into<String>) -> Self {
        Self::new(ErrorOutcome::InvalidLocalState, message)
    }
}

/// Remote schema readiness as reported by the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchemaState {
    /// A schema change is still validating against existing data.
    Pending,
    /// The deployed schema is in force.
    Active,
    /// Validation failed; `table` names the offending table when known.
    Failed {
        #[serde(default)]
        table: Option<TableName>,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Everything one loop invocation needs to push. Immutable for its duration.
#[derive(Debug, Clone)]
pub struct PushOptions {
    pub credentials: Credentials,
    /// Directory holding the backend function modules.
    pub source_root: PathBuf,
    pub dry_run: bool,
    pub verbose: bool,
    pub typecheck: TypecheckMode,
    pub codegen: bool,
}

/// One module of the locally built artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSource {
    pub source: String,
    pub sha256: String,
}

/// Locally built deployment artifact. Keys are `/`-separated paths relative
/// to the source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Artifact {
    pub modules: BTreeMap<String, ModuleSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    pub client_version: String,
}

/// What the deployment reports as currently live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RemoteArtifact {
    /// Module path → sha256 of its source.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: Option<serde_json::Value>,
    #[serde(default)]
    pub schema_hash: Option<String>,
    pub server_version: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
