//! Project configuration and deployment credentials.
//!
//! # Storage layout
//!
//! ```text
//! <project>/devpush.yaml          (optional: defaults apply when absent)
//! ~/.devpush/credentials.yaml     (url + deploy_key, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every loader has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Environment lookups are injected as a closure so tests never touch the
//! process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{DeployKey, TypecheckMode};

pub const CONFIG_FILE: &str = "devpush.yaml";
pub const CREDENTIALS_FILE: &str = "credentials.yaml";
pub const ENV_DEPLOY_KEY: &str = "DEVPUSH_DEPLOY_KEY";
pub const ENV_URL: &str = "DEVPUSH_URL";

// ---------------------------------------------------------------------------
// 1. Project config
// ---------------------------------------------------------------------------

/// Contents of `devpush.yaml`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Function source directory, relative to the project root.
    pub functions: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub codegen: bool,
    pub typecheck: TypecheckConfig,
    pub watch: WatchConfig,
    pub backoff: BackoffConfig,
    pub schema: SchemaConfig,
    pub subscription: SubscriptionConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            functions: PathBuf::from("functions"),
            url: None,
            codegen: true,
            typecheck: TypecheckConfig::default(),
            watch: WatchConfig::default(),
            backoff: BackoffConfig::default(),
            schema: SchemaConfig::default(),
            subscription: SubscriptionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypecheckConfig {
    pub mode: TypecheckMode,
    /// Program and arguments, run with the function directory as cwd.
    pub command: Vec<String>,
}

impl Default for TypecheckConfig {
    fn default() -> Self {
        Self {
            mode: TypecheckMode::default(),
            command: ["npx", "tsc", "--noEmit", "--pretty", "false"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub quiescence_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { quiescence_ms: 500 }
    }
}

impl WatchConfig {
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 16_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl SchemaConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub poll_interval_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl SubscriptionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ProjectConfig {
    /// Absolute function source directory for a project rooted at `project_root`.
    pub fn source_root(&self, project_root: &Path) -> PathBuf {
        if self.functions.is_absolute() {
            self.functions.clone()
        } else {
            project_root.join(&self.functions)
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff.initial_ms == 0 {
            return Err(ConfigError::Invalid(
                "backoff.initial_ms must be greater than zero".to_string(),
            ));
        }
        if self.backoff.max_ms < self.backoff.initial_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff.max_ms ({}) is below backoff.initial_ms ({})",
                self.backoff.max_ms, self.backoff.initial_ms
            )));
        }
        if self.typecheck.mode != TypecheckMode::Disable && self.typecheck.command.is_empty() {
            return Err(ConfigError::Invalid(
                "typecheck.command is empty; set typecheck.mode to disable instead".to_string(),
            ));
        }
        if self.schema.poll_interval_ms == 0 || self.subscription.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// `<project_root>/devpush.yaml`: pure, no I/O.
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_FILE)
}

/// Load `devpush.yaml` from `project_root`.
///
/// Returns defaults if the file is absent and `ConfigError::Parse` (with path
/// and line context) if it is malformed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig, ConfigError> {
    let path = project_config_path(project_root);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: ProjectConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// 2. Credentials
// ---------------------------------------------------------------------------

/// Where and how to push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub url: String,
    pub deploy_key: DeployKey,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    url: Option<String>,
    deploy_key: Option<String>,
}

/// `<home>/.devpush/credentials.yaml`: pure, no I/O.
pub fn credentials_path_at(home: &Path) -> PathBuf {
    home.join(".devpush").join(CREDENTIALS_FILE)
}

/// Resolve credentials.
///
/// URL precedence: `url_override` → `$DEVPUSH_URL` → `devpush.yaml` → credentials file.
/// Deploy key precedence: `$DEVPUSH_DEPLOY_KEY` → credentials file.
pub fn resolve_credentials_at(
    home: &Path,
    project: &ProjectConfig,
    url_override: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, ConfigError> {
    let path = credentials_path_at(home);
    let file = if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_yaml::from_str::<CredentialsFile>(&contents).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        })?
    } else {
        CredentialsFile::default()
    };

    let url = url_override
        .map(str::to_string)
        .or_else(|| non_empty(env(ENV_URL)))
        .or_else(|| project.url.clone())
        .or(file.url)
        .ok_or_else(|| ConfigError::Missing {
            what: "deployment url",
            env: ENV_URL,
            path: path.clone(),
        })?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Invalid(format!(
            "deployment url '{url}' must start with http:// or https://"
        )));
    }

    let deploy_key = non_empty(env(ENV_DEPLOY_KEY))
        .or(file.deploy_key)
        .ok_or_else(|| ConfigError::Missing {
            what: "deploy key",
            env: ENV_DEPLOY_KEY,
            path: path.clone(),
        })?;

    Ok(Credentials {
        url: url.trim_end_matches('/').to_string(),
        deploy_key: DeployKey(deploy_key),
    })
}

/// `resolve_credentials_at` convenience wrapper over the real home and environment.
pub fn resolve_credentials(
    project: &ProjectConfig,
    url_override: Option<&str>,
) -> Result<Credentials, ConfigError> {
    resolve_credentials_at(&home()?, project, url_override, |name| {
        std::env::var(name).ok()
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
