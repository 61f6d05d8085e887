//! Waiting for the remote schema to settle.

use std::time::Duration;

use tokio::time::Instant;

use devpush_core::config::SchemaConfig;
use devpush_core::{Credentials, ErrorOutcome, PushFailure, SchemaState};

use crate::api::DeploymentApi;

/// Bounds for [`wait_for_schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaWait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for SchemaWait {
    fn default() -> Self {
        Self::from(&SchemaConfig::default())
    }
}

impl From<&SchemaConfig> for SchemaWait {
    fn from(config: &SchemaConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }
}

/// Poll until the deployment's schema is active.
///
/// Returns `true` if a pending schema change was observed along the way.
///
/// # Errors
///
/// - `Transient` if still pending after `wait.timeout`, or the API failed
///   transiently.
/// - `InvalidLocalStateOrRemoteData` if validation failed on a named table.
pub async fn wait_for_schema(
    api: &dyn DeploymentApi,
    credentials: &Credentials,
    wait: &SchemaWait,
) -> Result<bool, PushFailure> {
    let deadline = Instant::now() + wait.timeout;
    let mut was_pending = false;

    loop {
        match api.schema_state(credentials).await? {
            SchemaState::Active => return Ok(was_pending),
            SchemaState::Failed {
                table: Some(table),
                message,
            } => {
                return Err(PushFailure::new(
                    ErrorOutcome::InvalidLocalStateOrRemoteData { table },
                    format!("schema validation failed: {message}"),
                ))
            }
            SchemaState::Failed {
                table: None,
                message,
            } => {
                return Err(PushFailure::invalid_local_state(format!(
                    "schema validation failed: {message}"
                )))
            }
            SchemaState::Pending => {
                if !was_pending {
                    tracing::info!("waiting for pending schema change to finish validating");
                }
                was_pending = true;
                if Instant::now() >= deadline {
                    return Err(PushFailure::transient(format!(
                        "schema still pending after {}s",
                        wait.timeout.as_secs()
                    )));
                }
                tokio::time::sleep(wait.poll_interval).await;
            }
        }
    }
}
