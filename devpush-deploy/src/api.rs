//! Deployment HTTP API.
//!
//! ureq is blocking, so every request runs on the blocking pool and the
//! async surface stays cancellable from the control loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use devpush_core::{Artifact, Credentials, RemoteArtifact, SchemaState, TableName};

use crate::bundle::CLIENT_VERSION;
use crate::error::DeployError;

pub const CONFIG_PATH: &str = "/api/deploy/config";
pub const PUSH_PATH: &str = "/api/deploy/push";
pub const SCHEMA_STATE_PATH: &str = "/api/deploy/schema_state";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// The remote side of a push.
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// Fetch what is currently live.
    async fn pull(&self, credentials: &Credentials) -> Result<RemoteArtifact, DeployError>;

    /// Replace the live deployment with `artifact`.
    async fn push(&self, credentials: &Credentials, artifact: &Artifact)
        -> Result<(), DeployError>;

    async fn schema_state(&self, credentials: &Credentials) -> Result<SchemaState, DeployError>;
}

#[derive(Debug, Clone)]
pub struct HttpDeploymentApi {
    agent: ureq::Agent,
}

impl Default for HttpDeploymentApi {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpDeploymentApi {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(&format!("devpush/{CLIENT_VERSION}"))
            .build();
        Self { agent }
    }

    async fn get_json<T>(&self, credentials: &Credentials, path: &str) -> Result<T, DeployError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        let url = format!("{}{path}", credentials.url);
        let auth = bearer(credentials);
        tokio::task::spawn_blocking(move || {
            tracing::debug!("GET {url}");
            decode(agent.get(&url).set("Authorization", &auth).call())
        })
        .await
        .map_err(|e| DeployError::Join(e.to_string()))?
    }
}

#[async_trait]
impl DeploymentApi for HttpDeploymentApi {
    async fn pull(&self, credentials: &Credentials) -> Result<RemoteArtifact, DeployError> {
        self.get_json(credentials, CONFIG_PATH).await
    }

    async fn push(
        &self,
        credentials: &Credentials,
        artifact: &Artifact,
    ) -> Result<(), DeployError> {
        let agent = self.agent.clone();
        let url = format!("{}{PUSH_PATH}", credentials.url);
        let auth = bearer(credentials);
        let body = serde_json::to_value(artifact)?;
        tokio::task::spawn_blocking(move || {
            tracing::debug!("POST {url}");
            match agent.post(&url).set("Authorization", &auth).send_json(body) {
                Ok(_) => Ok(()),
                Err(err) => Err(from_ureq(err)),
            }
        })
        .await
        .map_err(|e| DeployError::Join(e.to_string()))?
    }

    async fn schema_state(&self, credentials: &Credentials) -> Result<SchemaState, DeployError> {
        self.get_json(credentials, SCHEMA_STATE_PATH).await
    }
}

fn bearer(credentials: &Credentials) -> String {
    format!("Bearer {}", credentials.deploy_key.expose())
}

fn decode<T: DeserializeOwned>(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<T, DeployError> {
    match result {
        Ok(response) => response
            .into_json::<T>()
            .map_err(|e| DeployError::Decode(e.to_string())),
        Err(err) => Err(from_ureq(err)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    table: Option<TableName>,
}

pub(crate) fn from_ureq(err: ureq::Error) -> DeployError {
    match err {
        ureq::Error::Status(status, response) => {
            let status_text = response.status_text().to_string();
            let raw = response.into_string().unwrap_or_default();
            let body: ErrorBody = serde_json::from_str(&raw).unwrap_or_default();
            let message = body.message.unwrap_or_else(|| {
                if raw.trim().is_empty() {
                    status_text
                } else {
                    raw.trim().to_string()
                }
            });
            DeployError::Http {
                status,
                code: body.code,
                message,
                table: body.table,
            }
        }
        ureq::Error::Transport(transport) => DeployError::Transport(transport.to_string()),
    }
}
