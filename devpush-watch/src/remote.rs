//! Waking the loop on server-side fixes.
//!
//! A [`RemoteSignalWatcher`] subscribes to a remote query and resolves on the
//! first result that differs from the one it started with. It is armed by the
//! last push failure: the table watcher only runs after a schema rejection on a
//! named table, the env-var watcher only after a missing environment variable.
//! Disarmed, `wait` never resolves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use devpush_core::{Credentials, ErrorOutcome};

use crate::error::WatchError;
use crate::race::ChangeSource;
use crate::settings::{ENV_VARS_FUNCTION, TABLE_SIZE_FUNCTION};

/// A live query subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Next result of the query. The first call returns the current value.
    async fn next_value(&mut self) -> Result<Value, WatchError>;

    fn close(&mut self);
}

#[async_trait]
pub trait RemoteSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        function: &str,
        args: Value,
    ) -> Result<Box<dyn Subscription>, WatchError>;
}

/// A [`ChangeSource`] armed by the outcome of the last push.
pub trait SignalWatch: ChangeSource {
    /// Enable or disable for the next race. `None` means the last push succeeded.
    fn arm(&mut self, last: Option<&ErrorOutcome>);
}

type ArgsFor = fn(&ErrorOutcome) -> Option<Value>;

pub struct RemoteSignalWatcher {
    name: &'static str,
    function: &'static str,
    args_for: ArgsFor,
    subscriber: Arc<dyn RemoteSubscriber>,
    args: Option<Value>,
    subscription: Option<Box<dyn Subscription>>,
}

impl RemoteSignalWatcher {
    /// Watches the size of the table named by an `InvalidLocalStateOrRemoteData` failure.
    pub fn table(subscriber: Arc<dyn RemoteSubscriber>) -> Self {
        Self::new("table", TABLE_SIZE_FUNCTION, table_args, subscriber)
    }

    /// Watches the deployment's environment variables after an
    /// `InvalidLocalStateOrEnvVars` failure.
    pub fn env_vars(subscriber: Arc<dyn RemoteSubscriber>) -> Self {
        Self::new("env-vars", ENV_VARS_FUNCTION, env_args, subscriber)
    }

    fn new(
        name: &'static str,
        function: &'static str,
        args_for: ArgsFor,
        subscriber: Arc<dyn RemoteSubscriber>,
    ) -> Self {
        Self {
            name,
            function,
            args_for,
            subscriber,
            args: None,
            subscription: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.args.is_some()
    }

    async fn watch(&mut self, args: Value) -> Result<(), WatchError> {
        self.subscription = Some(self.subscriber.subscribe(self.function, args).await?);
        let initial = self.next().await?;
        loop {
            if self.next().await? != initial {
                tracing::debug!(watcher = self.name, "remote value changed");
                return Ok(());
            }
        }
    }

    async fn next(&mut self) -> Result<Value, WatchError> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.next_value().await,
            None => Err(WatchError::ChannelClosed("subscription")),
        }
    }
}

fn table_args(outcome: &ErrorOutcome) -> Option<Value> {
    outcome
        .watched_table()
        .map(|table| json!({ "tableName": table.0 }))
}

fn env_args(outcome: &ErrorOutcome) -> Option<Value> {
    outcome.watches_env_vars().then(|| json!({}))
}

#[async_trait]
impl ChangeSource for RemoteSignalWatcher {
    async fn wait(&mut self) {
        let Some(args) = self.args.clone() else {
            return std::future::pending().await;
        };
        let result = self.watch(args).await;
        self.cancel();
        if let Err(err) = result {
            tracing::warn!(watcher = self.name, error = %err, "remote watch failed, relying on local changes");
            std::future::pending::<()>().await;
        }
    }

    fn cancel(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            tracing::debug!(watcher = self.name, "closing subscription");
            subscription.close();
        }
    }
}

impl SignalWatch for RemoteSignalWatcher {
    fn arm(&mut self, last: Option<&ErrorOutcome>) {
        self.args = last.and_then(self.args_for);
    }
}

// ---------------------------------------------------------------------------
// Polling subscriber
// ---------------------------------------------------------------------------

pub const QUERY_PATH: &str = "/api/query";

/// Emulates a subscription by polling `POST {url}/api/query` and emitting
/// each distinct result.
pub struct PollingSubscriber {
    agent: ureq::Agent,
    credentials: Credentials,
    interval: Duration,
}

impl PollingSubscriber {
    pub fn new(credentials: Credentials, interval: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            agent,
            credentials,
            interval,
        }
    }
}

#[async_trait]
impl RemoteSubscriber for PollingSubscriber {
    async fn subscribe(
        &self,
        function: &str,
        args: Value,
    ) -> Result<Box<dyn Subscription>, WatchError> {
        Ok(Box::new(PollingSubscription {
            agent: self.agent.clone(),
            url: format!("{}{QUERY_PATH}", self.credentials.url),
            auth: format!("Bearer {}", self.credentials.deploy_key.expose()),
            body: json!({ "path": function, "args": args }),
            interval: self.interval,
            last: None,
            closed: false,
        }))
    }
}

struct PollingSubscription {
    agent: ureq::Agent,
    url: String,
    auth: String,
    body: Value,
    interval: Duration,
    last: Option<Value>,
    closed: bool,
}

impl PollingSubscription {
    async fn poll(&self) -> Result<Value, WatchError> {
        let agent = self.agent.clone();
        let url = self.url.clone();
        let auth = self.auth.clone();
        let body = self.body.clone();
        tokio::task::spawn_blocking(move || {
            let response = agent
                .post(&url)
                .set("Authorization", &auth)
                .send_json(body)
                .map_err(|e| WatchError::Subscription(e.to_string()))?;
            let mut value: Value = response
                .into_json()
                .map_err(|e| WatchError::Subscription(e.to_string()))?;
            let inner = value.as_object_mut().and_then(|o| o.remove("value"));
            Ok(inner.unwrap_or(value))
        })
        .await
        .map_err(|e| WatchError::Join {
            task: "subscription poll",
            reason: e.to_string(),
        })?
    }
}

#[async_trait]
impl Subscription for PollingSubscription {
    async fn next_value(&mut self) -> Result<Value, WatchError> {
        loop {
            if self.closed {
                return Err(WatchError::ChannelClosed("subscription"));
            }
            if self.last.is_some() {
                tokio::time::sleep(self.interval).await;
            }
            let value = self.poll().await?;
            if self.last.as_ref() != Some(&value) {
                self.last = Some(value.clone());
                return Ok(value);
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
