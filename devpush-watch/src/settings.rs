use std::time::Duration;

use devpush_core::ProjectConfig;

use crate::backoff::BackoffPolicy;

pub const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(500);
pub const DEFAULT_SUBSCRIPTION_POLL: Duration = Duration::from_millis(1000);

/// Remote function reporting a table's document count.
pub const TABLE_SIZE_FUNCTION: &str = "_system/cli/tableSize";
/// Remote function listing the deployment's environment variables.
pub const ENV_VARS_FUNCTION: &str = "_system/cli/queryEnvironmentVariables";

/// Timing knobs for one control-loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub quiescence: Duration,
    pub backoff: BackoffPolicy,
    pub subscription_poll: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            quiescence: DEFAULT_QUIESCENCE,
            backoff: BackoffPolicy::default(),
            subscription_poll: DEFAULT_SUBSCRIPTION_POLL,
        }
    }
}

impl From<&ProjectConfig> for LoopSettings {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            quiescence: config.watch.quiescence(),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(config.backoff.initial_ms),
                max: Duration::from_millis(config.backoff.max_ms),
            },
            subscription_poll: config.subscription.poll_interval(),
        }
    }
}
