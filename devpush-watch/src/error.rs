use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the watcher, remote subscriptions and the control loop.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("nothing to watch: the last build observed no paths")]
    EmptyWatchSet,

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("{task} task join failure: {reason}")]
    Join { task: &'static str, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WatchError {
    WatchError::Io {
        path: path.into(),
        source,
    }
}
