use std::sync::Arc;

use tokio::sync::broadcast;

use devpush_core::{ObservationJournal, PushOptions, RunMode};
use devpush_deploy::DeployPipeline;

use crate::control::{ControlLoop, LoopDeps, LoopExit};
use crate::error::{io_err, WatchError};
use crate::fs_watch::{EventSource, WatchHandle};
use crate::remote::{PollingSubscriber, RemoteSignalWatcher, RemoteSubscriber};
use crate::reporter::Reporter;
use crate::settings::LoopSettings;

/// Start the loop on a fresh multi-threaded runtime and block until it exits.
pub fn start_blocking(
    options: PushOptions,
    settings: LoopSettings,
    mode: RunMode,
    pipeline: DeployPipeline,
    reporter: Arc<dyn Reporter>,
) -> Result<LoopExit, WatchError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run_loop(options, settings, mode, pipeline, reporter))
}

/// Run the loop with the production watcher and remote subscriptions.
/// Ctrl-c ends it with [`LoopExit::Interrupted`].
pub async fn run_loop(
    options: PushOptions,
    settings: LoopSettings,
    mode: RunMode,
    pipeline: DeployPipeline,
    reporter: Arc<dyn Reporter>,
) -> Result<LoopExit, WatchError> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(4);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("received ctrl-c, shutting down");
                    let _ = shutdown.send(());
                }
                Err(err) => tracing::error!(error = %err, "ctrl-c handler failed"),
            }
        })
    };

    let subscriber: Arc<dyn RemoteSubscriber> = Arc::new(PollingSubscriber::new(
        options.credentials.clone(),
        settings.subscription_poll,
    ));
    let deps = LoopDeps {
        pusher: Box::new(pipeline),
        watch_factory: Box::new(
            |journal: &ObservationJournal| -> Result<Box<dyn EventSource>, WatchError> {
                let handle = WatchHandle::new(journal)?;
                tracing::debug!(dirs = handle.watched_dirs(), "filesystem watcher started");
                Ok(Box::new(handle))
            },
        ),
        table_watch: Box::new(RemoteSignalWatcher::table(Arc::clone(&subscriber))),
        env_watch: Box::new(RemoteSignalWatcher::env_vars(subscriber)),
        reporter,
    };

    let exit = ControlLoop::new(options, settings, deps, shutdown_rx)
        .run(mode)
        .await;

    signal_handle.abort();
    drop(shutdown_tx);
    exit
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
