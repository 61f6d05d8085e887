//! The watch → build → diff → push loop.
//!
//! ```text
//! Pushing ──ok──────────────────────────────▶ Racing
//!    │ Fatal ─────────────────────────────▶ Terminated
//!    │ Transient ──▶ BackoffWait ──────────▶ Pushing
//!    │ InvalidLocalState* ─────────────────▶ Racing
//!    │ tree changed during build ──────────▶ Pushing
//! Racing ──first of {files, table, env}───▶ Pushing
//! ```
//!
//! Every suspension point also listens for shutdown. The watch handle is the
//! only state that outlives an iteration.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;

use devpush_core::{
    ErrorOutcome, Finalized, ObservationJournal, PushFailure, PushOptions, RecordingFs, RunMode,
};
use devpush_deploy::{PushAction, PushReport, Pusher};

use crate::error::WatchError;
use crate::fs_watch::EventSource;
use crate::observer::{begin_watch, ChangeObserver};
use crate::race::{race, ChangeSource};
use crate::remote::SignalWatch;
use crate::reporter::{Level, Phase, Reporter};
use crate::settings::LoopSettings;

/// How one control-loop invocation ended.
#[derive(Debug)]
pub enum LoopExit {
    /// `Once` or `UntilSuccess` mode finished.
    Completed(Result<PushReport, PushFailure>),
    Fatal(PushFailure),
    /// Shutdown was requested.
    Interrupted,
}

/// What a failed push leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Terminate,
    Backoff,
    Race,
}

pub fn transition(outcome: &ErrorOutcome) -> Transition {
    match outcome {
        ErrorOutcome::Fatal => Transition::Terminate,
        ErrorOutcome::Transient => Transition::Backoff,
        ErrorOutcome::InvalidLocalState
        | ErrorOutcome::InvalidLocalStateOrEnvVars
        | ErrorOutcome::InvalidLocalStateOrRemoteData { .. } => Transition::Race,
    }
}

/// Builds the event source from the first journal.
pub type WatchFactory = Box<
    dyn FnMut(&ObservationJournal) -> Result<Box<dyn EventSource>, WatchError> + Send,
>;

/// Collaborators of a [`ControlLoop`].
pub struct LoopDeps {
    pub pusher: Box<dyn Pusher>,
    pub watch_factory: WatchFactory,
    pub table_watch: Box<dyn SignalWatch>,
    pub env_watch: Box<dyn SignalWatch>,
    pub reporter: Arc<dyn Reporter>,
}

pub struct ControlLoop {
    options: PushOptions,
    settings: LoopSettings,
    deps: LoopDeps,
    shutdown: broadcast::Receiver<()>,
    rng: StdRng,
}

impl ControlLoop {
    pub fn new(
        options: PushOptions,
        settings: LoopSettings,
        deps: LoopDeps,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            options,
            settings,
            deps,
            shutdown,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic backoff jitter.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run until a terminal state. Watchers and subscriptions are released
    /// on every exit path.
    pub async fn run(mut self, mode: RunMode) -> Result<LoopExit, WatchError> {
        let mut handle: Option<Box<dyn EventSource>> = None;
        let result = self.drive(mode, &mut handle).await;

        self.deps.table_watch.cancel();
        self.deps.env_watch.cancel();
        if let Some(handle) = handle.as_mut() {
            handle.stop();
        }
        result
    }

    async fn drive(
        &mut self,
        mode: RunMode,
        handle: &mut Option<Box<dyn EventSource>>,
    ) -> Result<LoopExit, WatchError> {
        let mut failures: u32 = 0;

        loop {
            let recording = Arc::new(RecordingFs::new());
            let Some(result) = self.push_once(Arc::clone(&recording)).await else {
                return Ok(LoopExit::Interrupted);
            };
            let consistent = match recording.finalize() {
                Finalized::Journal(journal) => Ok(journal),
                Finalized::Invalidated { path } => Err(path),
            };

            let last_failure = match result {
                Ok(report) => {
                    failures = 0;
                    if consistent.is_ok() && mode != RunMode::WatchForever {
                        return Ok(LoopExit::Completed(Ok(report)));
                    }
                    None
                }
                Err(failure) => match transition(&failure.outcome) {
                    Transition::Terminate => return Ok(LoopExit::Fatal(failure)),
                    _ if consistent.is_ok() && mode == RunMode::Once => {
                        return Ok(LoopExit::Completed(Err(failure)));
                    }
                    Transition::Backoff if consistent.is_ok() => {
                        let delay = self.settings.backoff.next_delay_with(failures, &mut self.rng);
                        failures = failures.saturating_add(1);
                        self.deps.reporter.message(
                            Level::Warn,
                            &format!(
                                "{}; retrying in {:.1}s",
                                failure.message,
                                delay.as_secs_f64()
                            ),
                        );
                        let slept = tokio::select! {
                            _ = tokio::time::sleep(delay) => true,
                            _ = shutdown_requested(&mut self.shutdown) => false,
                        };
                        if !slept {
                            return Ok(LoopExit::Interrupted);
                        }
                        continue;
                    }
                    _ => Some(failure),
                },
            };

            let journal = match consistent {
                Ok(journal) => journal,
                Err(path) => {
                    self.deps.reporter.message(
                        Level::Warn,
                        &format!("{} changed during push, retrying", path.display()),
                    );
                    continue;
                }
            };

            // Racing
            let outcome = last_failure.as_ref().map(|failure| &failure.outcome);
            self.deps.table_watch.arm(outcome);
            self.deps.env_watch.arm(outcome);

            let source = begin_watch(handle, &journal, &mut self.deps.watch_factory)?;
            let mut observer =
                ChangeObserver::new(&mut **source, &journal, self.settings.quiescence);

            let waiting = Phase::start(&self.deps.reporter, "watch");
            waiting.update(&waiting_detail(outcome));
            let LoopDeps {
                table_watch,
                env_watch,
                ..
            } = &mut self.deps;
            let winner = tokio::select! {
                winner = race(&mut observer, &mut **table_watch, &mut **env_watch) => Some(winner),
                _ = shutdown_requested(&mut self.shutdown) => None,
            };
            let Some(winner) = winner else {
                return Ok(LoopExit::Interrupted);
            };
            waiting.succeed(winner.label());
        }
    }

    async fn push_once(
        &mut self,
        recording: Arc<RecordingFs>,
    ) -> Option<Result<PushReport, PushFailure>> {
        let phase = Phase::start(&self.deps.reporter, "push");
        let result = tokio::select! {
            result = self.deps.pusher.push(&self.options, recording) => result,
            _ = shutdown_requested(&mut self.shutdown) => return None,
        };
        match &result {
            Ok(report) => phase.succeed(describe(report)),
            Err(failure) => phase.fail(format!("{}: {}", failure.outcome.label(), failure.message)),
        }
        Some(result)
    }
}

fn describe(report: &PushReport) -> String {
    match report.action {
        PushAction::Pushed => format!(
            "pushed {} in {}ms",
            report.diff.summary(),
            report.duration_ms
        ),
        PushAction::Skipped => "deployment already up to date".to_string(),
        PushAction::DryRun => format!("[dry-run] would push {}", report.diff.summary()),
    }
}

fn waiting_detail(outcome: Option<&ErrorOutcome>) -> String {
    match outcome {
        None => "watching for changes".to_string(),
        Some(ErrorOutcome::InvalidLocalStateOrRemoteData { table }) => {
            format!("waiting for a local fix or a change to table `{table}`")
        }
        Some(ErrorOutcome::InvalidLocalStateOrEnvVars) => {
            "waiting for a local fix or an environment variable change".to_string()
        }
        Some(_) => "waiting for a local fix".to_string(),
    }
}

/// Resolves on a shutdown signal. A closed channel can never signal, so it pends.
async fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) {
    loop {
        match shutdown.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
