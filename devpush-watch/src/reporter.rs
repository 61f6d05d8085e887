//! User-facing progress output, injected into the control loop.
//!
//! A [`Phase`] is a scoped guard: it reports `started` when created and must
//! end in exactly one terminal status. Dropping it unfinished reports
//! [`PhaseStatus::Interrupted`], so every early return and cancelled future
//! still leaves the output in a terminal state.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseStatus {
    Succeeded(String),
    Failed(String),
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

pub trait Reporter: Send + Sync {
    fn phase_started(&self, label: &str);
    fn phase_updated(&self, label: &str, detail: &str);
    fn phase_finished(&self, label: &str, status: &PhaseStatus);
    fn message(&self, level: Level, text: &str);
}

pub struct Phase {
    reporter: Arc<dyn Reporter>,
    label: String,
    finished: bool,
}

impl Phase {
    pub fn start(reporter: &Arc<dyn Reporter>, label: impl Into<String>) -> Self {
        let label = label.into();
        reporter.phase_started(&label);
        Self {
            reporter: Arc::clone(reporter),
            label,
            finished: false,
        }
    }

    pub fn update(&self, detail: &str) {
        self.reporter.phase_updated(&self.label, detail);
    }

    pub fn succeed(self, detail: impl Into<String>) {
        self.finish(PhaseStatus::Succeeded(detail.into()));
    }

    pub fn fail(self, detail: impl Into<String>) {
        self.finish(PhaseStatus::Failed(detail.into()));
    }

    fn finish(mut self, status: PhaseStatus) {
        self.finished = true;
        self.reporter.phase_finished(&self.label, &status);
    }
}

impl Drop for Phase {
    fn drop(&mut self) {
        if !self.finished {
            self.reporter
                .phase_finished(&self.label, &PhaseStatus::Interrupted);
        }
    }
}

/// Writes everything through `tracing`; the default when no console is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn phase_started(&self, label: &str) {
        tracing::info!(phase = label, "started");
    }

    fn phase_updated(&self, label: &str, detail: &str) {
        tracing::info!(phase = label, "{detail}");
    }

    fn phase_finished(&self, label: &str, status: &PhaseStatus) {
        match status {
            PhaseStatus::Succeeded(detail) => tracing::info!(phase = label, "{detail}"),
            PhaseStatus::Failed(detail) => tracing::error!(phase = label, "{detail}"),
            PhaseStatus::Interrupted => tracing::warn!(phase = label, "interrupted"),
        }
    }

    fn message(&self, level: Level, text: &str) {
        match level {
            Level::Info => tracing::info!("{text}"),
            Level::Warn => tracing::warn!("{text}"),
            Level::Error => tracing::error!("{text}"),
        }
    }
}
