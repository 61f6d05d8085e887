//! `devpush deploy`: one push, non-zero exit on any failure.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use devpush_core::RunMode;
use devpush_watch::{init_tracing, start_blocking, LoopExit};

use super::console::ConsoleReporter;
use super::ProjectArgs;

/// Arguments for `devpush deploy`.
#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Build and diff, but never write to the deployment.
    #[arg(long)]
    pub dry_run: bool,
}

impl DeployArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(self.project.verbose);
        let prepared = self.project.prepare(self.dry_run)?;
        let reporter = Arc::new(ConsoleReporter::new(self.project.verbose));

        let exit = start_blocking(
            prepared.options,
            prepared.settings,
            RunMode::Once,
            prepared.pipeline,
            reporter,
        )
        .context("deploy failed")?;

        match exit {
            LoopExit::Completed(Ok(_)) => Ok(()),
            LoopExit::Completed(Err(failure)) | LoopExit::Fatal(failure) => bail!(
                "deploy failed ({}): {}",
                failure.outcome.label(),
                failure.message
            ),
            LoopExit::Interrupted => bail!("deploy interrupted"),
        }
    }
}
