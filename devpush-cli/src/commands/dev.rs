//! `devpush dev`: push, then keep pushing on every relevant change.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use devpush_core::RunMode;
use devpush_watch::{init_tracing, start_blocking, LoopExit};

use super::console::ConsoleReporter;
use super::ProjectArgs;

/// Arguments for `devpush dev`.
#[derive(Args, Debug)]
pub struct DevArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Push once and exit, whatever the outcome.
    #[arg(long, conflicts_with = "until_success")]
    pub once: bool,

    /// Keep retrying until one push succeeds, then exit.
    #[arg(long)]
    pub until_success: bool,

    /// Build and diff, but never write to the deployment.
    #[arg(long)]
    pub dry_run: bool,
}

impl DevArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(self.project.verbose);
        let prepared = self.project.prepare(self.dry_run)?;

        let mode = if self.once {
            RunMode::Once
        } else if self.until_success {
            RunMode::UntilSuccess
        } else {
            RunMode::WatchForever
        };
        println!(
            "{} {} → {}",
            "devpush".bold(),
            prepared.options.source_root.display(),
            prepared.options.credentials.url
        );

        let reporter = Arc::new(ConsoleReporter::new(self.project.verbose));
        let exit = start_blocking(
            prepared.options,
            prepared.settings,
            mode,
            prepared.pipeline,
            reporter,
        )
        .context("control loop failed")?;

        match exit {
            LoopExit::Completed(_) | LoopExit::Interrupted => Ok(()),
            LoopExit::Fatal(failure) => bail!("{}", failure.message),
        }
    }
}
