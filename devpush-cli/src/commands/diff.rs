//! `devpush diff`: build locally, pull the deployment, show the difference.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use devpush_deploy::DiffResult;
use devpush_watch::init_tracing;

use super::ProjectArgs;

/// Arguments for `devpush diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "change")]
    change: String,
    #[tabled(rename = "item")]
    item: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(self.project.verbose);
        let prepared = self.project.prepare(true)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let diff = runtime
            .block_on(prepared.pipeline.diff(&prepared.options))
            .map_err(|f| anyhow!("diff failed ({}): {}", f.outcome.label(), f.message))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&diff).context("failed to serialize diff")?
            );
            return Ok(());
        }

        print_table(&diff);
        Ok(())
    }
}

fn rows(diff: &DiffResult) -> Vec<DiffRow> {
    let mut rows = Vec::new();
    for (label, keys) in [
        ("added", &diff.added),
        ("removed", &diff.removed),
        ("changed", &diff.changed),
    ] {
        rows.extend(keys.iter().map(|key| DiffRow {
            change: label.to_string(),
            item: key.clone(),
        }));
    }
    if diff.auth_changed {
        rows.push(DiffRow {
            change: "changed".to_string(),
            item: "auth config".to_string(),
        });
    }
    if diff.schema_changed {
        rows.push(DiffRow {
            change: "changed".to_string(),
            item: "schema".to_string(),
        });
    }
    rows
}

fn print_table(diff: &DiffResult) {
    if diff.versions.differs() {
        println!(
            "{} client {} / deployment {}",
            "versions:".dimmed(),
            diff.versions.client,
            diff.versions.server
        );
    }
    if diff.schema_pending {
        println!("{}", "a schema change is still validating on the deployment".yellow());
    }

    if diff.is_empty() {
        println!("{} deployment is up to date", "✓".green());
        return;
    }

    let mut table = Table::new(rows(diff));
    table.with(Style::rounded());
    println!("{table}");

    if let Some(auth_diff) = &diff.auth_diff {
        print!("{auth_diff}");
        if !auth_diff.ends_with('\n') {
            println!();
        }
    }
    println!("{}", diff.summary());
}
