//! devpush: push backend functions to a deployment and keep them in sync.
//!
//! # Usage
//!
//! ```text
//! devpush dev [--once | --until-success] [--dry-run] [--verbose]
//!             [--typecheck enable|try|disable] [--url URL] [--functions DIR]
//! devpush deploy [--dry-run] [...]
//! devpush diff [--json] [...]
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{deploy::DeployArgs, dev::DevArgs, diff::DiffArgs};
use devpush_core::TypecheckMode;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "devpush",
    version,
    about = "Watch, build, diff and push backend functions to a deployment",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push, then keep pushing whenever the functions change.
    Dev(DevArgs),

    /// Push once; exit non-zero if the push fails.
    Deploy(DeployArgs),

    /// Show what a push would change without pushing.
    Diff(DiffArgs),
}

// ---------------------------------------------------------------------------
// Shared TypecheckMode argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `TypecheckMode` from CLI args.
#[derive(Debug, Clone, Copy)]
pub struct TypecheckModeArg(pub TypecheckMode);

impl FromStr for TypecheckModeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enable" => Ok(Self(TypecheckMode::Enable)),
            "try" => Ok(Self(TypecheckMode::Try)),
            "disable" => Ok(Self(TypecheckMode::Disable)),
            other => Err(format!(
                "unknown typecheck mode '{other}'; expected: enable, try, disable"
            )),
        }
    }
}

impl fmt::Display for TypecheckModeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<TypecheckModeArg> for TypecheckMode {
    fn from(t: TypecheckModeArg) -> Self {
        t.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Dev(args) => args.run(),
        Commands::Deploy(args) => args.run(),
        Commands::Diff(args) => args.run(),
    }
}
