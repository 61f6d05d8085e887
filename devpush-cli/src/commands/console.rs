//! Colored terminal output for the control loop.

use colored::Colorize;

use devpush_watch::{Level, PhaseStatus, Reporter};

/// Prints phase results and messages. Phase starts and updates only show up
/// with `--verbose`, except the watch phase's "waiting for ..." line.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Reporter for ConsoleReporter {
    fn phase_started(&self, label: &str) {
        if self.verbose {
            println!("{} {label}", "…".dimmed());
        }
    }

    fn phase_updated(&self, label: &str, detail: &str) {
        if self.verbose || label == "watch" {
            println!("{} {detail}", "◌".cyan());
        }
    }

    fn phase_finished(&self, label: &str, status: &PhaseStatus) {
        match status {
            PhaseStatus::Succeeded(detail) => println!("{} {detail}", "✓".green()),
            PhaseStatus::Failed(detail) => eprintln!("{} {label}: {detail}", "✗".red()),
            PhaseStatus::Interrupted => {
                if self.verbose {
                    println!("{} {label} interrupted", "·".yellow());
                }
            }
        }
    }

    fn message(&self, level: Level, text: &str) {
        match level {
            Level::Info => println!("{text}"),
            Level::Warn => eprintln!("{} {text}", "warning:".yellow().bold()),
            Level::Error => eprintln!("{} {text}", "error:".red().bold()),
        }
    }
}
