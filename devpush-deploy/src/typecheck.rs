//! Type checking before a push.
//!
//! `enable` turns checker failures into `InvalidLocalState`, `try` logs them
//! and pushes anyway, `disable` never runs the checker.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use devpush_core::{PushFailure, TypecheckMode};

/// Result of a type-check pass that did not stop the push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypecheckReport {
    Passed,
    Skipped,
    /// The checker failed in `try` mode; diagnostics were logged.
    FailedIgnored { diagnostics: String },
}

pub trait TypeChecker: Send + Sync {
    /// # Errors
    ///
    /// Returns `InvalidLocalState` when the check fails in `enable` mode.
    fn check(&self, source_root: &Path, mode: TypecheckMode)
        -> Result<TypecheckReport, PushFailure>;
}

/// Runs an external checker (default `npx tsc --noEmit`) in the source root.
#[derive(Debug, Clone)]
pub struct CommandTypeChecker {
    program: String,
    args: Vec<String>,
}

impl Default for CommandTypeChecker {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            args: vec!["tsc".to_string(), "--noEmit".to_string()],
        }
    }
}

impl CommandTypeChecker {
    /// Build from an argv. Returns `None` for an empty command.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl TypeChecker for CommandTypeChecker {
    fn check(
        &self,
        source_root: &Path,
        mode: TypecheckMode,
    ) -> Result<TypecheckReport, PushFailure> {
        if mode == TypecheckMode::Disable {
            return Ok(TypecheckReport::Skipped);
        }

        tracing::debug!("running `{}` in {}", self.command_line(), source_root.display());
        let output = match Command::new(&self.program)
            .args(&self.args)
            .current_dir(source_root)
            .output()
        {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound && mode == TypecheckMode::Try => {
                tracing::warn!("type checker `{}` not found, skipping", self.program);
                return Ok(TypecheckReport::Skipped);
            }
            Err(err) => {
                return Err(PushFailure::invalid_local_state(format!(
                    "could not run `{}`: {err}",
                    self.command_line()
                )))
            }
        };

        if output.status.success() {
            return Ok(TypecheckReport::Passed);
        }

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));
        let diagnostics = diagnostics.trim().to_string();

        match mode {
            TypecheckMode::Enable => Err(PushFailure::invalid_local_state(format!(
                "type check failed:\n{diagnostics}"
            ))),
            _ => {
                tracing::warn!("type check failed, pushing anyway:\n{diagnostics}");
                Ok(TypecheckReport::FailedIgnored { diagnostics })
            }
        }
    }
}
