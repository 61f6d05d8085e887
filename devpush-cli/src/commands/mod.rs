pub mod console;
pub mod deploy;
pub mod dev;
pub mod diff;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use devpush_core::config::{load_project_config, resolve_credentials};
use devpush_core::PushOptions;
use devpush_deploy::{CommandTypeChecker, DeployPipeline, HttpDeploymentApi, SchemaWait};
use devpush_watch::LoopSettings;

use crate::TypecheckModeArg;

/// Flags shared by every command that builds the project.
#[derive(Args, Debug)]
pub struct ProjectArgs {
    /// Project root containing `devpush.yaml`.
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Deployment URL; overrides $DEVPUSH_URL and `devpush.yaml`.
    #[arg(long)]
    pub url: Option<String>,

    /// Function source directory, relative to the project root.
    #[arg(long)]
    pub functions: Option<PathBuf>,

    /// Type checking: enable, try, or disable.
    #[arg(long)]
    pub typecheck: Option<TypecheckModeArg>,

    /// Show every phase and debug logging.
    #[arg(long, short)]
    pub verbose: bool,
}

/// Everything a command needs to push.
pub struct Prepared {
    pub options: PushOptions,
    pub settings: LoopSettings,
    pub pipeline: DeployPipeline,
}

impl ProjectArgs {
    /// Load config and credentials, then let the flags override them.
    pub fn prepare(&self, dry_run: bool) -> Result<Prepared> {
        let root = std::fs::canonicalize(&self.project_dir).with_context(|| {
            format!("project directory '{}' not found", self.project_dir.display())
        })?;
        let config = load_project_config(&root)
            .with_context(|| format!("failed to load config in '{}'", root.display()))?;
        let credentials = resolve_credentials(&config, self.url.as_deref())
            .context("could not resolve deployment credentials")?;

        let source_root = match &self.functions {
            Some(dir) => root.join(dir),
            None => config.source_root(&root),
        };
        let options = PushOptions {
            credentials,
            source_root,
            dry_run,
            verbose: self.verbose,
            typecheck: self.typecheck.map_or(config.typecheck.mode, Into::into),
            codegen: config.codegen,
        };

        let mut pipeline = DeployPipeline::new(Arc::new(HttpDeploymentApi::default()))
            .with_schema_wait(SchemaWait::from(&config.schema));
        if let Some(checker) = CommandTypeChecker::from_argv(&config.typecheck.command) {
            pipeline = pipeline.with_type_checker(Arc::new(checker));
        }

        Ok(Prepared {
            options,
            settings: LoopSettings::from(&config),
            pipeline,
        })
    }
}
