//! The diff-gated push pipeline.
//!
//! bundle (journaled) → typecheck → codegen → pull live state → wait for a
//! pending schema → diff → push. The write only happens when the diff is
//! non-empty or a schema change was pending, so pushing the same tree twice
//! performs at most one write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use devpush_core::{Artifact, PushFailure, PushOptions, RecordingFs};

use crate::api::DeploymentApi;
use crate::bundle::{Bundler, SourceTreeBundler};
use crate::codegen::{CodeGenerator, ManifestCodegen};
use crate::diff::{DiffResult, VersionDelta};
use crate::schema::{wait_for_schema, SchemaWait};
use crate::typecheck::{CommandTypeChecker, TypeChecker};

/// One push attempt, as seen by the control loop.
#[async_trait]
pub trait Pusher: Send {
    /// Build and push. Every source read must go through `fs`.
    async fn push(
        &mut self,
        options: &PushOptions,
        fs: Arc<RecordingFs>,
    ) -> Result<PushReport, PushFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushAction {
    Pushed,
    /// Local and live state already agree.
    Skipped,
    /// A write was needed but `--dry-run` was set.
    DryRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub action: PushAction,
    pub diff: DiffResult,
    pub duration_ms: u128,
    pub finished_at: DateTime<Utc>,
}

impl PushReport {
    fn new(action: PushAction, diff: DiffResult, started: Instant) -> Self {
        Self {
            action,
            diff,
            duration_ms: started.elapsed().as_millis(),
            finished_at: Utc::now(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms as u64)
    }
}

/// Default [`Pusher`], built from swappable collaborators.
pub struct DeployPipeline {
    bundler: Arc<dyn Bundler>,
    type_checker: Arc<dyn TypeChecker>,
    codegen: Arc<dyn CodeGenerator>,
    api: Arc<dyn DeploymentApi>,
    schema_wait: SchemaWait,
}

impl DeployPipeline {
    pub fn new(api: Arc<dyn DeploymentApi>) -> Self {
        Self {
            bundler: Arc::new(SourceTreeBundler),
            type_checker: Arc::new(CommandTypeChecker::default()),
            codegen: Arc::new(ManifestCodegen),
            api,
            schema_wait: SchemaWait::default(),
        }
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn with_type_checker(mut self, type_checker: Arc<dyn TypeChecker>) -> Self {
        self.type_checker = type_checker;
        self
    }

    pub fn with_codegen(mut self, codegen: Arc<dyn CodeGenerator>) -> Self {
        self.codegen = codegen;
        self
    }

    pub fn with_schema_wait(mut self, schema_wait: SchemaWait) -> Self {
        self.schema_wait = schema_wait;
        self
    }

    /// Bundle, typecheck, and (unless dry-run) run codegen.
    pub async fn build(
        &self,
        options: &PushOptions,
        fs: Arc<RecordingFs>,
    ) -> Result<Artifact, PushFailure> {
        let type_checker = Arc::clone(&self.type_checker);
        let bundler = Arc::clone(&self.bundler);
        let root = options.source_root.clone();
        let mode = options.typecheck;

        // Bundle first: a failed check still has to leave a watchable journal.
        let artifact = tokio::task::spawn_blocking(move || {
            let artifact = bundler.build(&fs, &root)?;
            type_checker.check(&root, mode)?;
            Ok::<_, PushFailure>(artifact)
        })
        .await
        .map_err(|e| PushFailure::fatal(format!("build task failed: {e}")))??;

        if options.codegen && !options.dry_run {
            let codegen = Arc::clone(&self.codegen);
            let root = options.source_root.clone();
            let local = artifact.clone();
            tokio::task::spawn_blocking(move || codegen.generate(&root, &local))
                .await
                .map_err(|e| PushFailure::fatal(format!("codegen task failed: {e}")))??;
        }
        Ok(artifact)
    }

    /// Compare `artifact` with the live deployment, waiting out a pending
    /// schema change first.
    pub async fn plan(
        &self,
        options: &PushOptions,
        artifact: &Artifact,
    ) -> Result<DiffResult, PushFailure> {
        let remote = self.api.pull(&options.credentials).await?;
        let versions = VersionDelta::new(&artifact.client_version, &remote.server_version);
        if !versions.is_compatible() {
            return Err(PushFailure::fatal(format!(
                "client {} is not compatible with deployment version {}",
                versions.client, versions.server
            )));
        }
        let schema_pending =
            wait_for_schema(self.api.as_ref(), &options.credentials, &self.schema_wait).await?;
        Ok(DiffResult::compute(artifact, &remote, schema_pending))
    }

    /// Build and diff without ever writing to the deployment.
    pub async fn diff(&self, options: &PushOptions) -> Result<DiffResult, PushFailure> {
        let options = PushOptions {
            dry_run: true,
            ..options.clone()
        };
        let artifact = self.build(&options, Arc::new(RecordingFs::new())).await?;
        self.plan(&options, &artifact).await
    }
}

#[async_trait]
impl Pusher for DeployPipeline {
    async fn push(
        &mut self,
        options: &PushOptions,
        fs: Arc<RecordingFs>,
    ) -> Result<PushReport, PushFailure> {
        let started = Instant::now();
        let artifact = self.build(options, fs).await?;
        let diff = self.plan(options, &artifact).await?;

        if !diff.requires_push() {
            tracing::info!("deployment is up to date");
            return Ok(PushReport::new(PushAction::Skipped, diff, started));
        }
        if options.dry_run {
            tracing::info!("[dry-run] would push: {}", diff.summary());
            return Ok(PushReport::new(PushAction::DryRun, diff, started));
        }

        self.api.push(&options.credentials, &artifact).await?;
        tracing::info!("pushed: {}", diff.summary());
        Ok(PushReport::new(PushAction::Pushed, diff, started))
    }
}
