use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devpush_core::{
    Artifact, Credentials, ErrorOutcome, Finalized, PushFailure, PushOptions, RecordingFs,
    RemoteArtifact, SchemaState, TableName, TypecheckMode,
};
use devpush_deploy::{
    DeployError, DeployPipeline, DeploymentApi, PushAction, Pusher, SchemaWait, TypeChecker,
    TypecheckReport,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fake deployment
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeApi {
    live: Mutex<RemoteArtifact>,
    schema: Mutex<VecDeque<SchemaState>>,
    push_error: Mutex<Option<(u16, &'static str)>>,
    writes: AtomicUsize,
}

impl FakeApi {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            live: Mutex::new(RemoteArtifact {
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                ..RemoteArtifact::default()
            }),
            ..Self::default()
        })
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn script_schema(&self, states: impl IntoIterator<Item = SchemaState>) {
        self.schema.lock().unwrap().extend(states);
    }
}

#[async_trait]
impl DeploymentApi for FakeApi {
    async fn pull(&self, _: &Credentials) -> Result<RemoteArtifact, DeployError> {
        Ok(self.live.lock().unwrap().clone())
    }

    async fn push(&self, _: &Credentials, artifact: &Artifact) -> Result<(), DeployError> {
        if let Some((status, code)) = *self.push_error.lock().unwrap() {
            return Err(DeployError::Http {
                status,
                code: Some(code.to_string()),
                message: format!("{code} from fake"),
                table: None,
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut live = self.live.lock().unwrap();
        live.modules = artifact
            .modules
            .iter()
            .map(|(k, m)| (k.clone(), m.sha256.clone()))
            .collect();
        live.auth = artifact.auth.clone();
        live.schema_hash = artifact.schema_hash.clone();
        Ok(())
    }

    async fn schema_state(&self, _: &Credentials) -> Result<SchemaState, DeployError> {
        Ok(self
            .schema
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SchemaState::Active))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join("functions")).expect("mkdir");
    for (rel, contents) in files {
        write(&dir.path().join("functions").join(rel), contents);
    }
    dir
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

fn options(dir: &TempDir) -> PushOptions {
    PushOptions {
        credentials: Credentials {
            url: "http://127.0.0.1:3210".to_string(),
            deploy_key: "dev-key".into(),
        },
        source_root: dir.path().join("functions"),
        dry_run: false,
        verbose: false,
        typecheck: TypecheckMode::Disable,
        codegen: true,
    }
}

fn pipeline(api: &Arc<FakeApi>) -> DeployPipeline {
    DeployPipeline::new(api.clone()).with_schema_wait(SchemaWait {
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    })
}

async fn push_once(
    pipeline: &mut DeployPipeline,
    options: &PushOptions,
) -> Result<devpush_deploy::PushReport, devpush_core::PushFailure> {
    pipeline.push(options, Arc::new(RecordingFs::new())).await
}

// ---------------------------------------------------------------------------
// 1. diff gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pushing_same_tree_twice_writes_once() {
    init_logs();
    let dir = project(&[("messages.ts", "export const list = 1;\n")]);
    let api = FakeApi::new();
    let mut pipeline = pipeline(&api);
    let options = options(&dir);

    let first = push_once(&mut pipeline, &options).await.expect("first push");
    assert_eq!(first.action, PushAction::Pushed);
    assert_eq!(first.diff.added, vec!["messages.ts"]);

    let second = push_once(&mut pipeline, &options).await.expect("second push");
    assert_eq!(second.action, PushAction::Skipped);
    assert!(second.diff.is_empty());
    assert_eq!(api.writes(), 1);
}

#[tokio::test]
async fn edit_between_pushes_writes_again() {
    let dir = project(&[("messages.ts", "v1")]);
    let api = FakeApi::new();
    let mut pipeline = pipeline(&api);
    let options = options(&dir);

    push_once(&mut pipeline, &options).await.expect("first push");
    write(&dir.path().join("functions/messages.ts"), "v2");
    let report = push_once(&mut pipeline, &options).await.expect("second push");

    assert_eq!(report.action, PushAction::Pushed);
    assert_eq!(report.diff.changed, vec!["messages.ts"]);
    assert_eq!(api.writes(), 2);
}

#[tokio::test]
async fn dry_run_never_writes_or_generates() {
    let dir = project(&[("messages.ts", "v1")]);
    let api = FakeApi::new();
    let mut pipeline = pipeline(&api);
    let options = PushOptions {
        dry_run: true,
        ..options(&dir)
    };

    let report = push_once(&mut pipeline, &options).await.expect("dry run");
    assert_eq!(report.action, PushAction::DryRun);
    assert_eq!(api.writes(), 0);
    assert!(!dir.path().join("functions/_generated").exists());
}

#[tokio::test]
async fn codegen_writes_manifest_outside_the_bundle() {
    let dir = project(&[("messages.ts", "v1")]);
    let api = FakeApi::new();
    let mut pipeline = pipeline(&api);
    let options = options(&dir);

    let report = push_once(&mut pipeline, &options).await.expect("push");
    assert!(dir.path().join("functions/_generated/modules.json").exists());
    assert_eq!(report.diff.added, vec!["messages.ts"], "generated files are not modules");
}

#[tokio::test]
async fn diff_only_reports_without_writing() {
    let dir = project(&[("a.ts", "a"), ("b.ts", "b")]);
    let api = FakeApi::new();
    let pipeline = pipeline(&api);

    let diff = pipeline.diff(&options(&dir)).await.expect("diff");
    assert_eq!(diff.added, vec!["a.ts", "b.ts"]);
    assert_eq!(api.writes(), 0);
}

// ---------------------------------------------------------------------------
// 2. schema readiness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_schema_forces_a_push_with_no_diff() {
    let dir = project(&[("messages.ts", "v1")]);
    let api = FakeApi::new();
    let mut pipeline = pipeline(&api);
    let options = options(&dir);
    push_once(&mut pipeline, &options).await.expect("first push");

    api.script_schema([SchemaState::Pending, SchemaState::Pending]);
    let report = push_once(&mut pipeline, &options).await.expect("second push");

    assert!(report.diff.is_empty());
    assert!(report.diff.schema_pending);
    assert_eq!(report.action, PushAction::Pushed);
    assert_eq!(api.writes(), 2);
}

#[tokio::test]
async fn schema_failure_on_table_is_remote_data_outcome() {
    let dir = project(&[("schema.ts", "export default {};")]);
    let api = FakeApi::new();
    let mut pipeline = pipeline(&api);
    api.script_schema([SchemaState::Failed {
        table: Some(TableName::from("messages")),
        message: "document 12 is missing `author`".to_string(),
    }]);

    let err = push_once(&mut pipeline, &options(&dir)).await.unwrap_err();
    assert_eq!(
        err.outcome,
        ErrorOutcome::InvalidLocalStateOrRemoteData {
            table: TableName::from("messages")
        }
    );
    assert_eq!(api.writes(), 0);
}

#[tokio::test]
async fn schema_stuck_pending_times_out_as_transient() {
    let dir = project(&[("messages.ts", "v1")]);
    let api = FakeApi::new();
    api.script_schema(std::iter::repeat(SchemaState::Pending).take(1_000));
    let mut pipeline = DeployPipeline::new(api.clone()).with_schema_wait(SchemaWait {
        poll_interval: Duration::from_millis(2),
        timeout: Duration::from_millis(20),
    });

    let err = push_once(&mut pipeline, &options(&dir)).await.unwrap_err();
    assert_eq!(err.outcome, ErrorOutcome::Transient);
}

// ---------------------------------------------------------------------------
// 3. classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn incompatible_server_version_is_fatal() {
    let dir = project(&[("messages.ts", "v1")]);
    let api = FakeApi::new();
    api.live.lock().unwrap().server_version = "7.0.0".to_string();

    let err = push_once(&mut pipeline(&api), &options(&dir))
        .await
        .unwrap_err();
    assert_eq!(err.outcome, ErrorOutcome::Fatal);
    assert!(err.message.contains("7.0.0"));
}

#[tokio::test]
async fn missing_env_var_on_push_is_env_outcome() {
    let dir = project(&[("messages.ts", "v1")]);
    let api = FakeApi::new();
    *api.push_error.lock().unwrap() = Some((400, "MissingEnvironmentVariable"));

    let err = push_once(&mut pipeline(&api), &options(&dir))
        .await
        .unwrap_err();
    assert_eq!(err.outcome, ErrorOutcome::InvalidLocalStateOrEnvVars);
}

#[tokio::test]
async fn missing_source_root_is_invalid_local_state() {
    let dir = TempDir::new().expect("tempdir");
    let api = FakeApi::new();
    let err = push_once(&mut pipeline(&api), &options(&dir))
        .await
        .unwrap_err();
    assert_eq!(err.outcome, ErrorOutcome::InvalidLocalState);
}

// ---------------------------------------------------------------------------
// 4. journal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_records_every_source_read() {
    let dir = project(&[("messages.ts", "v1"), ("lib/util.ts", "u")]);
    let api = FakeApi::new();
    let mut pipeline = pipeline(&api);
    let recording = Arc::new(RecordingFs::new());

    pipeline
        .push(&options(&dir), recording.clone())
        .await
        .expect("push");

    let Finalized::Journal(journal) = recording.finalize() else {
        panic!("tree was stable");
    };
    let util = fs::canonicalize(dir.path().join("functions/lib/util.ts")).expect("canonical");
    assert!(journal.get(&util).is_some(), "nested module read must be journaled");
    let lib = fs::canonicalize(dir.path().join("functions/lib")).expect("canonical");
    assert!(journal.watch_dirs().contains(&lib));
}

// ---------------------------------------------------------------------------
// 5. type checking
// ---------------------------------------------------------------------------

/// Rejects every tree in `enable` mode, like a checker reporting type errors.
struct RejectingChecker;

impl TypeChecker for RejectingChecker {
    fn check(&self, _: &Path, mode: TypecheckMode) -> Result<TypecheckReport, PushFailure> {
        match mode {
            TypecheckMode::Enable => Err(PushFailure::invalid_local_state(
                "messages.ts(1,7): error TS2322",
            )),
            _ => Ok(TypecheckReport::Skipped),
        }
    }
}

#[tokio::test]
async fn type_errors_still_leave_a_watchable_journal() {
    init_logs();
    let dir = project(&[("messages.ts", "export const n: number = 'x';")]);
    let api = FakeApi::new();
    let mut pipeline = pipeline(&api).with_type_checker(Arc::new(RejectingChecker));
    let options = PushOptions {
        typecheck: TypecheckMode::Enable,
        ..options(&dir)
    };
    let recording = Arc::new(RecordingFs::new());

    let err = pipeline
        .push(&options, recording.clone())
        .await
        .unwrap_err();

    assert_eq!(err.outcome, ErrorOutcome::InvalidLocalState);
    assert_eq!(api.writes(), 0);
    let Finalized::Journal(journal) = recording.finalize() else {
        panic!("tree was stable");
    };
    let module = fs::canonicalize(dir.path().join("functions/messages.ts")).expect("canonical");
    assert!(journal.get(&module).is_some(), "the failing module must be watched");
    let functions = fs::canonicalize(dir.path().join("functions")).expect("canonical");
    assert!(journal.watch_dirs().contains(&functions));
}
