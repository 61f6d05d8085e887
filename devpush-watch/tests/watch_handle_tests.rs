//! The real watcher: notify events through `WatchHandle` into `ChangeObserver`.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::Project;
use devpush_core::{Finalized, ObservationJournal, PushFailure, RecordingFs, TypecheckMode};
use devpush_deploy::{
    DeployPipeline, HttpDeploymentApi, Pusher, TypeChecker, TypecheckReport,
};
use devpush_watch::{ChangeObserver, EventSource, WatchHandle};

const QUIESCENCE: Duration = Duration::from_millis(50);
const QUIET_PERIOD: Duration = Duration::from_millis(400);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Journal a build that read only `paths`.
fn journal_of(paths: &[&Path]) -> ObservationJournal {
    let recording = RecordingFs::new();
    for path in paths {
        recording.read(path).expect("read");
    }
    match recording.finalize() {
        Finalized::Journal(journal) => journal,
        other => panic!("unstable fixture: {other:?}"),
    }
}

#[tokio::test]
async fn only_an_edit_to_a_read_file_wakes_the_observer() {
    let project = Project::new();
    let a = project.module("a.ts");
    let journal = journal_of(&[&a]);
    let mut handle = WatchHandle::new(&journal).expect("watch");
    assert_eq!(handle.watched_dirs(), 1);

    let mut observer = ChangeObserver::new(&mut handle, &journal, QUIESCENCE);

    // b.ts shares a.ts's directory but was never read; the README sits outside it.
    fs::write(project.module("b.ts"), "export const b = 2;\n").expect("write b");
    fs::write(project.readme(), "more docs\n").expect("write readme");
    assert!(
        tokio::time::timeout(QUIET_PERIOD, observer.wait_for_change())
            .await
            .is_err(),
        "an unread sibling must not trigger a rebuild"
    );

    fs::write(&a, "export const a = 2;\n").expect("write a");
    tokio::time::timeout(DELIVERY_TIMEOUT, observer.wait_for_change())
        .await
        .expect("edit to a.ts should wake the observer");
}

#[tokio::test]
async fn rewriting_identical_contents_is_not_a_change() {
    let project = Project::new();
    let a = project.module("a.ts");
    let journal = journal_of(&[&a]);
    let mut handle = WatchHandle::new(&journal).expect("watch");
    let mut observer = ChangeObserver::new(&mut handle, &journal, QUIESCENCE);

    let original = fs::read(&a).expect("read a");
    fs::write(&a, &original).expect("rewrite a");
    assert!(
        tokio::time::timeout(QUIET_PERIOD, observer.wait_for_change())
            .await
            .is_err(),
        "same bytes must not trigger a rebuild"
    );
}

#[tokio::test]
async fn update_adds_only_new_directories() {
    let project = Project::new();
    let nested = project.functions().join("lib");
    fs::create_dir_all(&nested).expect("mkdir");
    fs::write(nested.join("util.ts"), "export {};\n").expect("write util");

    let first = journal_of(&[&project.module("a.ts")]);
    let mut handle = WatchHandle::new(&first).expect("watch");
    assert_eq!(handle.watched_dirs(), 1);

    handle.update(&first).expect("update");
    assert_eq!(handle.watched_dirs(), 1);

    let second = journal_of(&[&project.module("a.ts"), &nested.join("util.ts")]);
    handle.update(&second).expect("update");
    assert_eq!(handle.watched_dirs(), 2);

    handle.stop();
    handle.stop();
}

// ---------------------------------------------------------------------------
// Journals left by failed builds
// ---------------------------------------------------------------------------

struct RejectingChecker;

impl TypeChecker for RejectingChecker {
    fn check(&self, _: &Path, _: TypecheckMode) -> Result<TypecheckReport, PushFailure> {
        Err(PushFailure::invalid_local_state("a.ts(1,7): error TS2322"))
    }
}

#[tokio::test]
async fn a_failed_type_check_leaves_a_watchable_journal() {
    let project = Project::new();
    let mut pipeline = DeployPipeline::new(Arc::new(HttpDeploymentApi::default()))
        .with_type_checker(Arc::new(RejectingChecker));
    let options = devpush_core::PushOptions {
        typecheck: TypecheckMode::Enable,
        ..project.options()
    };
    let recording = Arc::new(RecordingFs::new());

    pipeline
        .push(&options, recording.clone())
        .await
        .expect_err("type errors fail the push");

    let Finalized::Journal(journal) = recording.finalize() else {
        panic!("tree was stable");
    };
    assert!(!journal.is_empty());
    let mut handle = WatchHandle::new(&journal).expect("failed build must still be watchable");
    let mut observer = ChangeObserver::new(&mut handle, &journal, QUIESCENCE);

    fs::write(project.module("a.ts"), "export const a: number = 2;\n").expect("fix a");
    tokio::time::timeout(DELIVERY_TIMEOUT, observer.wait_for_change())
        .await
        .expect("fixing the module should wake the observer");
}
