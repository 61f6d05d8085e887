#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use devpush_core::{
    Credentials, ErrorOutcome, FsEvent, FsEventKind, ObservationJournal, PushFailure,
    PushOptions, RecordingFs, TypecheckMode,
};
use devpush_deploy::{DiffResult, PushAction, PushReport, Pusher};
use devpush_watch::{ChangeSource, EventSource, SignalWatch, WatchError};
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Project fixture
// ---------------------------------------------------------------------------

pub struct Project {
    pub dir: TempDir,
}

impl Project {
    /// `functions/{a.ts,b.ts}` plus an unrelated `README.md`.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let functions = dir.path().join("functions");
        fs::create_dir_all(&functions).expect("mkdir");
        fs::write(functions.join("a.ts"), "export const a = 1;\n").expect("write a");
        fs::write(functions.join("b.ts"), "export const b = 1;\n").expect("write b");
        fs::write(dir.path().join("README.md"), "docs\n").expect("write readme");
        Self { dir }
    }

    pub fn functions(&self) -> PathBuf {
        self.dir.path().join("functions")
    }

    pub fn module(&self, name: &str) -> PathBuf {
        self.functions().join(name)
    }

    pub fn readme(&self) -> PathBuf {
        self.dir.path().join("README.md")
    }

    /// Read the tree the way a build would and return the journal.
    pub fn journal(&self) -> ObservationJournal {
        let recording = RecordingFs::new();
        read_tree(&recording, &self.functions()).expect("read tree");
        match recording.finalize() {
            devpush_core::Finalized::Journal(journal) => journal,
            other => panic!("unstable fixture: {other:?}"),
        }
    }

    pub fn options(&self) -> PushOptions {
        PushOptions {
            credentials: Credentials {
                url: "http://127.0.0.1:3210".to_string(),
                deploy_key: "dev-key".into(),
            },
            source_root: self.functions(),
            dry_run: false,
            verbose: false,
            typecheck: TypecheckMode::Disable,
            codegen: false,
        }
    }
}

pub fn read_tree(fs: &RecordingFs, root: &Path) -> std::io::Result<()> {
    for path in fs.read_dir(root)? {
        fs.read(&path)?;
    }
    Ok(())
}

/// Write `contents` to `path` and emit the matching event.
pub fn edit(events: &mpsc::UnboundedSender<FsEvent>, path: &Path, contents: &str) {
    fs::write(path, contents).expect("write");
    events
        .send(FsEvent::new(FsEventKind::Changed, path))
        .expect("send event");
}

// ---------------------------------------------------------------------------
// Scripted event source
// ---------------------------------------------------------------------------

pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<FsEvent>,
    buffer: Vec<FsEvent>,
    pub stops: Arc<AtomicUsize>,
}

pub fn scripted_source() -> (mpsc::UnboundedSender<FsEvent>, ScriptedSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    let source = ScriptedSource {
        rx,
        buffer: Vec::new(),
        stops: Arc::new(AtomicUsize::new(0)),
    };
    (tx, source)
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn wait_for_event(&mut self) {
        loop {
            while let Ok(event) = self.rx.try_recv() {
                self.buffer.push(event);
            }
            if !self.buffer.is_empty() {
                return;
            }
            match self.rx.recv().await {
                Some(event) => self.buffer.push(event),
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn drain_events(&mut self) -> Vec<FsEvent> {
        while let Ok(event) = self.rx.try_recv() {
            self.buffer.push(event);
        }
        std::mem::take(&mut self.buffer)
    }

    fn update(&mut self, _journal: &ObservationJournal) -> Result<(), WatchError> {
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Counting remote watcher
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct WatchSwitch {
    pub cancels: Arc<AtomicUsize>,
    pub armed: Arc<Mutex<Vec<bool>>>,
    pub fire: Arc<Notify>,
}

impl WatchSwitch {
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn armed_history(&self) -> Vec<bool> {
        self.armed.lock().expect("lock").clone()
    }
}

pub struct CountingWatch {
    switch: WatchSwitch,
    wants: fn(&ErrorOutcome) -> bool,
    armed: bool,
}

impl CountingWatch {
    pub fn table(switch: WatchSwitch) -> Self {
        Self {
            switch,
            wants: |o| o.watched_table().is_some(),
            armed: false,
        }
    }

    pub fn env_vars(switch: WatchSwitch) -> Self {
        Self {
            switch,
            wants: ErrorOutcome::watches_env_vars,
            armed: false,
        }
    }
}

#[async_trait]
impl ChangeSource for CountingWatch {
    async fn wait(&mut self) {
        if !self.armed {
            std::future::pending::<()>().await;
        }
        self.switch.fire.notified().await;
    }

    fn cancel(&mut self) {
        self.switch.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

impl SignalWatch for CountingWatch {
    fn arm(&mut self, last: Option<&ErrorOutcome>) {
        self.armed = last.map(self.wants).unwrap_or(false);
        self.switch.armed.lock().expect("lock").push(self.armed);
    }
}

// ---------------------------------------------------------------------------
// Scripted pusher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Attempt {
    pub at: Instant,
    pub table_cancels: usize,
    pub env_cancels: usize,
}

pub struct ScriptedPusher {
    script: VecDeque<Result<PushReport, PushFailure>>,
    attempts: Arc<Mutex<Vec<Attempt>>>,
    table: WatchSwitch,
    env: WatchSwitch,
    /// Rewrite `a.ts` after reading it during the first attempt.
    pub mutate_first: bool,
}

impl ScriptedPusher {
    pub fn new(
        script: Vec<Result<PushReport, PushFailure>>,
        table: WatchSwitch,
        env: WatchSwitch,
    ) -> (Self, Arc<Mutex<Vec<Attempt>>>) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let pusher = Self {
            script: script.into(),
            attempts: attempts.clone(),
            table,
            env,
            mutate_first: false,
        };
        (pusher, attempts)
    }
}

#[async_trait]
impl Pusher for ScriptedPusher {
    async fn push(
        &mut self,
        options: &PushOptions,
        fs: Arc<RecordingFs>,
    ) -> Result<PushReport, PushFailure> {
        read_tree(&fs, &options.source_root)
            .map_err(|e| PushFailure::invalid_local_state(e.to_string()))?;
        if std::mem::take(&mut self.mutate_first) {
            fs::write(options.source_root.join("a.ts"), "export const a = 2;\n")
                .expect("mutate");
        }
        self.attempts.lock().expect("lock").push(Attempt {
            at: Instant::now(),
            table_cancels: self.table.cancels(),
            env_cancels: self.env.cancels(),
        });
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(report(PushAction::Skipped)))
    }
}

pub fn report(action: PushAction) -> PushReport {
    PushReport {
        action,
        diff: DiffResult::default(),
        duration_ms: 0,
        finished_at: Utc::now(),
    }
}

pub fn failure(outcome: ErrorOutcome) -> Result<PushReport, PushFailure> {
    Err(PushFailure::new(outcome, "scripted failure"))
}
