//! OS filesystem watching.
//!
//! A [`WatchHandle`] owns the `notify` watcher and buffers normalized events
//! until the observer drains them. It is created once from the first journal
//! and afterwards only grows via [`EventSource::update`], so descriptors
//! registered in earlier iterations are kept.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use devpush_core::{FsEvent, FsEventKind, ObservationJournal};

use crate::error::WatchError;

/// Buffered source of filesystem events.
#[async_trait]
pub trait EventSource: Send {
    /// Suspend until at least one event is buffered. Never resolves once stopped.
    async fn wait_for_event(&mut self);

    /// Take every buffered event.
    fn drain_events(&mut self) -> Vec<FsEvent>;

    /// Start watching any directory of `journal` not yet watched.
    fn update(&mut self, journal: &ObservationJournal) -> Result<(), WatchError>;

    /// Release descriptors. Idempotent.
    fn stop(&mut self);
}

pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    watched_dirs: HashSet<PathBuf>,
    buffer: Vec<FsEvent>,
    stopped: bool,
}

impl WatchHandle {
    /// Watch every directory of `journal`.
    ///
    /// # Errors
    ///
    /// [`WatchError::EmptyWatchSet`] if the journal yields no directory.
    pub fn new(journal: &ObservationJournal) -> Result<Self, WatchError> {
        if journal.watch_dirs().is_empty() {
            return Err(WatchError::EmptyWatchSet);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;

        let mut handle = Self {
            watcher: Some(watcher),
            event_rx,
            watched_dirs: HashSet::new(),
            buffer: Vec::new(),
            stopped: false,
        };
        handle.update(journal)?;
        Ok(handle)
    }

    pub fn watched_dirs(&self) -> usize {
        self.watched_dirs.len()
    }

    fn absorb(&mut self, raw: notify::Result<Event>) {
        match raw {
            Ok(event) => self.buffer.extend(normalize_event(event)),
            Err(err) => tracing::warn!(error = %err, "watcher event error"),
        }
    }

    fn absorb_pending(&mut self) {
        while let Ok(raw) = self.event_rx.try_recv() {
            self.absorb(raw);
        }
    }
}

#[async_trait]
impl EventSource for WatchHandle {
    async fn wait_for_event(&mut self) {
        loop {
            if self.stopped {
                std::future::pending::<()>().await;
            }
            self.absorb_pending();
            if !self.buffer.is_empty() {
                return;
            }
            match self.event_rx.recv().await {
                Some(raw) => self.absorb(raw),
                None => {
                    tracing::warn!("watcher channel closed");
                    self.stopped = true;
                }
            }
        }
    }

    fn drain_events(&mut self) -> Vec<FsEvent> {
        self.absorb_pending();
        std::mem::take(&mut self.buffer)
    }

    fn update(&mut self, journal: &ObservationJournal) -> Result<(), WatchError> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Ok(());
        };
        for dir in journal.watch_dirs() {
            if self.watched_dirs.contains(&dir) {
                continue;
            }
            match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::debug!(path = %dir.display(), "watching directory");
                    self.watched_dirs.insert(dir);
                }
                // Removed since the build read it; the next update retries.
                Err(err) if is_not_found(&err) => {
                    tracing::debug!(path = %dir.display(), "directory vanished before watch");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        if !self.stopped {
            tracing::debug!(dirs = self.watched_dirs.len(), "stopping filesystem watcher");
        }
        self.stopped = true;
        self.watcher = None;
        self.watched_dirs.clear();
        self.buffer.clear();
    }
}

fn is_not_found(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == ErrorKind::NotFound,
        _ => false,
    }
}

/// Map a raw `notify` event onto added/changed/removed events, one per path.
pub fn normalize_event(event: Event) -> Vec<FsEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FsEventKind::Added,
        EventKind::Remove(_) => FsEventKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsEventKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Added,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut events = Vec::new();
            if let Some(from) = paths.next() {
                events.push(FsEvent::new(FsEventKind::Removed, from));
            }
            events.extend(paths.map(|to| FsEvent::new(FsEventKind::Added, to)));
            return events;
        }
        // Platforms that cannot tell which half of a rename this is.
        EventKind::Modify(ModifyKind::Name(_)) => {
            return event
                .paths
                .into_iter()
                .map(|path| {
                    let kind = if path.exists() {
                        FsEventKind::Added
                    } else {
                        FsEventKind::Removed
                    };
                    FsEvent::new(kind, path)
                })
                .collect();
        }
        EventKind::Modify(_) | EventKind::Any => FsEventKind::Changed,
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .into_iter()
        .map(|path| FsEvent::new(kind, path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use rstest::rstest;
    use std::path::Path;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn kinds(events: &[FsEvent]) -> Vec<(FsEventKind, &Path)> {
        events.iter().map(|e| (e.kind, e.path.as_path())).collect()
    }

    #[rstest]
    #[case(EventKind::Create(CreateKind::File), FsEventKind::Added)]
    #[case(EventKind::Remove(RemoveKind::File), FsEventKind::Removed)]
    #[case(EventKind::Modify(ModifyKind::Data(DataChange::Content)), FsEventKind::Changed)]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::From)), FsEventKind::Removed)]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::To)), FsEventKind::Added)]
    fn single_path_events(#[case] raw: EventKind, #[case] expected: FsEventKind) {
        let events = normalize_event(event(raw, &["/p/a.ts"]));
        assert_eq!(kinds(&events), vec![(expected, Path::new("/p/a.ts"))]);
    }

    #[test]
    fn rename_both_splits_into_remove_and_add() {
        let events = normalize_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/p/old.ts", "/p/new.ts"],
        ));
        assert_eq!(
            kinds(&events),
            vec![
                (FsEventKind::Removed, Path::new("/p/old.ts")),
                (FsEventKind::Added, Path::new("/p/new.ts")),
            ]
        );
    }

    #[rstest]
    #[case(EventKind::Access(AccessKind::Any))]
    #[case(EventKind::Other)]
    fn access_and_other_are_ignored(#[case] raw: EventKind) {
        assert!(normalize_event(event(raw, &["/p/a.ts"])).is_empty());
    }

    #[test]
    fn empty_journal_cannot_be_watched() {
        let journal = ObservationJournal::default();
        assert!(matches!(
            WatchHandle::new(&journal),
            Err(WatchError::EmptyWatchSet)
        ));
    }
}
