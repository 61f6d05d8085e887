//! Deciding when a filesystem change should trigger a rebuild.
//!
//! The observer drains events until one overlaps the last build's journal,
//! then waits for writes to settle: the rebuild fires `quiescence` after the
//! last overlapping event. Events that do not overlap are dropped and never
//! move the deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};

use devpush_core::ObservationJournal;

use crate::error::WatchError;
use crate::fs_watch::EventSource;
use crate::race::ChangeSource;

/// Construct the event source from the first journal, or grow the existing
/// one with the directories of `journal`.
pub fn begin_watch<'h, F>(
    handle: &'h mut Option<Box<dyn EventSource>>,
    journal: &ObservationJournal,
    factory: F,
) -> Result<&'h mut Box<dyn EventSource>, WatchError>
where
    F: FnOnce(&ObservationJournal) -> Result<Box<dyn EventSource>, WatchError>,
{
    let source = match handle.take() {
        Some(mut existing) => {
            existing.update(journal)?;
            existing
        }
        None => factory(journal)?,
    };
    Ok(handle.insert(source))
}

pub struct ChangeObserver<'a> {
    source: &'a mut dyn EventSource,
    journal: &'a ObservationJournal,
    quiescence: Duration,
}

impl<'a> ChangeObserver<'a> {
    pub fn new(
        source: &'a mut dyn EventSource,
        journal: &'a ObservationJournal,
        quiescence: Duration,
    ) -> Self {
        Self {
            source,
            journal,
            quiescence,
        }
    }

    /// Resolve once an overlapping change has been seen and writes have settled.
    pub async fn wait_for_change(&mut self) {
        loop {
            self.source.wait_for_event().await;
            if self.drain_overlapping() {
                break;
            }
        }
        self.quiesce().await;
    }

    /// Wait until `quiescence` has passed without a further overlapping event.
    pub async fn quiesce(&mut self) {
        let mut deadline = Instant::now() + self.quiescence;
        loop {
            let woke = tokio::select! {
                _ = sleep_until(deadline) => false,
                _ = self.source.wait_for_event() => true,
            };
            if !woke {
                return;
            }
            if self.drain_overlapping() {
                deadline = Instant::now() + self.quiescence;
            }
        }
    }

    fn drain_overlapping(&mut self) -> bool {
        let journal = self.journal;
        let mut overlapped = false;
        for event in self.source.drain_events() {
            if journal.overlaps(&event) {
                tracing::debug!(path = %event.path.display(), kind = ?event.kind, "change overlaps last build");
                overlapped = true;
            } else {
                tracing::trace!(path = %event.path.display(), "ignoring unrelated change");
            }
        }
        overlapped
    }
}

#[async_trait]
impl<'a> ChangeSource for ChangeObserver<'a> {
    async fn wait(&mut self) {
        self.wait_for_change().await;
    }

    /// The watch handle outlives the race, so there is nothing to release.
    fn cancel(&mut self) {}
}
