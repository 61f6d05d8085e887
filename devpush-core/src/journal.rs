//! Observation journal.
//!
//! A build reads the source tree through a [`RecordingFs`]. Every existence
//! check, stat, directory listing and file read is recorded together with a
//! fingerprint of what was seen. [`RecordingFs::finalize`] turns the record
//! into an immutable [`ObservationJournal`], or reports that the tree changed
//! while the build was still reading it.
//!
//! The journal answers two questions for the watcher:
//! - which directories must be watched ([`ObservationJournal::watch_dirs`])
//! - whether a filesystem event invalidates the build
//!   ([`ObservationJournal::overlaps`])
//!
//! Paths are normalized (canonicalized, or canonical parent + file name for
//! paths that do not exist) so they compare equal to the paths reported by
//! the OS watcher.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Kind of a normalized filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Added,
    Changed,
    Removed,
}

/// One normalized filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    pub observed_at: DateTime<Utc>,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            observed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// What the build saw at one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The path did not exist.
    Missing,
    /// The path existed but could not be read.
    Unreadable,
    /// Metadata only. Directories are compared by kind alone.
    Stat {
        is_dir: bool,
        len: u64,
        modified: Option<SystemTime>,
    },
    /// Full file contents were read.
    Contents { sha256: String },
    /// A directory was enumerated.
    Listing { entries: BTreeSet<OsString> },
}

impl Observation {
    fn stat(meta: &fs::Metadata) -> Self {
        Observation::Stat {
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }

    fn from_io_error(err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Observation::Missing
        } else {
            Observation::Unreadable
        }
    }

    /// True if looking at `path` again would produce the same observation.
    pub fn matches_disk(&self, path: &Path) -> bool {
        match self {
            Observation::Missing => !path_exists(path),
            Observation::Unreadable => matches!(
                fs::read(path),
                Err(err) if err.kind() != io::ErrorKind::NotFound
            ),
            Observation::Stat {
                is_dir,
                len,
                modified,
            } => match fs::metadata(path) {
                Ok(meta) if *is_dir => meta.is_dir(),
                Ok(meta) => {
                    !meta.is_dir() && meta.len() == *len && meta.modified().ok() == *modified
                }
                Err(_) => false,
            },
            Observation::Contents { sha256 } => match fs::read(path) {
                Ok(bytes) => &sha256_hex(&bytes) == sha256,
                Err(_) => false,
            },
            Observation::Listing { entries } => match list_names(path) {
                Ok(current) => &current == entries,
                Err(_) => false,
            },
        }
    }
}

/// Merge a new observation of a path with an earlier one. Contents and
/// listings are never downgraded to a bare stat of the same path.
fn merge(existing: Option<&Observation>, new: Observation) -> Observation {
    match (existing, &new) {
        (Some(prev @ Observation::Contents { .. }), Observation::Stat { .. })
        | (Some(prev @ Observation::Listing { .. }), Observation::Stat { .. }) => prev.clone(),
        _ => new,
    }
}

// ---------------------------------------------------------------------------
// RecordingFs
// ---------------------------------------------------------------------------

/// Filesystem facade that journals every read it performs.
#[derive(Debug, Default)]
pub struct RecordingFs {
    observations: Mutex<BTreeMap<PathBuf, Observation>>,
}

/// Result of [`RecordingFs::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    /// Every observation still holds.
    Journal(ObservationJournal),
    /// `path` changed after it was read; the build saw an inconsistent tree.
    Invalidated { path: PathBuf },
}

impl RecordingFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }

    pub fn metadata(&self, path: &Path) -> io::Result<fs::Metadata> {
        let result = fs::metadata(path);
        let observation = match &result {
            Ok(meta) => Observation::stat(meta),
            Err(err) => Observation::from_io_error(err),
        };
        self.record(path, observation);
        result
    }

    pub fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let result = fs::read(path);
        let observation = match &result {
            Ok(bytes) => Observation::Contents {
                sha256: sha256_hex(bytes),
            },
            Err(err) => Observation::from_io_error(err),
        };
        self.record(path, observation);
        result
    }

    pub fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid UTF-8: {err}", path.display()),
            )
        })
    }

    /// List a directory. Returned paths are `path.join(name)`, sorted.
    pub fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        match list_names(path) {
            Ok(entries) => {
                let children = entries.iter().map(|name| path.join(name)).collect();
                self.record(path, Observation::Listing { entries });
                Ok(children)
            }
            Err(err) => {
                self.record(path, Observation::from_io_error(&err));
                Err(err)
            }
        }
    }

    pub fn observation_count(&self) -> usize {
        self.lock().len()
    }

    /// Re-check every observation and freeze the journal.
    pub fn finalize(&self) -> Finalized {
        let observations = self.lock().clone();
        for (path, observation) in &observations {
            if !observation.matches_disk(path) {
                return Finalized::Invalidated { path: path.clone() };
            }
        }
        Finalized::Journal(ObservationJournal { observations })
    }

    fn record(&self, path: &Path, observation: Observation) {
        let key = normalize(path);
        let mut observations = self.lock();
        let merged = merge(observations.get(&key), observation);
        observations.insert(key, merged);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Observation>> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// ObservationJournal
// ---------------------------------------------------------------------------

/// Immutable record of what one build read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservationJournal {
    observations: BTreeMap<PathBuf, Observation>,
}

impl ObservationJournal {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&Observation> {
        self.observations.get(&normalize(path))
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.observations.keys().map(PathBuf::as_path)
    }

    /// Directories whose events can invalidate this journal.
    ///
    /// Enumerated or stat'ed directories are watched themselves; every other
    /// path is covered by its nearest existing ancestor directory.
    pub fn watch_dirs(&self) -> BTreeSet<PathBuf> {
        let mut dirs = BTreeSet::new();
        for (path, observation) in &self.observations {
            if matches!(
                observation,
                Observation::Listing { .. } | Observation::Stat { is_dir: true, .. }
            ) && path.is_dir()
            {
                dirs.insert(path.clone());
            }
            if let Some(dir) = path.parent().and_then(nearest_existing_dir) {
                dirs.insert(dir);
            }
        }
        dirs
    }

    /// Does `event` invalidate what the build read?
    ///
    /// - a journaled missing path overlaps once it exists
    /// - a journaled path overlaps on add/remove, and on change when its
    ///   fingerprint no longer matches
    /// - a child of an enumerated directory overlaps when its presence no
    ///   longer matches the listing
    pub fn overlaps(&self, event: &FsEvent) -> bool {
        let path = normalize(&event.path);

        if let Some(observation) = self.observations.get(&path) {
            let invalidated = match (observation, event.kind) {
                (Observation::Missing, _) => path_exists(&path),
                (_, FsEventKind::Added | FsEventKind::Removed) => true,
                (observation, FsEventKind::Changed) => !observation.matches_disk(&path),
            };
            if invalidated {
                return true;
            }
        }

        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        match self.observations.get(parent) {
            Some(Observation::Listing { entries }) => entries.contains(name) != path_exists(&path),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Canonical form of `path` that also works for paths that do not exist.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = match std::env::current_dir() {
        Ok(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    };

    // Canonicalize the longest existing prefix, then re-append the rest.
    let mut missing = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        if let Ok(canonical) = fs::canonicalize(cursor) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, name| acc.join(name));
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                cursor = parent;
            }
            _ => return absolute,
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn list_names(path: &Path) -> io::Result<BTreeSet<OsString>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(path)? {
        names.insert(entry?.file_name());
    }
    Ok(names)
}

fn nearest_existing_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|candidate| candidate.is_dir())
        .map(Path::to_path_buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
