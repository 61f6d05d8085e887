//! devpush core library: domain types, observation journal, project config.
//!
//! Public API surface:
//! - [`types`]: newtypes, push options, artifacts, [`ErrorOutcome`]
//! - [`journal`]: [`RecordingFs`] and the [`ObservationJournal`] it produces
//! - [`config`]: `devpush.yaml` and credential loading
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod journal;
pub mod types;

pub use config::{Credentials, ProjectConfig};
pub use error::ConfigError;
pub use journal::{Finalized, FsEvent, FsEventKind, ObservationJournal, RecordingFs};
pub use types::{
    Artifact, DeployKey, ErrorOutcome, ModuleSource, PushFailure, PushOptions, RemoteArtifact,
    RunMode, SchemaState, TableName, TypecheckMode,
};
