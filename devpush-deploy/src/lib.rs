//! devpush-deploy: building an artifact from the local tree and pushing it
//! to a deployment when it differs from what is live.
//!
//! Modules:
//! - [`bundle`]    : source tree → [`devpush_core::Artifact`], read through the journal
//! - [`typecheck`] : optional external type checker
//! - [`codegen`]   : generated client files, hash-gated atomic writes
//! - [`api`]       : deployment HTTP API
//! - [`diff`]      : local vs. live comparison
//! - [`schema`]    : waiting for a pending schema change
//! - [`pipeline`]  : [`Pusher`] and the default [`DeployPipeline`]

pub mod api;
pub mod bundle;
pub mod codegen;
pub mod diff;
pub mod error;
pub mod pipeline;
pub mod schema;
pub mod typecheck;

pub use api::{DeploymentApi, HttpDeploymentApi};
pub use bundle::{Bundler, SourceTreeBundler};
pub use codegen::{CodeGenerator, ManifestCodegen, WriteResult};
pub use diff::{DiffResult, VersionDelta};
pub use error::DeployError;
pub use pipeline::{DeployPipeline, PushAction, PushReport, Pusher};
pub use schema::SchemaWait;
pub use typecheck::{CommandTypeChecker, TypeChecker, TypecheckReport};
