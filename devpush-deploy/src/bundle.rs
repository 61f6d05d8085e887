//! Local artifact construction.
//!
//! The bundler is a collaborator behind the [`Bundler`] trait. The default
//! [`SourceTreeBundler`] is a pass-through: it collects module sources as-is,
//! reading everything through the [`RecordingFs`] so the watcher knows which
//! paths the artifact depends on.

use std::path::Path;

use devpush_core::journal::sha256_hex;
use devpush_core::{Artifact, ModuleSource, PushFailure, RecordingFs};

pub const AUTH_CONFIG_FILE: &str = "auth.config.json";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const MODULE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "jsx", "ts", "mts", "cts", "tsx"];
const SKIPPED_DIRS: &[&str] = &["_generated", "node_modules"];

/// Turns a function source tree into a deployable [`Artifact`].
pub trait Bundler: Send + Sync {
    /// Build from `source_root`. All filesystem access must go through `fs`.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidLocalState` failure when the local source is broken.
    fn build(&self, fs: &RecordingFs, source_root: &Path) -> Result<Artifact, PushFailure>;
}

/// Collects every module under the source root without transforming it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceTreeBundler;

impl Bundler for SourceTreeBundler {
    fn build(&self, fs: &RecordingFs, source_root: &Path) -> Result<Artifact, PushFailure> {
        let meta = fs.metadata(source_root).map_err(|err| {
            PushFailure::invalid_local_state(format!(
                "function directory {} is not readable: {err}",
                source_root.display()
            ))
        })?;
        if !meta.is_dir() {
            return Err(PushFailure::invalid_local_state(format!(
                "function directory {} is not a directory",
                source_root.display()
            )));
        }

        let mut artifact = Artifact {
            client_version: CLIENT_VERSION.to_string(),
            ..Artifact::default()
        };
        collect_modules(fs, source_root, source_root, &mut artifact)?;

        let auth_path = source_root.join(AUTH_CONFIG_FILE);
        if fs.exists(&auth_path) {
            let raw = fs.read_to_string(&auth_path).map_err(|err| {
                PushFailure::invalid_local_state(format!("{}: {err}", auth_path.display()))
            })?;
            let parsed = serde_json::from_str(&raw).map_err(|err| {
                PushFailure::invalid_local_state(format!(
                    "{} is not valid JSON: {err}",
                    auth_path.display()
                ))
            })?;
            artifact.auth = Some(parsed);
        }

        artifact.schema_hash = artifact
            .modules
            .iter()
            .find(|(key, _)| is_schema_module(key))
            .map(|(_, module)| module.sha256.clone());

        if artifact.modules.is_empty() {
            tracing::warn!("no modules found under {}", source_root.display());
        }
        tracing::debug!(
            "bundled {} module(s) from {}",
            artifact.modules.len(),
            source_root.display()
        );
        Ok(artifact)
    }
}

fn collect_modules(
    fs: &RecordingFs,
    root: &Path,
    dir: &Path,
    artifact: &mut Artifact,
) -> Result<(), PushFailure> {
    let children = fs.read_dir(dir).map_err(|err| {
        PushFailure::invalid_local_state(format!("cannot list {}: {err}", dir.display()))
    })?;

    for child in children {
        let Some(name) = child.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || SKIPPED_DIRS.contains(&name) {
            continue;
        }

        let meta = fs.metadata(&child).map_err(|err| {
            PushFailure::invalid_local_state(format!("cannot stat {}: {err}", child.display()))
        })?;
        if meta.is_dir() {
            collect_modules(fs, root, &child, artifact)?;
            continue;
        }
        if !is_module_file(&child) {
            continue;
        }

        let source = fs.read_to_string(&child).map_err(|err| {
            PushFailure::invalid_local_state(format!("cannot read {}: {err}", child.display()))
        })?;
        let sha256 = sha256_hex(source.as_bytes());
        artifact
            .modules
            .insert(module_key(root, &child), ModuleSource { source, sha256 });
    }
    Ok(())
}

fn is_module_file(path: &Path) -> bool {
    let is_declaration = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(".d.ts"))
        .unwrap_or(false);
    !is_declaration
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| MODULE_EXTENSIONS.contains(&ext))
            .unwrap_or(false)
}

/// `/`-separated path of `path` relative to `root`.
fn module_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_schema_module(key: &str) -> bool {
    match key.rsplit_once('.') {
        Some((stem, _)) => stem == "schema",
        None => false,
    }
}
