//! Generated client files.
//!
//! ## `atomic_write`
//!
//! 1. Normalise line endings and hash the content.
//! 2. Compare with the hash of what is on disk, skip if identical.
//! 3. Write to `<path>.devpush.tmp`.
//! 4. Rename to the final path (atomic on POSIX).
//!
//! Skipping identical content keeps the watcher from seeing our own writes as
//! changes on every iteration.

use std::path::{Path, PathBuf};

use serde_json::json;

use devpush_core::journal::sha256_hex;
use devpush_core::Artifact;

use crate::error::{io_err, DeployError};

pub const GENERATED_DIR: &str = "_generated";
pub const MANIFEST_FILE: &str = "modules.json";

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written { path: PathBuf },
    /// Content on disk already matches.
    Unchanged { path: PathBuf },
}

pub trait CodeGenerator: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DeployError::Io`] when a generated file cannot be written.
    fn generate(&self, source_root: &Path, artifact: &Artifact)
        -> Result<Vec<WriteResult>, DeployError>;
}

/// Writes `_generated/modules.json`, the list of deployed module paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestCodegen;

impl CodeGenerator for ManifestCodegen {
    fn generate(
        &self,
        source_root: &Path,
        artifact: &Artifact,
    ) -> Result<Vec<WriteResult>, DeployError> {
        let manifest = json!({
            "modules": artifact.modules.keys().collect::<Vec<_>>(),
            "schema": artifact.schema_hash.is_some(),
            "client_version": artifact.client_version,
        });
        let mut content = serde_json::to_string_pretty(&manifest)?;
        content.push('\n');

        let path = source_root.join(GENERATED_DIR).join(MANIFEST_FILE);
        Ok(vec![atomic_write(&path, &content)?])
    }
}

pub(crate) fn atomic_write(path: &Path, content: &str) -> Result<WriteResult, DeployError> {
    let tmp = PathBuf::from(format!("{}.devpush.tmp", path.display()));
    let normalized = content.replace("\r\n", "\n");
    let digest = sha256_hex(normalized.as_bytes());

    if let Ok(existing) = std::fs::read(path) {
        if sha256_hex(&existing) == digest {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(&tmp, &normalized).map_err(|e| io_err(&tmp, e))?;

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}
