//! Local artifact vs. live deployment.

use serde::Serialize;
use similar::TextDiff;

use devpush_core::{Artifact, RemoteArtifact};

/// Client and server versions seen during one push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct VersionDelta {
    pub client: String,
    pub server: String,
}

impl VersionDelta {
    pub fn new(client: &str, server: &str) -> Self {
        Self {
            client: client.to_string(),
            server: server.to_string(),
        }
    }

    pub fn differs(&self) -> bool {
        self.client != self.server
    }

    /// Compatible unless both parse and their major (or, pre-1.0, minor)
    /// components disagree.
    pub fn is_compatible(&self) -> bool {
        match (compat_key(&self.client), compat_key(&self.server)) {
            (Some(client), Some(server)) => client == server,
            _ => true,
        }
    }
}

fn compat_key(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim_start_matches('v').split('.');
    let major: u64 = parts.next()?.parse().ok()?;
    let minor: u64 = parts.next()?.parse().ok()?;
    Some(if major == 0 { (0, minor) } else { (major, 0) })
}

/// What a push would change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct DiffResult {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub auth_changed: bool,
    /// Unified diff of the pretty-printed auth config, remote → local.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_diff: Option<String>,
    pub schema_changed: bool,
    /// A schema change on the deployment was still validating when we looked.
    pub schema_pending: bool,
    pub versions: VersionDelta,
}

impl DiffResult {
    pub fn compute(local: &Artifact, remote: &RemoteArtifact, schema_pending: bool) -> Self {
        let mut diff = DiffResult {
            schema_pending,
            versions: VersionDelta::new(&local.client_version, &remote.server_version),
            ..DiffResult::default()
        };

        for (key, module) in &local.modules {
            match remote.modules.get(key) {
                None => diff.added.push(key.clone()),
                Some(hash) if *hash != module.sha256 => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.removed = remote
            .modules
            .keys()
            .filter(|key| !local.modules.contains_key(*key))
            .cloned()
            .collect();

        if local.auth != remote.auth {
            diff.auth_changed = true;
            let old = pretty(remote.auth.as_ref());
            let new = pretty(local.auth.as_ref());
            diff.auth_diff = Some(
                TextDiff::from_lines(&old, &new)
                    .unified_diff()
                    .header("remote/auth.config.json", "local/auth.config.json")
                    .to_string(),
            );
        }
        diff.schema_changed = local.schema_hash != remote.schema_hash;
        diff
    }

    /// No module, auth, or schema difference. Version drift alone is not a change.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.auth_changed
            && !self.schema_changed
    }

    pub fn requires_push(&self) -> bool {
        !self.is_empty() || self.schema_pending
    }

    /// One-line human summary, e.g. `2 added, 1 changed, auth config`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for (count, label) in [
            (self.added.len(), "added"),
            (self.removed.len(), "removed"),
            (self.changed.len(), "changed"),
        ] {
            if count > 0 {
                parts.push(format!("{count} {label}"));
            }
        }
        if self.auth_changed {
            parts.push("auth config".to_string());
        }
        if self.schema_changed {
            parts.push("schema".to_string());
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn pretty(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(value) => {
            let mut s = serde_json::to_string_pretty(value).unwrap_or_default();
            s.push('\n');
            s
        }
        None => String::new(),
    }
}
