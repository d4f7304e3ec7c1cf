// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Hook trust model.
//!
//! Builtin hooks are always trusted.  User hooks are trusted by default
//! but re-verified against their recorded content hash — a changed user
//! hook drops back to pending until re-approved.  Workspace and
//! downloaded (extension) hooks require explicit approval before their
//! first run.  Approvals are keyed by content hash and persisted, so
//! approving a hook approves exactly that command line and nothing else.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use wick_config::HookSettings;

use crate::types::{HookDefinition, HookSource, TrustLevel};

/// Content hash identifying exactly what was approved: the interpreter,
/// the arguments, and the event the hook attaches to.
pub fn hook_hash(def: &HookDefinition) -> String {
    let mut hasher = Sha256::new();
    hasher.update(def.command.as_bytes());
    for arg in &def.args {
        hasher.update([0u8]);
        hasher.update(arg.as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(def.event_type.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrustFile {
    /// Approved content hashes.
    #[serde(default)]
    approved: HashSet<String>,
    /// Last-seen content hash per hook name (user-hook change detection).
    #[serde(default)]
    seen: HashMap<String, String>,
}

/// Persisted approval ledger, stored as `hook-approvals.json` under the
/// state root.
pub struct TrustStore {
    path: PathBuf,
    file: TrustFile,
}

impl TrustStore {
    pub fn open(state_root: impl Into<PathBuf>) -> Self {
        let path = state_root.into().join("hook-approvals.json");
        let file = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| match serde_json::from_str(&text) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed approval ledger; starting empty");
                    None
                }
            })
            .unwrap_or_default();
        Self { path, file }
    }

    /// Evaluate the effective trust level of a hook definition.
    pub fn evaluate(&self, def: &HookDefinition, settings: &HookSettings) -> TrustLevel {
        let hash = hook_hash(def);
        if self.file.approved.contains(&hash) {
            return TrustLevel::Approved;
        }
        match def.source {
            HookSource::Builtin => TrustLevel::Builtin,
            HookSource::User => match self.file.seen.get(&def.name) {
                // First sighting, or unchanged since last run: trusted.
                None => TrustLevel::User,
                Some(seen) if *seen == hash => TrustLevel::User,
                // The hook changed underneath the user: back to pending.
                Some(_) => TrustLevel::DownloadedPending,
            },
            HookSource::Workspace => {
                if settings.trust_workspace {
                    TrustLevel::User
                } else {
                    TrustLevel::WorkspacePending
                }
            }
            HookSource::Extension => TrustLevel::DownloadedPending,
        }
    }

    /// Record the current content hash of a user hook so future changes
    /// are detected.  Call after a hook runs under `User` trust.
    pub fn record_seen(&mut self, def: &HookDefinition) -> anyhow::Result<()> {
        self.file.seen.insert(def.name.clone(), hook_hash(def));
        self.save()
    }

    /// Persist an explicit approval of this exact hook content.
    pub fn approve(&mut self, def: &HookDefinition) -> anyhow::Result<()> {
        self.file.approved.insert(hook_hash(def));
        self.file.seen.insert(def.name.clone(), hook_hash(def));
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.file)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HookEvent;

    fn def(name: &str, source: HookSource, args: &[&str]) -> HookDefinition {
        HookDefinition {
            id: name.into(),
            name: name.into(),
            command: "python3".into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            event_type: HookEvent::BeforeTool,
            file_pattern: None,
            trust: TrustLevel::User,
            enabled: true,
            source,
            rate_limit_per_min: None,
            depends_on: vec![],
            env_passthrough: false,
        }
    }

    fn settings() -> HookSettings {
        HookSettings::default()
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = def("h", HookSource::User, &["check.py"]);
        let b = def("h", HookSource::User, &["check.py"]);
        let c = def("h", HookSource::User, &["check.py", "--strict"]);
        assert_eq!(hook_hash(&a), hook_hash(&b));
        assert_ne!(hook_hash(&a), hook_hash(&c));
    }

    #[test]
    fn builtin_is_always_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path());
        let d = def("b", HookSource::Builtin, &[]);
        assert_eq!(store.evaluate(&d, &settings()), TrustLevel::Builtin);
    }

    #[test]
    fn user_hook_trusted_until_it_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TrustStore::open(dir.path());
        let original = def("mine", HookSource::User, &["v1.py"]);
        assert_eq!(store.evaluate(&original, &settings()), TrustLevel::User);
        store.record_seen(&original).unwrap();
        assert_eq!(store.evaluate(&original, &settings()), TrustLevel::User);

        let changed = def("mine", HookSource::User, &["v2.py"]);
        assert_eq!(
            store.evaluate(&changed, &settings()),
            TrustLevel::DownloadedPending,
            "a changed user hook needs re-approval"
        );
    }

    #[test]
    fn workspace_pending_unless_setting_or_approval() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TrustStore::open(dir.path());
        let d = def("ws", HookSource::Workspace, &["check.py"]);

        assert_eq!(store.evaluate(&d, &settings()), TrustLevel::WorkspacePending);

        let trusting = HookSettings {
            trust_workspace: true,
            ..settings()
        };
        assert_eq!(store.evaluate(&d, &trusting), TrustLevel::User);

        store.approve(&d).unwrap();
        assert_eq!(store.evaluate(&d, &settings()), TrustLevel::Approved);
    }

    #[test]
    fn extension_pending_until_approved() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TrustStore::open(dir.path());
        let d = def("ext", HookSource::Extension, &["plugin.py"]);
        assert_eq!(store.evaluate(&d, &settings()), TrustLevel::DownloadedPending);
        store.approve(&d).unwrap();
        assert_eq!(store.evaluate(&d, &settings()), TrustLevel::Approved);
    }

    #[test]
    fn approvals_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let d = def("ext", HookSource::Extension, &["plugin.py"]);
        {
            let mut store = TrustStore::open(dir.path());
            store.approve(&d).unwrap();
        }
        let store = TrustStore::open(dir.path());
        assert_eq!(store.evaluate(&d, &settings()), TrustLevel::Approved);
    }

    #[test]
    fn approval_is_per_content_not_per_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TrustStore::open(dir.path());
        let v1 = def("ext", HookSource::Extension, &["v1.py"]);
        store.approve(&v1).unwrap();

        let v2 = def("ext", HookSource::Extension, &["v2.py"]);
        assert_eq!(
            store.evaluate(&v2, &settings()),
            TrustLevel::DownloadedPending,
            "approving v1 must not approve different content"
        );
    }
}
