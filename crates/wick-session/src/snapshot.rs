// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Atomic session snapshots.
//!
//! Layout: `context-snapshots/<session_id>/<purpose>-<timestamp_ms>-<nonce>.json`.
//! Writes go through a temp file, fsync, and rename, so a reader only
//! ever sees complete documents; a crash mid-write leaves a `.tmp` file
//! that is ignored (and cleaned up) on the next pass.  Writes are
//! serialized per store; reads are unordered but consistent with the last
//! completed rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use wick_config::SnapshotSettings;

use crate::session::{ConversationState, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotPurpose {
    Recovery,
    Rollback,
    Emergency,
}

impl SnapshotPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotPurpose::Recovery => "recovery",
            SnapshotPurpose::Rollback => "rollback",
            SnapshotPurpose::Emergency => "emergency",
        }
    }

    fn from_file_name(name: &str) -> Option<Self> {
        let purpose = name.split('-').next()?;
        match purpose {
            "recovery" => Some(SnapshotPurpose::Recovery),
            "rollback" => Some(SnapshotPurpose::Rollback),
            "emergency" => Some(SnapshotPurpose::Emergency),
            _ => None,
        }
    }
}

impl std::fmt::Display for SnapshotPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A self-contained copy of a session's conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The file stem, e.g. `recovery-1722500000123-9f3a`.  What users see
    /// in recovery messages and pass to `/context restore`.
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub purpose: SnapshotPurpose,
    pub conversation_state: ConversationState,
}

impl Snapshot {
    pub fn of(session: &Session, purpose: SnapshotPurpose) -> Self {
        let now = Utc::now();
        let hex = Uuid::new_v4().simple().to_string();
        let nonce = &hex[..4];
        Self {
            id: format!("{purpose}-{}-{nonce}", now.timestamp_millis()),
            session_id: session.id.clone(),
            timestamp: now,
            purpose,
            conversation_state: session.conversation_state(),
        }
    }
}

/// Disk-backed snapshot storage for all sessions.
pub struct SnapshotStore {
    root: PathBuf,
    /// One write in flight per store; readers do not take this lock.
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// `root` is the state root; snapshots live in `context-snapshots/`
    /// beneath it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join("context-snapshots"),
            write_lock: Mutex::new(()),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn path_for(&self, session_id: &str, id: &str) -> PathBuf {
        self.session_dir(session_id).join(format!("{id}.json"))
    }

    /// Atomically persist a snapshot and prune the session's directory.
    pub async fn save(
        &self,
        snapshot: &Snapshot,
        settings: &SnapshotSettings,
    ) -> anyhow::Result<PathBuf> {
        let _guard = self.write_lock.lock().await;
        let dir = self.session_dir(&snapshot.session_id);
        fs::create_dir_all(&dir)?;
        let path = self.path_for(&snapshot.session_id, &snapshot.id);
        atomic_write_json(&path, snapshot)?;
        debug!(id = %snapshot.id, path = %path.display(), "snapshot written");
        self.prune(&snapshot.session_id, settings)?;
        Ok(path)
    }

    /// Load a snapshot by id.  Partial or corrupt files are an error here
    /// (the caller asked for this one specifically).
    pub fn load(&self, session_id: &str, id: &str) -> anyhow::Result<Snapshot> {
        let path = self.path_for(session_id, id);
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The most recent readable snapshot with the given purpose.
    pub fn latest(&self, session_id: &str, purpose: SnapshotPurpose) -> Option<Snapshot> {
        let mut entries = self.list(session_id);
        entries.retain(|(_, p, _)| *p == purpose);
        entries.sort_by_key(|(_, _, ts)| *ts);
        let (id, _, _) = entries.pop()?;
        match self.load(session_id, &id) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(id, error = %e, "skipping unreadable snapshot");
                None
            }
        }
    }

    /// All snapshot ids for a session with purpose and timestamp, oldest
    /// first.  Unreadable names and leftover temp files are skipped.
    pub fn list(&self, session_id: &str) -> Vec<(String, SnapshotPurpose, i64)> {
        let dir = self.session_dir(session_id);
        let Ok(read) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Some(purpose) = SnapshotPurpose::from_file_name(stem) else {
                continue;
            };
            let Some(ts) = stem.split('-').nth(1).and_then(|t| t.parse::<i64>().ok()) else {
                continue;
            };
            out.push((stem.to_string(), purpose, ts));
        }
        out.sort_by_key(|(_, _, ts)| *ts);
        out
    }

    /// Enforce the per-purpose count cap and the age horizon, and sweep
    /// any leftover temp files.
    pub fn prune(&self, session_id: &str, settings: &SnapshotSettings) -> anyhow::Result<()> {
        let dir = self.session_dir(session_id);
        if let Ok(read) = fs::read_dir(&dir) {
            for entry in read.flatten() {
                if entry.file_name().to_string_lossy().ends_with(".tmp") {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        let now_ms = Utc::now().timestamp_millis();
        let horizon = settings.recovery_prune_after_ms as i64;
        for purpose in [
            SnapshotPurpose::Recovery,
            SnapshotPurpose::Rollback,
            SnapshotPurpose::Emergency,
        ] {
            let mut entries = self.list(session_id);
            entries.retain(|(_, p, _)| *p == purpose);
            // Oldest first; keep the newest `max_per_purpose`.
            let excess = entries.len().saturating_sub(settings.max_per_purpose);
            for (id, _, _) in entries.iter().take(excess) {
                debug!(id, "pruning snapshot (count cap)");
                let _ = fs::remove_file(self.path_for(session_id, id));
            }
            for (id, _, ts) in entries.iter().skip(excess) {
                if now_ms - ts > horizon {
                    debug!(id, "pruning snapshot (age cap)");
                    let _ = fs::remove_file(self.path_for(session_id, id));
                }
            }
        }
        Ok(())
    }
}

/// Serialize to a temp file in the target directory, fsync, then rename
/// over the final name.  Readers never observe a partial document.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        let text = serde_json::to_string_pretty(value)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
