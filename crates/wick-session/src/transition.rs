// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Mode-transition records.
//!
//! Every explicit mode switch captures a bounded slice of recent context
//! so the new mode (and a later restore) can see what the previous mode
//! was doing.  Layout:
//! `mode-transition-snapshots/<session_id>/transition-<timestamp_ms>-<nonce>.json`.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use wick_config::{Mode, SnapshotSettings};
use wick_model::MessageRecord;

use crate::snapshot::atomic_write_json;

/// Number of trailing messages captured per transition.
pub const TRANSITION_CONTEXT_MESSAGES: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTransitionSnapshot {
    pub from: Mode,
    pub to: Mode,
    pub timestamp: DateTime<Utc>,
    /// Bounded recent context (last [`TRANSITION_CONTEXT_MESSAGES`] turns).
    pub recent_messages: Vec<MessageRecord>,
    /// Tool names that were exposed in the outgoing mode.
    pub active_tools: Vec<String>,
    /// Free-form findings handed over by the outgoing mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
}

impl ModeTransitionSnapshot {
    pub fn capture(
        from: Mode,
        to: Mode,
        recent: &[MessageRecord],
        active_tools: Vec<String>,
        findings: Option<String>,
    ) -> Self {
        let start = recent.len().saturating_sub(TRANSITION_CONTEXT_MESSAGES);
        Self {
            from,
            to,
            timestamp: Utc::now(),
            recent_messages: recent[start..].to_vec(),
            active_tools,
            findings,
        }
    }
}

/// Disk store for transition records, pruned by count and age.
pub struct TransitionStore {
    root: PathBuf,
}

impl TransitionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join("mode-transition-snapshots"),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub fn record(
        &self,
        session_id: &str,
        snapshot: &ModeTransitionSnapshot,
        settings: &SnapshotSettings,
    ) -> anyhow::Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        let hex = Uuid::new_v4().simple().to_string();
        let nonce = &hex[..4];
        let path = dir.join(format!(
            "transition-{}-{nonce}.json",
            snapshot.timestamp.timestamp_millis()
        ));
        atomic_write_json(&path, snapshot)?;
        debug!(session_id, from = %snapshot.from, to = %snapshot.to, "transition recorded");
        self.prune(session_id, settings)?;
        Ok(path)
    }

    /// Mode history for a session, oldest first.  Unreadable files are
    /// skipped.
    pub fn history(&self, session_id: &str) -> Vec<ModeTransitionSnapshot> {
        let mut entries: Vec<(i64, ModeTransitionSnapshot)> = Vec::new();
        let Ok(read) = fs::read_dir(self.session_dir(session_id)) else {
            return Vec::new();
        };
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(ts) = name
                .strip_prefix("transition-")
                .and_then(|rest| rest.split('-').next())
                .and_then(|t| t.parse::<i64>().ok())
            else {
                continue;
            };
            match fs::read_to_string(entry.path())
                .map_err(anyhow::Error::from)
                .and_then(|t| serde_json::from_str(&t).map_err(anyhow::Error::from))
            {
                Ok(snapshot) => entries.push((ts, snapshot)),
                Err(e) => warn!(file = %name, error = %e, "skipping unreadable transition record"),
            }
        }
        entries.sort_by_key(|(ts, _)| *ts);
        entries.into_iter().map(|(_, s)| s).collect()
    }

    fn prune(&self, session_id: &str, settings: &SnapshotSettings) -> anyhow::Result<()> {
        let dir = self.session_dir(session_id);
        let Ok(read) = fs::read_dir(&dir) else {
            return Ok(());
        };
        let mut entries: Vec<(i64, PathBuf)> = read
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let ts = name
                    .strip_prefix("transition-")?
                    .split('-')
                    .next()?
                    .parse::<i64>()
                    .ok()?;
                Some((ts, e.path()))
            })
            .collect();
        entries.sort_by_key(|(ts, _)| *ts);

        let now_ms = Utc::now().timestamp_millis();
        let horizon = settings.transition_prune_after_ms as i64;
        let excess = entries.len().saturating_sub(settings.max_per_purpose);
        for (i, (ts, path)) in entries.iter().enumerate() {
            if i < excess || now_ms - ts > horizon {
                debug!(path = %path.display(), "pruning transition record");
                let _ = fs::remove_file(path);
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
