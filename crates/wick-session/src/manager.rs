// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session lifecycle: one session per model, rotation on swap, startup
//! recovery, and disk persistence under `sessions/<id>.json`.

use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::session::Session;
use crate::snapshot::{SnapshotPurpose, SnapshotStore, atomic_write_json};

pub struct SessionManager {
    sessions_dir: PathBuf,
    current: Session,
}

/// What happened while opening the initial session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Fresh,
    /// A prior session for the same model had no clean `closed_at`; its
    /// most recent recovery snapshot (if any) was restored.
    Recovered { session_id: String, from_snapshot: Option<String> },
}

impl SessionManager {
    /// Open the manager against the state root, creating or recovering the
    /// initial session for `model`.
    ///
    /// Recovery rule: if the most recent persisted session lacks a clean
    /// `closed_at` and is bound to the same model, it is resumed and its
    /// latest recovery snapshot (when one exists) is restored over the
    /// persisted state.  Unclosed sessions for *other* models are closed
    /// on the spot — swapping models always rotates.
    pub fn open(
        root: impl Into<PathBuf>,
        model: &str,
        snapshots: &SnapshotStore,
    ) -> anyhow::Result<(Self, OpenOutcome)> {
        let sessions_dir = root.into().join("sessions");
        fs::create_dir_all(&sessions_dir)?;

        let mut outcome = OpenOutcome::Fresh;
        let current = match Self::latest_unclosed(&sessions_dir)? {
            Some(mut session) if session.model == model => {
                let from_snapshot = match snapshots.latest(&session.id, SnapshotPurpose::Recovery) {
                    Some(snap) => {
                        session.restore(snap.conversation_state.clone());
                        Some(snap.id)
                    }
                    None => None,
                };
                info!(session = %session.id, "recovered unclosed session");
                outcome = OpenOutcome::Recovered {
                    session_id: session.id.clone(),
                    from_snapshot,
                };
                session
            }
            Some(mut stale) => {
                warn!(
                    session = %stale.id,
                    model = %stale.model,
                    "closing stale unclosed session for a different model"
                );
                stale.close();
                Self::persist_to(&sessions_dir, &stale)?;
                Session::new(Self::next_session_id(&sessions_dir)?, model)
            }
            None => Session::new(Self::next_session_id(&sessions_dir)?, model),
        };

        let manager = Self {
            sessions_dir,
            current,
        };
        manager.persist()?;
        Ok((manager, outcome))
    }

    pub fn current(&self) -> &Session {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Session {
        &mut self.current
    }

    /// Close the current session and open a fresh one bound to `model`.
    /// The old session's snapshots and checkpoints stay on disk but are no
    /// longer referenced.
    pub fn swap_model(&mut self, model: &str) -> anyhow::Result<&Session> {
        self.current.close();
        self.persist()?;
        info!(closed = %self.current.id, model, "model swap closes session");
        self.current = Session::new(Self::next_session_id(&self.sessions_dir)?, model);
        self.persist()?;
        Ok(&self.current)
    }

    /// `/new`: rotate the session id under the same model.  Live messages
    /// belong to the UI layer across this boundary; the runtime side of
    /// the new session starts empty.
    pub fn rotate(&mut self) -> anyhow::Result<&Session> {
        let model = self.current.model.clone();
        self.swap_model(&model)
    }

    /// Persist the current session atomically.
    pub fn persist(&self) -> anyhow::Result<()> {
        Self::persist_to(&self.sessions_dir, &self.current)
    }

    /// Mark the current session cleanly closed and persist it.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        self.current.close();
        self.persist()
    }

    fn persist_to(dir: &std::path::Path, session: &Session) -> anyhow::Result<()> {
        let path = dir.join(format!("{}.json", session.id));
        atomic_write_json(&path, session)
    }

    /// Highest existing ordinal + 1, formatted `session-<n>`.
    fn next_session_id(dir: &std::path::Path) -> anyhow::Result<String> {
        let mut max = 0u64;
        if let Ok(read) = fs::read_dir(dir) {
            for entry in read.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(n) = name
                    .strip_prefix("session-")
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .and_then(|n| n.parse::<u64>().ok())
                {
                    max = max.max(n);
                }
            }
        }
        Ok(format!("session-{}", max + 1))
    }

    /// The most recently updated persisted session without a `closed_at`.
    fn latest_unclosed(dir: &std::path::Path) -> anyhow::Result<Option<Session>> {
        let Ok(read) = fs::read_dir(dir) else {
            return Ok(None);
        };
        let mut newest: Option<Session> = None;
        for entry in read.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let session: Session = match fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|text| serde_json::from_str(&text).map_err(anyhow::Error::from))
            {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                    continue;
                }
            };
            if session.is_closed() {
                continue;
            }
            let newer = newest
                .as_ref()
                .map(|best| session.last_update_at > best.last_update_at)
                .unwrap_or(true);
            if newer {
                newest = Some(session);
            }
        }
        Ok(newest)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
