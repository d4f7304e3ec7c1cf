// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Mode manager: explicit transitions with handover records.
//!
//! Auto-switching exists but is off by default, and no transition of any
//! kind happens while a provider stream is active — the mode observed by
//! the first stream event is the mode at the last one.

use tracing::info;

use wick_config::{Mode, SnapshotSettings};
use wick_model::MessageRecord;
use wick_session::{ModeTransitionSnapshot, TransitionStore};

#[derive(Debug, thiserror::Error)]
pub enum ModeSwitchError {
    #[error("cannot switch modes while a model stream is active")]
    StreamActive,
}

pub struct ModeManager {
    current: Mode,
    auto_switch: bool,
    stream_active: bool,
    store: TransitionStore,
}

impl ModeManager {
    pub fn new(initial: Mode, auto_switch: bool, state_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            current: initial,
            auto_switch,
            stream_active: false,
            store: TransitionStore::new(state_root),
        }
    }

    pub fn current(&self) -> Mode {
        self.current
    }

    pub fn auto_switch_enabled(&self) -> bool {
        self.auto_switch
    }

    /// Mark the start/end of a provider stream.  Switches are refused in
    /// between.
    pub fn begin_stream(&mut self) {
        self.stream_active = true;
    }

    pub fn end_stream(&mut self) {
        self.stream_active = false;
    }

    /// Explicit transition.  Records a handover snapshot (bounded recent
    /// context, the outgoing mode's tool set, optional findings) before
    /// the overlay changes.  Switching to the current mode is a no-op.
    pub fn switch(
        &mut self,
        to: Mode,
        session_id: &str,
        recent_messages: &[MessageRecord],
        active_tools: Vec<String>,
        findings: Option<String>,
        settings: &SnapshotSettings,
    ) -> Result<bool, ModeSwitchError> {
        if self.stream_active {
            return Err(ModeSwitchError::StreamActive);
        }
        if to == self.current {
            return Ok(false);
        }

        let snapshot = ModeTransitionSnapshot::capture(
            self.current,
            to,
            recent_messages,
            active_tools,
            findings,
        );
        if let Err(e) = self.store.record(session_id, &snapshot, settings) {
            // The transition itself must not fail because the record could
            // not be written.
            tracing::warn!(error = %e, "failed to persist mode transition");
        }
        info!(from = %self.current, to = %to, "mode switched");
        self.current = to;
        Ok(true)
    }

    /// Persisted mode history for a session, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<ModeTransitionSnapshot> {
        self.store.history(session_id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
