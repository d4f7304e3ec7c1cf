// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wick_context::{CheckpointStore, MessageStore};
use wick_model::Goal;

/// Session counters and the optional user goal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Monotone compression epoch; incremented before every coordinator run.
    #[serde(default)]
    pub compression_count: u64,
    #[serde(default)]
    pub total_tokens_in: u64,
    #[serde(default)]
    pub total_tokens_out: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<Goal>,
}

/// Everything a snapshot needs to reproduce the conversation without
/// external references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: MessageStore,
    pub checkpoints: CheckpointStore,
    pub metadata: SessionMetadata,
}

/// One conversation bound to one model.  Swapping models never mutates a
/// session in place — the manager closes it and opens a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
    /// Set when the session is cleanly closed.  A persisted session
    /// without this marker did not shut down properly and is a candidate
    /// for startup recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub messages: MessageStore,
    pub checkpoints: CheckpointStore,
    pub metadata: SessionMetadata,
}

impl Session {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            model: model.into(),
            created_at: now,
            last_update_at: now,
            closed_at: None,
            messages: MessageStore::new(),
            checkpoints: CheckpointStore::new(),
            metadata: SessionMetadata::default(),
        }
    }

    /// Total live token load: messages plus checkpoint summaries.
    pub fn live_tokens(&self) -> usize {
        self.messages.total_tokens() + self.checkpoints.total_tokens()
    }

    pub fn touch(&mut self) {
        self.last_update_at = Utc::now();
    }

    pub fn close(&mut self) {
        self.closed_at = Some(Utc::now());
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Bump the compression epoch and return the new value.
    pub fn next_compression_epoch(&mut self) -> u64 {
        self.metadata.compression_count += 1;
        self.metadata.compression_count
    }

    /// `/clear`: drop live messages except the system prompt.  Checkpoints
    /// stay — they are the only durable memory of earlier turns — and the
    /// session id does not rotate.
    pub fn clear_messages(&mut self) {
        self.messages.clear_keeping_system();
        self.touch();
    }

    /// Self-contained copy for snapshotting.
    pub fn conversation_state(&self) -> ConversationState {
        ConversationState {
            messages: self.messages.clone(),
            checkpoints: self.checkpoints.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Wholesale restore from a snapshot's state.  The session id and
    /// model binding remain.
    pub fn restore(&mut self, state: ConversationState) {
        self.messages = state.messages;
        self.checkpoints = state.checkpoints;
        self.metadata = state.metadata;
        self.touch();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
