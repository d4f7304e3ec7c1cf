// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use wick_model::{MessageRecord, Role};

/// Ordered store of live conversation turns.
///
/// Append-only in normal operation; messages leave the store only through
/// the compression paths (replaced by a checkpoint or truncated) and the
/// clear/restore commands.  External callers get read-only slices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageStore {
    messages: Vec<MessageRecord>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: MessageRecord) {
        self.messages.push(msg);
    }

    pub fn view(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Sum of cached per-message token counts.
    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.token_count).sum()
    }

    pub fn ids(&self) -> HashSet<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    /// The current system prompt message, if one has been set.
    pub fn system_message(&self) -> Option<&MessageRecord> {
        self.messages.iter().find(|m| m.role == Role::System)
    }

    /// Install or replace the system prompt, keeping it at position 0.
    pub fn set_system(&mut self, msg: MessageRecord) {
        debug_assert_eq!(msg.role, Role::System);
        self.messages.retain(|m| m.role != Role::System);
        self.messages.insert(0, msg);
    }

    /// Drop everything except the system prompt.
    pub fn clear_keeping_system(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// Remove the messages with the given ids, preserving order of the
    /// rest.  Returns the removed records (the compression coordinator
    /// folds their ids into the checkpoint it creates).
    pub fn remove_ids(&mut self, ids: &HashSet<String>) -> Vec<MessageRecord> {
        let mut removed = Vec::new();
        self.messages.retain(|m| {
            if ids.contains(&m.id) {
                removed.push(m.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Replace the whole message list (snapshot restore).
    pub fn replace_all(&mut self, messages: Vec<MessageRecord>) {
        self.messages = messages;
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageRecord> {
        self.messages.iter()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
