// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session lifecycle, snapshot persistence, and mode-transition records.

mod manager;
mod session;
mod snapshot;
mod transition;

pub use manager::{OpenOutcome, SessionManager};
pub use session::{ConversationState, Session, SessionMetadata};
pub use snapshot::{atomic_write_json, Snapshot, SnapshotPurpose, SnapshotStore};
pub use transition::{ModeTransitionSnapshot, TransitionStore, TRANSITION_CONTEXT_MESSAGES};
