// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use wick_config::Mode;
use wick_context::{CompressionAction, PressureLevel};
use wick_model::ReasoningBlock;

use crate::error::FailureEvent;

/// Events emitted by the agent during a turn.  The UI layer subscribes
/// and decides presentation; the runtime never prints.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A visible text chunk streamed from the model.
    TextDelta(String),
    /// The complete visible text of one assistant response.
    TextComplete(String),
    /// A reasoning chunk (structured event or inside a think region).
    ReasoningDelta(String),
    /// A finished reasoning trace.  The UI should render it collapsed.
    ReasoningComplete(ReasoningBlock),
    /// The model requested a tool call.
    ToolCallStarted {
        call_id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolCallFinished {
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// The coordinator ran; statistics for the UI.
    ContextCompacted {
        action: CompressionAction,
        tokens_before: usize,
        tokens_after: usize,
    },
    /// Fill ratio entered the warning band (no compression yet).
    ContextWarning { percent_of_provider: f32 },
    /// The memory guard changed grade.
    MemoryPressure(PressureLevel),
    /// A snapshot landed on disk.
    SnapshotWritten { id: String, purpose: String },
    /// Emergency rollover: live messages were reduced to the system
    /// prompt; the snapshot id restores the prior state.
    SessionRolledOver { snapshot_id: Option<String> },
    /// Current token accounting after a turn or compression.
    TokenUsage {
        current: usize,
        user_size: usize,
        provider_size: usize,
    },
    ModeChanged(Mode),
    /// A runtime-generated notice for the chat log (model swaps, hook
    /// system messages, recovery instructions).
    SystemMessage(String),
    /// The turn finished normally.
    TurnComplete,
    /// The turn was cancelled; any streamed text was kept.
    Aborted { partial_text: String },
    /// A failure, one structured event per occurrence.
    Failure(FailureEvent),
}
