// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::estimator::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tool invocation recorded on an assistant message.
///
/// `result` and `error` are filled in after execution; exactly one of them
/// is set for an executed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            result: None,
            error: None,
        }
    }
}

/// A captured reasoning trace attached to an assistant message.
///
/// Produced either from structured reasoning events or from inline
/// `<think>…</think>` regions.  `complete` is false when the stream ended
/// (or was cancelled) before the reasoning region closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningBlock {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub complete: bool,
}

/// One turn in the conversation history.
///
/// Token counts are computed once at construction and cached; compression
/// and budget math sum the cached values instead of re-scanning content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningBlock>,
    /// For `Role::Tool` messages: the id of the tool call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub token_count: usize,
}

impl MessageRecord {
    fn build(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            id: format!("msg-{}", Uuid::new_v4()),
            role,
            content,
            tool_calls: Vec::new(),
            reasoning: None,
            tool_call_id: None,
            timestamp: Utc::now(),
            token_count,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::build(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::build(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::build(Role::Assistant, content)
    }

    /// An assistant message carrying tool calls (and possibly leading text).
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Self {
        let mut msg = Self::build(Role::Assistant, content);
        for tc in &tool_calls {
            msg.token_count += estimate_tokens(&tc.name) + estimate_tokens(&tc.args.to_string());
        }
        msg.tool_calls = tool_calls;
        msg
    }

    /// A tool-result message answering the given call id.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::build(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    /// Attach a reasoning block, folding its token estimate into the cache.
    pub fn with_reasoning(mut self, block: ReasoningBlock) -> Self {
        if let Some(n) = block.token_count {
            self.token_count += n;
        }
        self.reasoning = Some(block);
        self
    }
}

/// Optional user-intent record attached to a session; biases summarization
/// prompts toward what the user is actually trying to accomplish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub milestones: Vec<String>,
}

/// A tool schema exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Sampling and sizing options forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Hint for backends that load the context window per request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_hint: Option<usize>,
}

/// Request sent to a provider adapter.
///
/// Cancellation is not part of the request: callers `select!` the returned
/// stream against their turn-level cancel channel.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<MessageRecord>,
    pub tools: Vec<ToolSchema>,
    pub options: ChatOptions,
}

impl ChatRequest {
    /// Estimated prompt tokens: cached message counts plus the system prompt
    /// and a rough tool-schema overhead.
    pub fn estimated_tokens(&self) -> usize {
        let messages: usize = self.messages.iter().map(|m| m.token_count).sum();
        let schemas: usize = self
            .tools
            .iter()
            .map(|t| {
                estimate_tokens(&t.name)
                    + estimate_tokens(&t.description)
                    + estimate_tokens(&t.parameters.to_string())
            })
            .sum();
        messages + estimate_tokens(&self.system) + schemas
    }
}

/// Why a provider stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Cancelled,
}

/// A single streamed event from a provider adapter.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A text delta.
    Text(String),
    /// A structured reasoning delta (reasoning-capable backends only).
    Reasoning(String),
    /// The model requests a tool invocation.
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    /// The stream finished.
    Finish(FinishReason),
    /// The backend reported an error mid-stream.
    Error { code: String, message: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
