// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The twelve lifecycle events hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    SessionStart,
    SessionEnd,
    BeforeAgent,
    AfterAgent,
    BeforeModel,
    AfterModel,
    BeforeToolSelection,
    BeforeTool,
    AfterTool,
    PreCompress,
    PostCompress,
    Notification,
}

impl HookEvent {
    /// Blocking events: a `continue:false` reply (or a failure mapped to
    /// one) stops the lifecycle step being hooked.  `after_*`, `post_*`,
    /// and notifications are observational only.
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            HookEvent::BeforeAgent
                | HookEvent::BeforeModel
                | HookEvent::BeforeToolSelection
                | HookEvent::BeforeTool
                | HookEvent::PreCompress
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::SessionStart => "session_start",
            HookEvent::SessionEnd => "session_end",
            HookEvent::BeforeAgent => "before_agent",
            HookEvent::AfterAgent => "after_agent",
            HookEvent::BeforeModel => "before_model",
            HookEvent::AfterModel => "after_model",
            HookEvent::BeforeToolSelection => "before_tool_selection",
            HookEvent::BeforeTool => "before_tool",
            HookEvent::AfterTool => "after_tool",
            HookEvent::PreCompress => "pre_compress",
            HookEvent::PostCompress => "post_compress",
            HookEvent::Notification => "notification",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a hook definition came from.  Lower priority value wins name
/// conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookSource {
    Builtin,
    User,
    Workspace,
    Extension,
}

impl HookSource {
    pub fn priority(self) -> u8 {
        match self {
            HookSource::Builtin => 0,
            HookSource::User => 1,
            HookSource::Workspace => 2,
            HookSource::Extension => 3,
        }
    }
}

/// Trust state of a hook.  A hook executes only when its trust is not a
/// `*-pending` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    Builtin,
    User,
    WorkspacePending,
    DownloadedPending,
    Approved,
}

impl TrustLevel {
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            TrustLevel::WorkspacePending | TrustLevel::DownloadedPending
        )
    }
}

/// A hook definition as loaded from a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDefinition {
    pub id: String,
    pub name: String,
    /// Interpreter command; must be on the runner's whitelist.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub event_type: HookEvent,
    /// Optional regex filter against the file a tool event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_pattern: Option<String>,
    pub trust: TrustLevel,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub source: HookSource,
    /// Per-hook invocation ceiling per minute.  `None` means only the
    /// global limit applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_min: Option<u32>,
    /// Names of hooks that must complete before this one runs.  Hooks
    /// with no dependencies run in parallel.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Pass the parent environment through to the hook process.  Off by
    /// default: hooks inherit no secrets unless opted in.
    #[serde(default)]
    pub env_passthrough: bool,
}

fn default_enabled() -> bool {
    true
}

/// Wire reply: one JSON object on the hook's stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookReply {
    #[serde(rename = "continue")]
    pub continue_: bool,
    #[serde(
        rename = "systemMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Wire event: one JSON object written to the hook's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub event: String,
    pub data: serde_json::Value,
}

/// Per-execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    BlockedByTrust,
}

/// Record of a single hook invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookExecution {
    pub id: String,
    pub hook_id: String,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<HookReply>,
    /// Captured stderr, diagnostics only.
    #[serde(default)]
    pub stderr: String,
}

impl HookExecution {
    /// The effective continue decision for this execution, applying the
    /// failure policy: for blocking events a failed/timed-out/refused
    /// hook maps to `continue:false`; for observational events failures
    /// are logged and ignored.
    pub fn effective_continue(&self, blocking: bool) -> bool {
        match (&self.state, &self.reply) {
            (ExecutionState::Succeeded, Some(reply)) => reply.continue_,
            (ExecutionState::Succeeded, None) => true,
            _ => !blocking,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
