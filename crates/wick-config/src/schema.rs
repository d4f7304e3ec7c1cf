// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

/// Top-level runtime settings, persisted as `settings.json` in the state
/// root.  Every field has a serde default so a partial (or missing) file
/// yields a usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(default)]
    pub compression: CompressionSettings,
    #[serde(default)]
    pub snapshots: SnapshotSettings,
    #[serde(default)]
    pub hooks: HookSettings,
    #[serde(default)]
    pub mode: ModeSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

// ─── Context ──────────────────────────────────────────────────────────────────

/// The user-facing context budget: either an explicit token count or
/// `"auto"`, which delegates to the size calculator (VRAM-advised when
/// `auto_size` is enabled, minimum profile tier otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "ContextTargetRepr", into = "ContextTargetRepr")]
pub enum ContextTarget {
    #[default]
    Auto,
    Tokens(usize),
}

/// Wire form of [`ContextTarget`]: a bare number or the string `"auto"`.
/// Any unrecognised string falls back to `Auto` (the safe default).
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ContextTargetRepr {
    Tokens(usize),
    Text(String),
}

impl From<ContextTargetRepr> for ContextTarget {
    fn from(repr: ContextTargetRepr) -> Self {
        match repr {
            ContextTargetRepr::Tokens(n) => ContextTarget::Tokens(n),
            ContextTargetRepr::Text(_) => ContextTarget::Auto,
        }
    }
}

impl From<ContextTarget> for ContextTargetRepr {
    fn from(t: ContextTarget) -> Self {
        match t {
            ContextTarget::Auto => ContextTargetRepr::Text("auto".into()),
            ContextTarget::Tokens(n) => ContextTargetRepr::Tokens(n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Initial user-facing budget; `auto` delegates to the calculator.
    #[serde(default)]
    pub target_size: ContextTarget,
    /// Enable VRAM-advised sizing on startup and model swap.
    #[serde(default)]
    pub auto_size: bool,
    /// Safety margin subtracted from free VRAM during auto-sizing (MiB).
    #[serde(default = "default_vram_buffer_mib")]
    pub vram_buffer_mib: u64,
    /// VRAM poll cadence for the background monitor (milliseconds).
    #[serde(default = "default_vram_poll_interval_ms")]
    pub vram_poll_interval_ms: u64,
}

fn default_vram_buffer_mib() -> u64 {
    512
}
fn default_vram_poll_interval_ms() -> u64 {
    5000
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            target_size: ContextTarget::Auto,
            auto_size: false,
            vram_buffer_mib: default_vram_buffer_mib(),
            vram_poll_interval_ms: default_vram_poll_interval_ms(),
        }
    }
}

// ─── Compression ──────────────────────────────────────────────────────────────

/// How the coordinator reclaims context space once the threshold is hit.
///
/// `Hybrid` (default) truncates the very oldest messages, summarises the
/// middle window, and keeps the recent tail verbatim.  `Summarize` sends
/// the whole compressible window to the model; `Truncate` never makes a
/// model call and simply drops the oldest messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    Truncate,
    Summarize,
    #[default]
    Hybrid,
}

impl std::fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionStrategy::Truncate => write!(f, "truncate"),
            CompressionStrategy::Summarize => write!(f, "summarize"),
            CompressionStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Master switch.  When off, only deterministic truncation is available
    /// as an emergency measure.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Provider-pool fill ratio triggering normal compression (0.0–1.0).
    #[serde(default = "default_compression_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub strategy: CompressionStrategy,
    /// Lower bound (tokens) on the live tail preserved verbatim.
    #[serde(default = "default_preserve_recent_tokens")]
    pub preserve_recent_tokens: usize,
    /// How long user input stays blocked while a summarization call is in
    /// flight before the block is released regardless (milliseconds).
    #[serde(default = "default_summarize_block_ms")]
    pub summarize_block_ms: u64,
}

fn default_compression_threshold() -> f32 {
    0.80
}
fn default_preserve_recent_tokens() -> usize {
    4096
}
fn default_summarize_block_ms() -> u64 {
    30_000
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_compression_threshold(),
            strategy: CompressionStrategy::Hybrid,
            preserve_recent_tokens: default_preserve_recent_tokens(),
            summarize_block_ms: default_summarize_block_ms(),
        }
    }
}

// ─── Snapshots ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    /// Pruning cap: at most this many snapshots per purpose per session.
    #[serde(default = "default_max_per_purpose")]
    pub max_per_purpose: usize,
    /// Age cap for mode-transition snapshots (milliseconds).
    #[serde(default = "default_transition_prune_after_ms")]
    pub transition_prune_after_ms: u64,
    /// Age cap for recovery/rollback/emergency snapshots (milliseconds).
    #[serde(default = "default_recovery_prune_after_ms")]
    pub recovery_prune_after_ms: u64,
}

fn default_max_per_purpose() -> usize {
    5
}
fn default_transition_prune_after_ms() -> u64 {
    2 * 60 * 60 * 1000
}
fn default_recovery_prune_after_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            max_per_purpose: default_max_per_purpose(),
            transition_prune_after_ms: default_transition_prune_after_ms(),
            recovery_prune_after_ms: default_recovery_prune_after_ms(),
        }
    }
}

// ─── Hooks ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Default per-invocation exec timeout (milliseconds).
    #[serde(default = "default_hook_timeout_ms")]
    pub timeout_ms: u64,
    /// Skip the approval gate for workspace-sourced hooks.
    #[serde(default)]
    pub trust_workspace: bool,
    /// Hard cap on a hook's stdout reply (bytes).
    #[serde(default = "default_reply_cap_bytes")]
    pub reply_cap_bytes: usize,
    /// Grace period between SIGTERM and SIGKILL on timeout (milliseconds).
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Global ceiling on hook invocations across all hooks, per minute.
    #[serde(default = "default_global_rate_limit_per_min")]
    pub global_rate_limit_per_min: u32,
}

fn default_hook_timeout_ms() -> u64 {
    5000
}
fn default_reply_cap_bytes() -> usize {
    1024 * 1024
}
fn default_kill_grace_ms() -> u64 {
    1000
}
fn default_global_rate_limit_per_min() -> u32 {
    60
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_hook_timeout_ms(),
            trust_workspace: false,
            reply_cap_bytes: default_reply_cap_bytes(),
            kill_grace_ms: default_kill_grace_ms(),
            global_rate_limit_per_min: default_global_rate_limit_per_min(),
        }
    }
}

// ─── Modes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeSettings {
    /// Enable proactive mode switching.  Off by default; even when on,
    /// switches never happen while a provider stream is active.
    #[serde(default)]
    pub auto_switch: bool,
}

/// Discrete operational modes.  Each contributes an overlay to the system
/// prompt and filters the tool set exposed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// General conversation and task execution
    Assistant,
    /// Fault isolation: hypothesis-driven, evidence before edits
    Debugger,
    /// System design: structure, interfaces, trade-offs
    Architect,
    /// Code review: findings with severity, no rewrites
    Reviewer,
    /// Teaching: explanations first, minimal prescriptions
    Tutor,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Assistant => write!(f, "assistant"),
            Mode::Debugger => write!(f, "debugger"),
            Mode::Architect => write!(f, "architect"),
            Mode::Reviewer => write!(f, "reviewer"),
            Mode::Tutor => write!(f, "tutor"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "assistant" => Ok(Mode::Assistant),
            "debugger" => Ok(Mode::Debugger),
            "architect" => Ok(Mode::Architect),
            "reviewer" => Ok(Mode::Reviewer),
            "tutor" => Ok(Mode::Tutor),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

// ─── Agent loop ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Loop-limit: maximum model↔tool rounds per user input.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Default mode when none is selected.
    #[serde(default = "default_mode")]
    pub default_mode: Mode,
}

fn default_max_turns() -> u32 {
    5
}
fn default_mode() -> Mode {
    Mode::Assistant
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            default_mode: default_mode(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
