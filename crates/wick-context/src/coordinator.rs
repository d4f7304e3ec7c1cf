// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Compression coordinator: decides *when* to reclaim context space and
//! drives the checkpoint pipeline when it does.
//!
//! Strategy selection keys off the provider-pool fill ratio.  Normal
//! compression summarizes the oldest contiguous window outside the
//! preserve-recent tail into a detailed checkpoint; emergency compression
//! goes straight to a compact checkpoint and merges old compact siblings.
//! A summary that fails to shrink what it replaces is rejected by the
//! inflation guard and the coordinator degrades to plain truncation on its
//! next run.  Rollover (fill ratio ≥ 1.0) is surfaced as a decision for
//! the session layer, which owns the emergency snapshot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use wick_config::{CompressionSettings, CompressionStrategy};
use wick_model::{estimate_tokens, Goal, MessageRecord, Role};

use crate::checkpoint::{
    age_checkpoints, merge_compact_checkpoints, Checkpoint, CheckpointStore, CompressionLevel,
    Summarizer, MERGE_MIN_COMPACT,
};
use crate::store::MessageStore;

/// What the coordinator decided for the current fill level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAction {
    /// Below the watch band: nothing to do.
    None,
    /// Approaching the threshold: emit a warning event only.
    Warn,
    /// Normal compression: detailed checkpoint of the oldest window.
    Normal,
    /// Emergency compression: compact checkpoint + age + merge.
    Emergency,
    /// Budget exhausted: the session layer must snapshot and roll over.
    Rollover,
}

/// Lower edge of the warning band.
const WARN_RATIO: f32 = 0.70;
/// Lower edge of the emergency band.
const EMERGENCY_RATIO: f32 = 0.95;

/// Outcome of one coordinator run.
#[derive(Debug, Clone)]
pub struct CompressionReport {
    pub action: CompressionAction,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub checkpoint_id: Option<String>,
    /// True when the inflation guard rejected the summary and the live
    /// messages were left untouched.
    pub inflation_rejected: bool,
}

/// Visible "summarization in progress" flag.
///
/// The agent loop blocks new user input on this gate with a bounded wait;
/// the bound guarantees input is never blocked forever even if a
/// summarization call hangs.
#[derive(Debug)]
pub struct InProgressGate {
    tx: watch::Sender<bool>,
}

pub struct GateGuard<'a> {
    gate: &'a InProgressGate,
}

impl InProgressGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn begin(&self) -> GateGuard<'_> {
        let _ = self.tx.send(true);
        GateGuard { gate: self }
    }

    pub fn is_busy(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate is idle, up to `timeout`.  Returns `true` when
    /// idle was observed, `false` when the wait timed out (the caller
    /// proceeds regardless — the block is advisory).
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        if !self.is_busy() {
            return true;
        }
        let mut rx = self.tx.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|busy| !busy))
            .await
            .is_ok();
        result
    }
}

impl Default for InProgressGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let _ = self.gate.tx.send(false);
    }
}

pub struct CompressionCoordinator {
    cfg: CompressionSettings,
    gate: InProgressGate,
    /// Set when the inflation guard rejected a summary; the next run uses
    /// plain truncation instead of burning another model call.
    force_truncate_next: AtomicBool,
}

impl CompressionCoordinator {
    pub fn new(cfg: CompressionSettings) -> Self {
        Self {
            cfg,
            gate: InProgressGate::new(),
            force_truncate_next: AtomicBool::new(false),
        }
    }

    pub fn gate(&self) -> &InProgressGate {
        &self.gate
    }

    pub fn settings(&self) -> &CompressionSettings {
        &self.cfg
    }

    /// Force plain truncation on the next pass (the memory guard uses
    /// this at critical pressure, where burning a model call on a
    /// summary is the wrong trade).
    pub fn prefer_truncate_next(&self) {
        self.force_truncate_next.store(true, Ordering::Relaxed);
    }

    /// Strategy selection from the provider-pool fill ratio.
    pub fn plan(&self, current_tokens: usize, provider_size: usize) -> CompressionAction {
        if provider_size == 0 {
            return CompressionAction::None;
        }
        let r = current_tokens as f32 / provider_size as f32;
        let threshold = self.cfg.threshold.clamp(WARN_RATIO, EMERGENCY_RATIO);
        if r >= 1.0 {
            CompressionAction::Rollover
        } else if r >= EMERGENCY_RATIO {
            CompressionAction::Emergency
        } else if r >= threshold {
            CompressionAction::Normal
        } else if r >= WARN_RATIO {
            CompressionAction::Warn
        } else {
            CompressionAction::None
        }
    }

    /// Execute a `Normal` or `Emergency` action against the live stores.
    ///
    /// `epoch` is the compression number for any checkpoint created by this
    /// run (the session increments its counter before calling).  The gate
    /// is held for the duration of any summarization call.
    pub async fn compress(
        &self,
        action: CompressionAction,
        messages: &mut MessageStore,
        checkpoints: &mut CheckpointStore,
        epoch: u64,
        model: &str,
        summarizer: &dyn Summarizer,
        goal: Option<&Goal>,
    ) -> anyhow::Result<CompressionReport> {
        debug_assert!(matches!(
            action,
            CompressionAction::Normal | CompressionAction::Emergency
        ));
        let tokens_before = messages.total_tokens() + checkpoints.total_tokens();
        let mut report = CompressionReport {
            action,
            tokens_before,
            tokens_after: tokens_before,
            checkpoint_id: None,
            inflation_rejected: false,
        };

        let window = select_window(messages, self.cfg.preserve_recent_tokens);
        if window.is_empty() {
            debug!("nothing outside the preserve-recent tail; skipping compression");
            return Ok(report);
        }

        let level = match action {
            CompressionAction::Emergency => CompressionLevel::Compact,
            _ => CompressionLevel::Detailed,
        };

        let strategy = self.effective_strategy();
        let window_tokens: usize = window.iter().map(|m| m.token_count).sum();

        // Hybrid: when the window is large, the oldest half is dropped
        // without a model call and only the newer half is summarized.
        let (truncate_ids, summarize_window): (HashSet<String>, Vec<MessageRecord>) =
            match strategy {
                CompressionStrategy::Truncate => {
                    (window.iter().map(|m| m.id.clone()).collect(), Vec::new())
                }
                CompressionStrategy::Summarize => (HashSet::new(), window),
                CompressionStrategy::Hybrid => {
                    if window_tokens > 2 * self.cfg.preserve_recent_tokens {
                        split_hybrid_window(window, window_tokens / 2)
                    } else {
                        (HashSet::new(), window)
                    }
                }
            };

        if !summarize_window.is_empty() {
            let _busy = self.gate.begin();
            let history = serialize_history(&summarize_window);
            let summary = match summarizer.summarize(&history, level, goal).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "summarization failed; will truncate on next pass");
                    self.force_truncate_next.store(true, Ordering::Relaxed);
                    report.inflation_rejected = true;
                    return Ok(report);
                }
            };

            let replaced_tokens: usize = summarize_window.iter().map(|m| m.token_count).sum();
            let summary_tokens = estimate_tokens(&summary);
            if summary.is_empty() || summary_tokens >= replaced_tokens {
                warn!(
                    summary_tokens,
                    replaced_tokens, "inflation guard rejected summary; messages stay live"
                );
                self.force_truncate_next.store(true, Ordering::Relaxed);
                report.inflation_rejected = true;
                return Ok(report);
            }

            let ids: Vec<String> = summarize_window.iter().map(|m| m.id.clone()).collect();
            let id_set: HashSet<String> = ids.iter().cloned().collect();
            let ckpt = Checkpoint::new(summary, ids, level, epoch, model);
            report.checkpoint_id = Some(checkpoints.insert(ckpt));
            messages.remove_ids(&id_set);
        }

        if !truncate_ids.is_empty() {
            let dropped = messages.remove_ids(&truncate_ids);
            info!(dropped = dropped.len(), "truncated oldest messages");
        }

        // Aging runs after every compression pass; emergencies also merge
        // the accumulated compact checkpoints.
        age_checkpoints(checkpoints, epoch, summarizer, goal).await?;
        if action == CompressionAction::Emergency {
            merge_compact_checkpoints(checkpoints, summarizer, goal, MERGE_MIN_COMPACT).await?;
        }

        report.tokens_after = messages.total_tokens() + checkpoints.total_tokens();
        info!(
            before = report.tokens_before,
            after = report.tokens_after,
            checkpoint = report.checkpoint_id.as_deref().unwrap_or("-"),
            "compression pass complete"
        );
        Ok(report)
    }

    fn effective_strategy(&self) -> CompressionStrategy {
        if !self.cfg.enabled {
            // Master switch off: deterministic reclaim only.
            return CompressionStrategy::Truncate;
        }
        if self.force_truncate_next.swap(false, Ordering::Relaxed) {
            return CompressionStrategy::Truncate;
        }
        self.cfg.strategy
    }
}

/// Pick the oldest contiguous run of non-system messages, leaving at least
/// `preserve_tokens` of tail (and the system prompt) untouched.
///
/// The split never lands inside a tool interaction: if the first preserved
/// message would be a tool result, the boundary moves back until the whole
/// call/result group stays in the tail.  A checkpoint that swallowed a
/// tool call but not its result would leave the next request with orphaned
/// tool messages.
fn select_window(messages: &MessageStore, preserve_tokens: usize) -> Vec<MessageRecord> {
    let non_system: Vec<&MessageRecord> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    if non_system.len() < 2 {
        return Vec::new();
    }

    // Walk from the tail accumulating the preserved budget.
    let mut tail_tokens = 0usize;
    let mut split = non_system.len();
    while split > 0 && tail_tokens < preserve_tokens {
        split -= 1;
        tail_tokens += non_system[split].token_count;
    }

    // Keep tool groups intact.
    while split > 0 && split < non_system.len() && non_system[split].role == Role::Tool {
        split -= 1;
    }

    non_system[..split].iter().map(|m| (*m).clone()).collect()
}

/// Split a hybrid window: the oldest messages up to `truncate_budget`
/// tokens are dropped outright, the remainder is summarized.
fn split_hybrid_window(
    window: Vec<MessageRecord>,
    truncate_budget: usize,
) -> (HashSet<String>, Vec<MessageRecord>) {
    let mut truncate_ids = HashSet::new();
    let mut summarize = Vec::new();
    let mut spent = 0usize;
    let mut truncating = true;
    for msg in window {
        if truncating {
            // Stop at the first message past the budget, but never strand a
            // tool result whose call was already dropped.
            if spent < truncate_budget || msg.role == Role::Tool {
                spent += msg.token_count;
                truncate_ids.insert(msg.id);
                continue;
            }
            truncating = false;
        }
        summarize.push(msg);
    }
    (truncate_ids, summarize)
}

/// Serialize a message window into plain text for a compaction prompt.
pub fn serialize_history(messages: &[MessageRecord]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let mut line = format!("{role}: {}", m.content);
            for tc in &m.tool_calls {
                line.push_str(&format!("\n[tool_call: {}({})]", tc.name, tc.args));
            }
            if let Some(call_id) = &m.tool_call_id {
                line = format!("{role} (result for {call_id}): {}", m.content);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wick_model::ToolCallRecord;

    struct HalvingSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for HalvingSummarizer {
        async fn summarize(
            &self,
            text: &str,
            _level: CompressionLevel,
            _goal: Option<&Goal>,
        ) -> anyhow::Result<String> {
            Ok(text.chars().take((text.len() / 8).max(8)).collect())
        }
    }

    struct InflatingSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for InflatingSummarizer {
        async fn summarize(
            &self,
            text: &str,
            _level: CompressionLevel,
            _goal: Option<&Goal>,
        ) -> anyhow::Result<String> {
            Ok(format!("{text}{text} inflated"))
        }
    }

    fn settings() -> CompressionSettings {
        CompressionSettings {
            preserve_recent_tokens: 50,
            ..CompressionSettings::default()
        }
    }

    fn seeded_store(n: usize) -> MessageStore {
        let mut store = MessageStore::new();
        store.push(MessageRecord::system("system prompt"));
        for i in 0..n {
            store.push(MessageRecord::user(format!(
                "user message {i} with some padding text to give it weight"
            )));
            store.push(MessageRecord::assistant(format!(
                "assistant reply {i} with enough words to count for something"
            )));
        }
        store
    }

    // ── plan ──────────────────────────────────────────────────────────────────

    #[test]
    fn plan_bands_match_thresholds() {
        let c = CompressionCoordinator::new(settings());
        let size = 10_000usize;
        assert_eq!(c.plan(0, size), CompressionAction::None);
        assert_eq!(c.plan(6_999, size), CompressionAction::None);
        assert_eq!(c.plan(7_000, size), CompressionAction::Warn);
        assert_eq!(c.plan(7_999, size), CompressionAction::Warn);
        assert_eq!(c.plan(8_000, size), CompressionAction::Normal);
        assert_eq!(c.plan(9_499, size), CompressionAction::Normal);
        assert_eq!(c.plan(9_500, size), CompressionAction::Emergency);
        assert_eq!(c.plan(9_999, size), CompressionAction::Emergency);
        assert_eq!(c.plan(10_000, size), CompressionAction::Rollover);
        assert_eq!(c.plan(15_000, size), CompressionAction::Rollover);
    }

    #[test]
    fn plan_epsilon_around_threshold() {
        let c = CompressionCoordinator::new(settings());
        // Just under and just over 0.80 of a 13926-token provider pool.
        let size = 13_926usize;
        let threshold = (0.80 * size as f32) as usize;
        assert_eq!(c.plan(threshold - 1, size), CompressionAction::Warn);
        assert_eq!(c.plan(threshold + 1, size), CompressionAction::Normal);
    }

    #[test]
    fn plan_zero_provider_size_is_noop() {
        let c = CompressionCoordinator::new(settings());
        assert_eq!(c.plan(500, 0), CompressionAction::None);
    }

    // ── window selection ──────────────────────────────────────────────────────

    #[test]
    fn window_excludes_system_and_recent_tail() {
        let store = seeded_store(10);
        let window = select_window(&store, 50);
        assert!(!window.is_empty());
        assert!(window.iter().all(|m| m.role != Role::System));
        // The newest message must stay live.
        let newest = store.view().last().unwrap();
        assert!(window.iter().all(|m| m.id != newest.id));
    }

    #[test]
    fn window_never_starts_tail_with_tool_result() {
        let mut store = MessageStore::new();
        store.push(MessageRecord::system("sys"));
        store.push(MessageRecord::user("old question with plenty of text here"));
        store.push(MessageRecord::assistant_with_tool_calls(
            "",
            vec![ToolCallRecord::new("c1", "lookup", serde_json::json!({}))],
        ));
        store.push(MessageRecord::tool_result("c1", "tool output payload"));
        store.push(MessageRecord::assistant("final answer text"));

        // Preserve budget sized so the natural split lands on the tool
        // result; the boundary must move back so the whole call/result
        // group stays in the tail.
        let window = select_window(&store, 8);
        let has_call = window.iter().any(|m| !m.tool_calls.is_empty());
        let has_result = window.iter().any(|m| m.role == Role::Tool);
        assert_eq!(has_call, has_result, "tool group must not be split");
        assert_eq!(window.len(), 1, "only the old question is compressible");
        assert_eq!(window[0].role, Role::User);
    }

    #[test]
    fn tiny_history_yields_empty_window() {
        let mut store = MessageStore::new();
        store.push(MessageRecord::system("sys"));
        store.push(MessageRecord::user("only one"));
        assert!(select_window(&store, 10).is_empty());
    }

    // ── compress: normal path ─────────────────────────────────────────────────

    #[tokio::test]
    async fn normal_compression_creates_detailed_checkpoint() {
        let coordinator = CompressionCoordinator::new(CompressionSettings {
            strategy: CompressionStrategy::Summarize,
            preserve_recent_tokens: 30,
            ..settings()
        });
        let mut messages = seeded_store(12);
        let mut checkpoints = CheckpointStore::new();
        let live_before = messages.len();

        let report = coordinator
            .compress(
                CompressionAction::Normal,
                &mut messages,
                &mut checkpoints,
                1,
                "test-model",
                &HalvingSummarizer,
                None,
            )
            .await
            .unwrap();

        assert!(report.checkpoint_id.is_some());
        assert!(!report.inflation_rejected);
        assert!(report.tokens_after < report.tokens_before);
        assert!(messages.len() < live_before);
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints.view()[0].level, CompressionLevel::Detailed);
        assert_eq!(checkpoints.view()[0].compression_number, 1);
    }

    #[tokio::test]
    async fn replaced_ids_are_disjoint_from_live_ids() {
        let coordinator = CompressionCoordinator::new(CompressionSettings {
            strategy: CompressionStrategy::Summarize,
            preserve_recent_tokens: 30,
            ..settings()
        });
        let mut messages = seeded_store(12);
        let mut checkpoints = CheckpointStore::new();

        coordinator
            .compress(
                CompressionAction::Normal,
                &mut messages,
                &mut checkpoints,
                1,
                "m",
                &HalvingSummarizer,
                None,
            )
            .await
            .unwrap();

        let live = messages.ids();
        let replaced = checkpoints.original_id_union();
        assert!(live.is_disjoint(&replaced));
        assert!(!replaced.is_empty());
    }

    #[tokio::test]
    async fn inflation_guard_rejects_and_leaves_messages_live() {
        let coordinator = CompressionCoordinator::new(CompressionSettings {
            strategy: CompressionStrategy::Summarize,
            preserve_recent_tokens: 30,
            ..settings()
        });
        let mut messages = seeded_store(8);
        let mut checkpoints = CheckpointStore::new();
        let before = messages.len();

        let report = coordinator
            .compress(
                CompressionAction::Normal,
                &mut messages,
                &mut checkpoints,
                1,
                "m",
                &InflatingSummarizer,
                None,
            )
            .await
            .unwrap();

        assert!(report.inflation_rejected);
        assert_eq!(messages.len(), before, "rejected summary must not remove messages");
        assert!(checkpoints.is_empty());
    }

    #[tokio::test]
    async fn after_inflation_rejection_next_pass_truncates_without_model() {
        let coordinator = CompressionCoordinator::new(CompressionSettings {
            strategy: CompressionStrategy::Summarize,
            preserve_recent_tokens: 30,
            ..settings()
        });
        let mut messages = seeded_store(8);
        let mut checkpoints = CheckpointStore::new();

        let first = coordinator
            .compress(
                CompressionAction::Normal,
                &mut messages,
                &mut checkpoints,
                1,
                "m",
                &InflatingSummarizer,
                None,
            )
            .await
            .unwrap();
        assert!(first.inflation_rejected);

        // Second pass: even with the inflating summarizer, truncation runs
        // and live messages shrink with no checkpoint created.
        let before = messages.len();
        let second = coordinator
            .compress(
                CompressionAction::Normal,
                &mut messages,
                &mut checkpoints,
                2,
                "m",
                &InflatingSummarizer,
                None,
            )
            .await
            .unwrap();
        assert!(!second.inflation_rejected);
        assert!(messages.len() < before);
        assert!(checkpoints.is_empty());
    }

    #[tokio::test]
    async fn emergency_compression_uses_compact_level() {
        let coordinator = CompressionCoordinator::new(CompressionSettings {
            strategy: CompressionStrategy::Summarize,
            preserve_recent_tokens: 30,
            ..settings()
        });
        let mut messages = seeded_store(12);
        let mut checkpoints = CheckpointStore::new();

        let report = coordinator
            .compress(
                CompressionAction::Emergency,
                &mut messages,
                &mut checkpoints,
                3,
                "m",
                &HalvingSummarizer,
                None,
            )
            .await
            .unwrap();

        assert!(report.checkpoint_id.is_some());
        assert_eq!(checkpoints.view()[0].level, CompressionLevel::Compact);
    }

    #[tokio::test]
    async fn disabled_compression_truncates_only() {
        let coordinator = CompressionCoordinator::new(CompressionSettings {
            enabled: false,
            preserve_recent_tokens: 30,
            ..settings()
        });
        let mut messages = seeded_store(8);
        let mut checkpoints = CheckpointStore::new();
        let before = messages.len();

        let report = coordinator
            .compress(
                CompressionAction::Normal,
                &mut messages,
                &mut checkpoints,
                1,
                "m",
                &HalvingSummarizer,
                None,
            )
            .await
            .unwrap();

        assert!(report.checkpoint_id.is_none());
        assert!(messages.len() < before);
        assert!(checkpoints.is_empty());
    }

    // ── gate ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn gate_blocks_while_held_and_releases_on_drop() {
        let gate = InProgressGate::new();
        assert!(!gate.is_busy());
        {
            let _guard = gate.begin();
            assert!(gate.is_busy());
            assert!(
                !gate.wait_idle(Duration::from_millis(30)).await,
                "wait must time out while the guard is held"
            );
        }
        assert!(!gate.is_busy());
        assert!(gate.wait_idle(Duration::from_millis(30)).await);
    }

    #[tokio::test]
    async fn gate_wait_wakes_when_guard_drops() {
        use std::sync::Arc;
        let gate = Arc::new(InProgressGate::new());
        let g2 = Arc::clone(&gate);

        // Hold the gate briefly on another task.
        let holder = tokio::spawn(async move {
            let _guard = g2.begin();
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(gate.wait_idle(Duration::from_secs(2)).await);
        holder.await.unwrap();
    }

    // ── serialization ─────────────────────────────────────────────────────────

    #[test]
    fn history_serialization_includes_roles_and_tool_calls() {
        let msgs = vec![
            MessageRecord::user("run the scan"),
            MessageRecord::assistant_with_tool_calls(
                "",
                vec![ToolCallRecord::new("c1", "scan", serde_json::json!({"depth": 2}))],
            ),
            MessageRecord::tool_result("c1", "3 findings"),
        ];
        let text = serialize_history(&msgs);
        assert!(text.contains("User: run the scan"));
        assert!(text.contains("[tool_call: scan"));
        assert!(text.contains("result for c1"));
    }
}
