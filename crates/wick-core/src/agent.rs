// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use wick_config::{ContextTarget, Mode, Settings};
use wick_context::{
    assess, classify_tier, suggest_auto_size, CompressionAction, CompressionCoordinator,
    ContextPool, ContextUsage, GuardThresholds, NvidiaSmiProbe, PressureLevel, VramMonitor,
    VramProbe, CRITICAL_SHRINK_FACTOR,
};
use wick_hooks::{HookEngine, HookEvent};
use wick_model::{
    ChatEvent, ChatOptions, ChatRequest, MessageRecord, ModelProfile, ProviderAdapter,
    ReasoningBlock, Role, ToolCallRecord, ToolSchema,
};
use wick_session::{SessionManager, Snapshot, SnapshotPurpose, SnapshotStore};
use wick_tools::{ToolInvocation, ToolOutcome, ToolRegistry};

use crate::error::{is_transient_provider_error, RuntimeError};
use crate::events::AgentEvent;
use crate::mode::ModeManager;
use crate::prompts::PromptOrchestrator;
use crate::reasoning::ReasoningParser;
use crate::summarize::ProviderSummarizer;

/// Backoff before the single transient-error retry.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Read-only status view for `/context`.
#[derive(Debug, Clone)]
pub struct ContextStatus {
    pub usage: ContextUsage,
    pub tier: wick_model::Tier,
    pub session_id: String,
    pub model: String,
    pub checkpoint_count: usize,
    pub compression_count: u64,
}

/// The conversation runtime: owns the session, drives the model ↔ tool
/// loop, and enforces the context budget around every turn.
pub struct Agent {
    provider: Arc<dyn ProviderAdapter>,
    profile: ModelProfile,
    tools: Arc<ToolRegistry>,
    hooks: Arc<HookEngine>,
    settings: Settings,
    sessions: SessionManager,
    snapshots: SnapshotStore,
    pool: ContextPool,
    coordinator: CompressionCoordinator,
    vram: VramMonitor,
    modes: ModeManager,
    prompts: PromptOrchestrator,
    /// Emergency snapshot kept in memory when the disk write failed, so a
    /// restore is still possible within the process lifetime.
    last_emergency: Option<Snapshot>,
}

enum TurnOutput {
    Completed {
        text: String,
        reasoning: Option<ReasoningBlock>,
        tool_calls: Vec<(String, String, serde_json::Value)>,
    },
    Aborted {
        partial: String,
    },
}

/// Releases the pool's in-flight counter on every exit path.
struct RequestGuard<'a>(&'a ContextPool);

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_request();
    }
}

impl Agent {
    /// Construct the runtime against a state root.  Opens (or recovers)
    /// the session for the provider's model, sizes the context pool, and
    /// fires the `session_start` hook.
    pub async fn new(
        provider: Arc<dyn ProviderAdapter>,
        tools: Arc<ToolRegistry>,
        hooks: Arc<HookEngine>,
        settings: Settings,
        state_root: PathBuf,
    ) -> anyhow::Result<Self> {
        let profile = provider.profile();
        let snapshots = SnapshotStore::new(&state_root);
        let (sessions, open_outcome) =
            SessionManager::open(&state_root, provider.model(), &snapshots)?;

        let user_size = Self::initial_user_size(&settings, &profile).await;
        let pool = ContextPool::new(user_size, &profile);
        let tier = classify_tier(user_size, &profile);

        let vram = if settings.context.auto_size {
            VramMonitor::spawn(
                Arc::new(NvidiaSmiProbe),
                Duration::from_millis(settings.context.vram_poll_interval_ms),
            )
        } else {
            VramMonitor::disabled()
        };

        let modes = ModeManager::new(
            settings.agent.default_mode,
            settings.mode.auto_switch,
            &state_root,
        );
        let prompts = PromptOrchestrator::new(tier, modes.current(), profile.supports_tools);
        let coordinator = CompressionCoordinator::new(settings.compression.clone());

        info!(
            model = provider.model(),
            session = %sessions.current().id,
            user_size,
            tier = %tier,
            outcome = ?open_outcome,
            "runtime ready"
        );

        let mut agent = Self {
            provider,
            profile,
            tools,
            hooks,
            settings,
            sessions,
            snapshots,
            pool,
            coordinator,
            vram,
            modes,
            prompts,
            last_emergency: None,
        };
        agent.sync_pool_tokens();

        let session_id = agent.sessions.current().id.clone();
        agent
            .hooks
            .dispatch(
                HookEvent::SessionStart,
                serde_json::json!({ "session_id": session_id, "model": agent.provider.model() }),
                None,
            )
            .await;
        Ok(agent)
    }

    async fn initial_user_size(settings: &Settings, profile: &ModelProfile) -> usize {
        match settings.context.target_size {
            ContextTarget::Tokens(n) => n.clamp(profile.min_user_size, profile.context_window),
            ContextTarget::Auto => {
                let sample = if settings.context.auto_size {
                    NvidiaSmiProbe.sample().await
                } else {
                    None
                };
                let buffer = settings.context.vram_buffer_mib * 1024 * 1024;
                suggest_auto_size(sample.as_ref(), profile, buffer).user_size
            }
        }
    }

    // ── Submission ───────────────────────────────────────────────────────────

    /// Convenience wrapper around [`submit_with_cancel`] that never fires
    /// the cancel path.
    pub async fn submit(
        &mut self,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let (_keep_alive, cancel) = oneshot::channel::<()>();
        self.submit_with_cancel(user_input, tx, cancel).await
    }

    /// Run one user turn.  The cancel channel aborts the provider stream
    /// at the next event boundary: streamed text is kept as a truncated
    /// assistant message and no further tool call is executed.
    pub async fn submit_with_cancel(
        &mut self,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        if is_cancelled(&mut cancel) {
            let _ = tx
                .send(AgentEvent::Aborted {
                    partial_text: String::new(),
                })
                .await;
            return Ok(());
        }

        // A summarization may still be in flight from the previous turn;
        // block up to the configured bound, then proceed regardless.
        let block = Duration::from_millis(self.settings.compression.summarize_block_ms);
        if !self.coordinator.gate().wait_idle(block).await {
            warn!("summarization still in flight after block timeout; proceeding");
        }

        let session_id = self.sessions.current().id.clone();
        let gate = self
            .hooks
            .dispatch(
                HookEvent::BeforeAgent,
                serde_json::json!({ "session_id": session_id, "input": user_input }),
                None,
            )
            .await;
        self.emit_hook_messages(&tx, &gate.system_messages).await;
        if !gate.continue_ {
            let _ = tx
                .send(AgentEvent::SystemMessage(
                    "Turn blocked by a before_agent hook.".into(),
                ))
                .await;
            let _ = tx.send(AgentEvent::TurnComplete).await;
            return Ok(());
        }

        self.refresh_system_message();
        // Proactive budget check before the new user message lands, so an
        // emergency rollover never swallows the input it is making room for.
        self.enforce_budget(&tx).await?;

        self.sessions
            .current_mut()
            .messages
            .push(MessageRecord::user(user_input));
        self.sessions.current_mut().touch();

        let result = self.run_loop(&tx, &mut cancel).await;

        let _ = self
            .hooks
            .dispatch(
                HookEvent::AfterAgent,
                serde_json::json!({ "session_id": self.sessions.current().id }),
                None,
            )
            .await;
        self.sessions.persist()?;
        self.emit_usage(&tx).await;
        result
    }

    // ── The agent loop ───────────────────────────────────────────────────────

    async fn run_loop(
        &mut self,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let mode = self.modes.current();
        let selection = self
            .hooks
            .dispatch(
                HookEvent::BeforeToolSelection,
                serde_json::json!({ "mode": mode.to_string() }),
                None,
            )
            .await;
        let schemas: Vec<ToolSchema> = if selection.continue_ {
            self.tools
                .schemas_for_mode(mode)
                .into_iter()
                .map(|s| ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                })
                .collect()
        } else {
            Vec::new()
        };

        let max_turns = self.settings.agent.max_turns;
        let mut rounds = 0u32;

        loop {
            rounds += 1;
            if rounds > max_turns {
                let notice = format!(
                    "[Loop limit reached after {max_turns} tool rounds. Stopping here; \
                     ask me to continue if more work remains.]"
                );
                self.sessions
                    .current_mut()
                    .messages
                    .push(MessageRecord::assistant(&notice));
                let _ = tx.send(AgentEvent::SystemMessage(notice)).await;
                let _ = tx.send(AgentEvent::TurnComplete).await;
                return Ok(());
            }

            let gate = self
                .hooks
                .dispatch(
                    HookEvent::BeforeModel,
                    serde_json::json!({ "round": rounds }),
                    None,
                )
                .await;
            self.emit_hook_messages(tx, &gate.system_messages).await;
            if !gate.continue_ {
                let _ = tx.send(AgentEvent::TurnComplete).await;
                return Ok(());
            }

            let turn = match self.stream_one_turn(&schemas, tx, cancel).await {
                Ok(t) => t,
                Err(err) => {
                    let _ = tx.send(AgentEvent::Failure(err.failure_event())).await;
                    let _ = tx.send(AgentEvent::TurnComplete).await;
                    return Ok(());
                }
            };

            let _ = self
                .hooks
                .dispatch(HookEvent::AfterModel, serde_json::json!({ "round": rounds }), None)
                .await;

            let (text, reasoning, tool_calls) = match turn {
                TurnOutput::Aborted { partial } => {
                    if !partial.is_empty() {
                        self.sessions
                            .current_mut()
                            .messages
                            .push(MessageRecord::assistant(&partial));
                    }
                    let _ = tx
                        .send(AgentEvent::Aborted {
                            partial_text: partial,
                        })
                        .await;
                    return Ok(());
                }
                TurnOutput::Completed {
                    text,
                    reasoning,
                    tool_calls,
                } => (text, reasoning, tool_calls),
            };

            if let Some(block) = &reasoning {
                let _ = tx.send(AgentEvent::ReasoningComplete(block.clone())).await;
            }

            if tool_calls.is_empty() {
                if !text.is_empty() {
                    let _ = tx.send(AgentEvent::TextComplete(text.clone())).await;
                }
                let mut msg = MessageRecord::assistant(&text);
                if let Some(block) = reasoning {
                    msg = msg.with_reasoning(block);
                }
                self.sessions.current_mut().messages.push(msg);
                let _ = tx.send(AgentEvent::TurnComplete).await;
                return Ok(());
            }

            // Tool rounds: execute strictly in the order the provider
            // emitted the calls, then append results in the same order.
            let mut records: Vec<ToolCallRecord> = Vec::with_capacity(tool_calls.len());
            let mut outcomes: Vec<ToolOutcome> = Vec::with_capacity(tool_calls.len());
            let mut aborted = false;

            for (call_id, name, args) in tool_calls {
                if is_cancelled(cancel) {
                    aborted = true;
                    break;
                }
                let _ = tx
                    .send(AgentEvent::ToolCallStarted {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    })
                    .await;

                let file = args
                    .get("path")
                    .or_else(|| args.get("file"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let gate = self
                    .hooks
                    .dispatch(
                        HookEvent::BeforeTool,
                        serde_json::json!({ "tool": name, "args": args }),
                        file.as_deref(),
                    )
                    .await;
                self.emit_hook_messages(tx, &gate.system_messages).await;

                let outcome = if gate.continue_ {
                    self.tools
                        .execute(&ToolInvocation {
                            id: call_id.clone(),
                            name: name.clone(),
                            args: args.clone(),
                        })
                        .await
                } else {
                    ToolOutcome::err(&call_id, "tool call blocked by a before_tool hook")
                };

                let _ = self
                    .hooks
                    .dispatch(
                        HookEvent::AfterTool,
                        serde_json::json!({
                            "tool": name,
                            "is_error": outcome.is_error,
                        }),
                        file.as_deref(),
                    )
                    .await;

                let _ = tx
                    .send(AgentEvent::ToolCallFinished {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        output: outcome.content.clone(),
                        is_error: outcome.is_error,
                    })
                    .await;

                let mut record = ToolCallRecord::new(&call_id, &name, args);
                if outcome.is_error {
                    record.error = Some(outcome.content.clone());
                } else {
                    record.result = Some(outcome.content.clone());
                }
                records.push(record);
                outcomes.push(outcome);
            }

            // Store the assistant tool-call message and the results for
            // the calls that actually ran, keeping call/result pairing.
            let mut msg = MessageRecord::assistant_with_tool_calls(&text, records);
            if let Some(block) = reasoning {
                msg = msg.with_reasoning(block);
            }
            self.sessions.current_mut().messages.push(msg);
            for outcome in &outcomes {
                self.sessions
                    .current_mut()
                    .messages
                    .push(MessageRecord::tool_result(&outcome.call_id, &outcome.content));
            }

            if aborted {
                let _ = tx
                    .send(AgentEvent::Aborted {
                        partial_text: text,
                    })
                    .await;
                return Ok(());
            }

            // A large tool result can blow the budget before the next
            // model call; re-validate between rounds.
            self.enforce_budget(tx).await?;
        }
    }

    /// One model call with a single retry on transient failures.
    async fn stream_one_turn(
        &mut self,
        schemas: &[ToolSchema],
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<TurnOutput, RuntimeError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_stream_once(schemas, tx, cancel).await {
                Err(RuntimeError::ProviderTransient(detail)) if attempt == 1 => {
                    warn!(detail, "transient provider failure; retrying once");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                other => return other,
            }
        }
    }

    async fn try_stream_once(
        &mut self,
        schemas: &[ToolSchema],
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<TurnOutput, RuntimeError> {
        let request = self.assemble_request(schemas);

        self.pool.add_request();
        let _guard = RequestGuard(&self.pool);
        self.modes.begin_stream();

        let result = self.drive_stream(request, tx, cancel).await;
        self.modes.end_stream();
        result
    }

    async fn drive_stream(
        &self,
        request: ChatRequest,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<TurnOutput, RuntimeError> {
        let mut stream = self
            .provider
            .stream_chat(request)
            .await
            .map_err(|e| RuntimeError::ProviderTransient(e.to_string()))?;

        let mut parser = ReasoningParser::new();
        let mut text = String::new();
        let mut tool_calls: Vec<(String, String, serde_json::Value)> = Vec::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut *cancel => {
                    let (trailing, _) = parser.finish();
                    text.push_str(&trailing);
                    return Ok(TurnOutput::Aborted { partial: text });
                }
                event = stream.next() => event,
            };

            let Some(event) = event else {
                break;
            };
            let event =
                event.map_err(|e| RuntimeError::ProviderTransient(e.to_string()))?;

            match event {
                ChatEvent::Text(delta) => {
                    let fed = parser.feed_text(&delta);
                    if !fed.visible.is_empty() {
                        text.push_str(&fed.visible);
                        let _ = tx.send(AgentEvent::TextDelta(fed.visible)).await;
                    }
                    if !fed.reasoning.is_empty() {
                        let _ = tx.send(AgentEvent::ReasoningDelta(fed.reasoning)).await;
                    }
                }
                ChatEvent::Reasoning(delta) => {
                    parser.feed_reasoning(&delta);
                    let _ = tx.send(AgentEvent::ReasoningDelta(delta)).await;
                }
                ChatEvent::ToolCall { id, name, args } => {
                    if name.is_empty() {
                        return Err(RuntimeError::ProviderProtocol(
                            "tool call with empty name".into(),
                        ));
                    }
                    tool_calls.push((id, name, args));
                }
                ChatEvent::Finish(_) => break,
                ChatEvent::Error { code, message } => {
                    return if is_transient_provider_error(&code, &message) {
                        Err(RuntimeError::ProviderTransient(format!("{code}: {message}")))
                    } else {
                        Err(RuntimeError::ProviderProtocol(format!("{code}: {message}")))
                    };
                }
            }
        }

        let (trailing, reasoning) = parser.finish();
        text.push_str(&trailing);
        Ok(TurnOutput::Completed {
            text,
            reasoning,
            tool_calls,
        })
    }

    fn assemble_request(&self, schemas: &[ToolSchema]) -> ChatRequest {
        let session = self.sessions.current();
        let mut messages: Vec<MessageRecord> = Vec::new();

        // Checkpoints stand in for the history they replaced, oldest
        // first, ahead of the live messages.
        let mut checkpoints: Vec<_> = session.checkpoints.view().iter().collect();
        checkpoints.sort_by_key(|c| c.timestamp);
        for ckpt in checkpoints {
            messages.push(MessageRecord::assistant(format!(
                "[Earlier conversation, summarized]\n{}",
                ckpt.summary
            )));
        }
        messages.extend(
            session
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );

        ChatRequest {
            model: session.model.clone(),
            system: self.prompts.system_prompt().to_string(),
            messages,
            tools: schemas.to_vec(),
            options: ChatOptions {
                context_window_hint: Some(self.pool.provider_size()),
                ..ChatOptions::default()
            },
        }
    }

    // ── Budget enforcement ───────────────────────────────────────────────────

    async fn enforce_budget(&mut self, tx: &mpsc::Sender<AgentEvent>) -> anyhow::Result<()> {
        self.sync_pool_tokens();
        let usage = self.pool.usage();

        match self.coordinator.plan(usage.current, usage.provider_size) {
            CompressionAction::None => {}
            CompressionAction::Warn => {
                let _ = tx
                    .send(AgentEvent::ContextWarning {
                        percent_of_provider: usage.percent_of_provider,
                    })
                    .await;
            }
            action @ (CompressionAction::Normal | CompressionAction::Emergency) => {
                self.run_compression(action, tx).await?;
            }
            CompressionAction::Rollover => {
                self.rollover(tx).await?;
            }
        }

        // The guard grades the worse of pool fill and VRAM pressure.
        let usage = self.pool.usage();
        let level = assess(
            usage.percent_of_provider,
            self.vram.pressure(),
            &GuardThresholds::default(),
        );
        if level != PressureLevel::Normal {
            let _ = tx.send(AgentEvent::MemoryPressure(level)).await;
        }
        match level {
            PressureLevel::Normal | PressureLevel::Warning => {
                if level == PressureLevel::Warning {
                    self.write_snapshot(SnapshotPurpose::Recovery, tx).await;
                }
            }
            PressureLevel::Critical => {
                self.coordinator.prefer_truncate_next();
                self.run_compression(CompressionAction::Emergency, tx).await?;
                let shrunk = ((usage.user_size as f32 * CRITICAL_SHRINK_FACTOR) as usize)
                    .max(self.profile.min_user_size);
                self.resize_user_budget(shrunk).await;
            }
            PressureLevel::Emergency => {
                self.rollover(tx).await?;
            }
        }
        Ok(())
    }

    async fn run_compression(
        &mut self,
        action: CompressionAction,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let usage = self.pool.usage();
        let gate = self
            .hooks
            .dispatch(
                HookEvent::PreCompress,
                serde_json::json!({ "current_tokens": usage.current }),
                None,
            )
            .await;
        if !gate.continue_ {
            let _ = tx
                .send(AgentEvent::SystemMessage(
                    "Compression blocked by a pre_compress hook.".into(),
                ))
                .await;
            return Ok(());
        }

        let summarizer = ProviderSummarizer::new(self.provider.clone());
        let epoch = self.sessions.current_mut().next_compression_epoch();
        let model = self.sessions.current().model.clone();
        let goal = self.sessions.current().metadata.goal.clone();

        let report = {
            let session = self.sessions.current_mut();
            let (messages, checkpoints) = (&mut session.messages, &mut session.checkpoints);
            self.coordinator
                .compress(action, messages, checkpoints, epoch, &model, &summarizer, goal.as_ref())
                .await
        };

        match report {
            Ok(report) => {
                if report.inflation_rejected {
                    let err = RuntimeError::CompressionFailure(
                        "summary was not smaller than the messages it replaced".into(),
                    );
                    let _ = tx.send(AgentEvent::Failure(err.failure_event())).await;
                } else {
                    let _ = tx
                        .send(AgentEvent::ContextCompacted {
                            action,
                            tokens_before: report.tokens_before,
                            tokens_after: report.tokens_after,
                        })
                        .await;
                }
                self.sync_pool_tokens();
                let _ = self
                    .hooks
                    .dispatch(
                        HookEvent::PostCompress,
                        serde_json::json!({
                            "tokens_before": report.tokens_before,
                            "tokens_after": report.tokens_after,
                        }),
                        None,
                    )
                    .await;
            }
            Err(e) => {
                let err = RuntimeError::CompressionFailure(e.to_string());
                let _ = tx.send(AgentEvent::Failure(err.failure_event())).await;
            }
        }
        self.sessions.persist()?;
        Ok(())
    }

    /// Emergency rollover: snapshot, reduce live messages to the system
    /// prompt, drop to the minimum tier, and tell the user how to get
    /// their conversation back.
    async fn rollover(&mut self, tx: &mpsc::Sender<AgentEvent>) -> anyhow::Result<()> {
        let snapshot = Snapshot::of(self.sessions.current(), SnapshotPurpose::Emergency);
        let snapshot_id = match self
            .snapshots
            .save(&snapshot, &self.settings.snapshots)
            .await
        {
            Ok(_) => {
                let _ = tx
                    .send(AgentEvent::SnapshotWritten {
                        id: snapshot.id.clone(),
                        purpose: snapshot.purpose.to_string(),
                    })
                    .await;
                Some(snapshot.id.clone())
            }
            Err(e) => {
                warn!(error = %e, "EMERGENCY SNAPSHOT FAILED; state kept in memory only");
                let err = RuntimeError::SnapshotIo(e.to_string());
                let _ = tx.send(AgentEvent::Failure(err.failure_event())).await;
                None
            }
        };
        self.last_emergency = Some(snapshot);

        // The snapshot is self-contained, so checkpoints go too: after a
        // reset to the minimum tier the old summaries would re-fill the
        // pool on the spot.
        let session = self.sessions.current_mut();
        session.messages.clear_keeping_system();
        session.checkpoints.clear();
        session.touch();

        let min = self.profile.min_user_size;
        self.resize_user_budget(min).await;
        self.sync_pool_tokens();

        let recovery = match &snapshot_id {
            Some(id) => format!(
                "Context exhausted: the conversation was snapshotted and reset. \
                 Restore it with `/context restore {id}`."
            ),
            None => "Context exhausted: the conversation was reset. The snapshot \
                     could not be written to disk and is held in memory only."
                .to_string(),
        };
        let _ = tx.send(AgentEvent::SessionRolledOver { snapshot_id }).await;
        let _ = tx.send(AgentEvent::SystemMessage(recovery)).await;
        self.sessions.persist()?;
        Ok(())
    }

    /// Resize both pool budgets and re-lock the tier; the system prompt
    /// rebuild happens here, between turns.
    async fn resize_user_budget(&mut self, user_size: usize) {
        self.pool.resize(user_size, &self.profile).await;
        self.prompts.set_tier(classify_tier(user_size, &self.profile));
        self.refresh_system_message();
    }

    fn sync_pool_tokens(&self) {
        self.pool.set_tokens(self.sessions.current().live_tokens());
    }

    fn refresh_system_message(&mut self) {
        let prompt = self.prompts.system_prompt().to_string();
        let stale = self
            .sessions
            .current()
            .messages
            .system_message()
            .map(|m| m.content != prompt)
            .unwrap_or(true);
        if stale {
            self.sessions
                .current_mut()
                .messages
                .set_system(MessageRecord::system(prompt));
        }
    }

    async fn emit_hook_messages(&self, tx: &mpsc::Sender<AgentEvent>, messages: &[String]) {
        for msg in messages {
            let _ = tx.send(AgentEvent::SystemMessage(msg.clone())).await;
        }
    }

    async fn emit_usage(&self, tx: &mpsc::Sender<AgentEvent>) {
        let usage = self.pool.usage();
        let _ = tx
            .send(AgentEvent::TokenUsage {
                current: usage.current,
                user_size: usage.user_size,
                provider_size: usage.provider_size,
            })
            .await;
    }

    async fn write_snapshot(&mut self, purpose: SnapshotPurpose, tx: &mpsc::Sender<AgentEvent>) {
        let snapshot = Snapshot::of(self.sessions.current(), purpose);
        match self.snapshots.save(&snapshot, &self.settings.snapshots).await {
            Ok(_) => {
                let _ = tx
                    .send(AgentEvent::SnapshotWritten {
                        id: snapshot.id,
                        purpose: purpose.to_string(),
                    })
                    .await;
            }
            Err(e) => {
                // Recovery snapshots are best-effort.
                warn!(error = %e, purpose = %purpose, "snapshot write failed");
            }
        }
    }

    // ── Command surface ──────────────────────────────────────────────────────

    pub fn session(&self) -> &wick_session::Session {
        self.sessions.current()
    }

    /// Mutable session access for the UI layer (seeding piped history,
    /// attaching a goal).  Invariant-bearing writes still belong to the
    /// coordinator entry points.
    pub fn session_mut(&mut self) -> &mut wick_session::Session {
        self.sessions.current_mut()
    }

    pub fn mode(&self) -> Mode {
        self.modes.current()
    }

    /// Persisted mode transitions for the current session, oldest first.
    pub fn mode_history(&self) -> Vec<wick_session::ModeTransitionSnapshot> {
        self.modes.history(&self.sessions.current().id)
    }

    pub fn context_status(&self) -> ContextStatus {
        self.sync_pool_tokens();
        let session = self.sessions.current();
        ContextStatus {
            usage: self.pool.usage(),
            tier: self.prompts.tier(),
            session_id: session.id.clone(),
            model: session.model.clone(),
            checkpoint_count: session.checkpoints.len(),
            compression_count: session.metadata.compression_count,
        }
    }

    /// `/new`: rotate the session id; the runtime side starts empty.
    pub fn new_session(&mut self) -> anyhow::Result<String> {
        let id = self.sessions.rotate()?.id.clone();
        self.sync_pool_tokens();
        Ok(id)
    }

    /// `/clear`: drop live messages, keep the system prompt, the session
    /// id, and accumulated checkpoints.
    pub fn clear_messages(&mut self) -> anyhow::Result<()> {
        self.sessions.current_mut().clear_messages();
        self.sessions.persist()?;
        self.sync_pool_tokens();
        Ok(())
    }

    /// `/context compress`: force a normal compression pass now.
    pub async fn compress_now(&mut self, tx: mpsc::Sender<AgentEvent>) -> anyhow::Result<()> {
        self.sync_pool_tokens();
        self.run_compression(CompressionAction::Normal, &tx).await
    }

    /// `/context snapshot`: write a rollback-point snapshot, returning
    /// its id.
    pub async fn snapshot_now(&mut self) -> anyhow::Result<String> {
        let snapshot = Snapshot::of(self.sessions.current(), SnapshotPurpose::Rollback);
        self.snapshots
            .save(&snapshot, &self.settings.snapshots)
            .await
            .map_err(|e| anyhow::anyhow!(RuntimeError::SnapshotIo(e.to_string())))?;
        Ok(snapshot.id)
    }

    /// `/context restore <id>`: replace live state with a snapshot's.
    pub async fn restore_snapshot(&mut self, id: &str) -> anyhow::Result<()> {
        let session_id = self.sessions.current().id.clone();
        let snapshot = match self.snapshots.load(&session_id, id) {
            Ok(snapshot) => snapshot,
            Err(_) => match &self.last_emergency {
                Some(kept) if kept.id == id => kept.clone(),
                _ => anyhow::bail!("snapshot not found: {id}"),
            },
        };
        self.sessions
            .current_mut()
            .restore(snapshot.conversation_state);
        self.sessions.persist()?;
        self.sync_pool_tokens();
        info!(id, "snapshot restored");
        Ok(())
    }

    /// `/mode <name>`: explicit mode switch with a transition record.
    pub fn set_mode(&mut self, mode: Mode, findings: Option<String>) -> anyhow::Result<bool> {
        let session_id = self.sessions.current().id.clone();
        let recent: Vec<MessageRecord> = self.sessions.current().messages.view().to_vec();
        let tools = self.tools.names_for_mode(self.modes.current());
        let changed = self.modes.switch(
            mode,
            &session_id,
            &recent,
            tools,
            findings,
            &self.settings.snapshots,
        )?;
        if changed {
            self.prompts.set_mode(mode);
            self.refresh_system_message();
        }
        Ok(changed)
    }

    /// Swap the model backend.  Closes the current session, opens a
    /// fresh one bound to the new model, re-sizes the pool, and returns
    /// the confirmation line for the chat log.
    pub async fn swap_model(
        &mut self,
        provider: Arc<dyn ProviderAdapter>,
    ) -> anyhow::Result<String> {
        self.profile = provider.profile();
        self.provider = provider;
        self.sessions.swap_model(self.provider.model())?;

        let user_size = Self::initial_user_size(&self.settings, &self.profile).await;
        self.resize_user_budget(user_size).await;
        self.sync_pool_tokens();

        Ok(format!(
            "Loaded {} with {} tokens context.",
            self.provider.model(),
            user_size
        ))
    }

    /// Clean shutdown: `session_end` hook, then mark the session closed.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        let session_id = self.sessions.current().id.clone();
        self.hooks
            .dispatch(
                HookEvent::SessionEnd,
                serde_json::json!({ "session_id": session_id }),
                None,
            )
            .await;
        self.sessions.shutdown()
    }
}

fn is_cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    // A dropped sender counts as cancellation too, matching Ctrl-C paths
    // where the UI tears the channel down instead of sending.
    !matches!(
        cancel.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}
