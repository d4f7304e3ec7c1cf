// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent-level tests driven entirely through the scripted provider.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use wick_config::{HookSettings, Mode, Settings};
use wick_hooks::{HookDefinition, HookEngine, HookEvent, HookRegistry, HookSource, TrustLevel};
use wick_model::mock::ScriptedProvider;
use wick_model::{ChatEvent, FinishReason, Role};
use wick_tools::builtin::EchoTool;
use wick_tools::{Tool, ToolInvocation, ToolOutcome, ToolRegistry};

use crate::{Agent, AgentEvent};

/// Tool that counts its executions and always succeeds.
struct CountingTool(Arc<AtomicUsize>);

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "tick"
    }
    fn description(&self) -> &str {
        "counts invocations"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object" })
    }
    fn capability(&self) -> &str {
        "count"
    }
    async fn execute(&self, call: &ToolInvocation) -> ToolOutcome {
        self.0.fetch_add(1, Ordering::SeqCst);
        ToolOutcome::ok(&call.id, "ok")
    }
}

async fn build_agent(
    provider: ScriptedProvider,
    settings: Settings,
    tools: ToolRegistry,
    hook_defs: Vec<HookDefinition>,
    dir: &Path,
) -> (Agent, Arc<ScriptedProvider>) {
    let provider = Arc::new(provider);
    let mut registry = HookRegistry::new();
    for def in hook_defs {
        registry.add(def);
    }
    let hooks = Arc::new(HookEngine::with_registry(
        registry,
        dir,
        HookSettings::default(),
    ));
    let agent = Agent::new(
        provider.clone(),
        Arc::new(tools),
        hooks,
        settings,
        dir.to_path_buf(),
    )
    .await
    .unwrap();
    (agent, provider)
}

fn default_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools
}

fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn sh_hook(name: &str, event: HookEvent, script: &str) -> HookDefinition {
    HookDefinition {
        id: name.into(),
        name: name.into(),
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
        event_type: event,
        file_pattern: None,
        trust: TrustLevel::User,
        enabled: true,
        source: HookSource::User,
        rate_limit_per_min: None,
        depends_on: vec![],
        env_passthrough: false,
    }
}

// ── Plain turns ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_turn_streams_and_stores() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, provider) = build_agent(
        ScriptedProvider::always_text("Hello there."),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, mut rx) = mpsc::channel(256);
    agent.submit("hi", tx).await.unwrap();
    let events = drain(&mut rx);

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::TextDelta(t) if t == "Hello there.")));
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::TextComplete(t) if t == "Hello there.")));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::TurnComplete)));

    let roles: Vec<Role> = agent.session().messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(agent.session().messages.view()[2].content, "Hello there.");
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn system_prompt_reaches_the_provider() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, provider) = build_agent(
        ScriptedProvider::always_text("ok"),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;
    let (tx, _rx) = mpsc::channel(256);
    agent.submit("hi", tx).await.unwrap();

    let req = provider.last_request().unwrap();
    assert!(!req.system.is_empty());
    assert!(req.messages.iter().all(|m| m.role != Role::System));
    assert!(!req.tools.is_empty(), "mode-filtered schemas must be sent");
}

// ── Tool rounds ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_round_executes_and_orders_messages() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, provider) = build_agent(
        ScriptedProvider::tool_then_text("call-1", "echo", json!({"text": "ping"}), "Echoed."),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, mut rx) = mpsc::channel(256);
    agent.submit("please echo ping", tx).await.unwrap();
    let events = drain(&mut rx);

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolCallStarted { name, .. } if name == "echo")));
    assert!(events.iter().any(
        |e| matches!(e, AgentEvent::ToolCallFinished { output, is_error, .. } if output == "ping" && !is_error)
    ));

    let messages = agent.session().messages.view();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );

    // The tool-call record carries its result after execution.
    let call_msg = &messages[2];
    assert_eq!(call_msg.tool_calls.len(), 1);
    assert_eq!(call_msg.tool_calls[0].result.as_deref(), Some("ping"));
    assert!(call_msg.tool_calls[0].error.is_none());

    let tool_msg = &messages[3];
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(tool_msg.content, "ping");

    assert_eq!(messages[4].content, "Echoed.");
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn failing_tool_is_recorded_and_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    // echo without its required argument fails.
    let (mut agent, provider) = build_agent(
        ScriptedProvider::tool_then_text("call-1", "echo", json!({}), "Recovered."),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, mut rx) = mpsc::channel(256);
    agent.submit("go", tx).await.unwrap();
    let events = drain(&mut rx);

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolCallFinished { is_error, .. } if *is_error)));

    let messages = agent.session().messages.view();
    let call_msg = messages.iter().find(|m| !m.tool_calls.is_empty()).unwrap();
    assert!(call_msg.tool_calls[0].error.is_some());
    // The model got the error and produced a final answer.
    assert_eq!(messages.last().unwrap().content, "Recovered.");
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn loop_limit_caps_tool_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(CountingTool(Arc::clone(&counter)));

    let settings = Settings {
        agent: wick_config::AgentSettings {
            max_turns: 3,
            ..Default::default()
        },
        ..Settings::default()
    };
    let (mut agent, _provider) = build_agent(
        ScriptedProvider::endless_tool_calls("tick"),
        settings,
        tools,
        vec![],
        dir.path(),
    )
    .await;

    let (tx, mut rx) = mpsc::channel(1024);
    agent.submit("loop forever", tx).await.unwrap();
    let events = drain(&mut rx);

    assert_eq!(
        counter.load(Ordering::SeqCst),
        3,
        "exactly max_turns tool calls run; the 4th is refused"
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::SystemMessage(m) if m.contains("Loop limit"))));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::TurnComplete)));
    let last = agent.session().messages.view().last().unwrap().clone();
    assert!(last.content.contains("Loop limit"));
}

// ── Reasoning capture ─────────────────────────────────────────────────────────

#[tokio::test]
async fn inline_think_region_becomes_reasoning_block() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, _) = build_agent(
        ScriptedProvider::new(vec![vec![
            ChatEvent::Text("<think>step 1</think>".into()),
            ChatEvent::Text("final answer.".into()),
            ChatEvent::Finish(FinishReason::Stop),
        ]]),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, mut rx) = mpsc::channel(256);
    agent.submit("think first", tx).await.unwrap();
    let events = drain(&mut rx);

    let assistant = agent.session().messages.view().last().unwrap().clone();
    assert_eq!(assistant.content, "final answer.");
    let block = assistant.reasoning.expect("reasoning must be attached");
    assert_eq!(block.content, "step 1");
    assert!(block.complete);

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ReasoningDelta(d) if d.contains("step 1"))));
    assert!(events.iter().any(
        |e| matches!(e, AgentEvent::ReasoningComplete(b) if b.content == "step 1" && b.complete)
    ));
    // Visible stream never contained the think markup.
    assert!(events
        .iter()
        .all(|e| !matches!(e, AgentEvent::TextDelta(t) if t.contains("think"))));
}

#[tokio::test]
async fn structured_reasoning_events_are_captured() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, _) = build_agent(
        ScriptedProvider::new(vec![vec![
            ChatEvent::Reasoning("weighing options".into()),
            ChatEvent::Text("answer".into()),
            ChatEvent::Finish(FinishReason::Stop),
        ]]),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, mut rx) = mpsc::channel(256);
    agent.submit("go", tx).await.unwrap();
    drain(&mut rx);

    let assistant = agent.session().messages.view().last().unwrap().clone();
    assert_eq!(assistant.content, "answer");
    assert_eq!(assistant.reasoning.unwrap().content, "weighing options");
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn pre_resolved_cancel_aborts_without_touching_history() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, provider) = build_agent(
        ScriptedProvider::always_text("never sent"),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (cancel_tx, cancel_rx) = oneshot::channel();
    cancel_tx.send(()).unwrap();

    let (tx, mut rx) = mpsc::channel(256);
    agent
        .submit_with_cancel("doomed", tx, cancel_rx)
        .await
        .unwrap();
    let events = drain(&mut rx);

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::Aborted { partial_text } if partial_text.is_empty())));
    assert!(agent.session().messages.is_empty());
    assert_eq!(provider.call_count(), 0);
}

// ── Hooks in the loop ─────────────────────────────────────────────────────────

#[tokio::test]
async fn before_agent_veto_blocks_the_turn() {
    let dir = tempfile::tempdir().unwrap();
    let veto = sh_hook(
        "gatekeeper",
        HookEvent::BeforeAgent,
        r#"cat >/dev/null; printf '{"continue": false, "systemMessage": "not now"}\n'"#,
    );
    let (mut agent, provider) = build_agent(
        ScriptedProvider::always_text("never"),
        Settings::default(),
        default_tools(),
        vec![veto],
        dir.path(),
    )
    .await;

    let (tx, mut rx) = mpsc::channel(256);
    agent.submit("hello", tx).await.unwrap();
    let events = drain(&mut rx);

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::SystemMessage(m) if m == "not now")));
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::SystemMessage(m) if m.contains("blocked"))));
    assert_eq!(provider.call_count(), 0, "the model must never be called");
    assert!(agent.session().messages.is_empty());
}

#[tokio::test]
async fn before_tool_veto_skips_execution_but_keeps_pairing() {
    let dir = tempfile::tempdir().unwrap();
    let veto = sh_hook(
        "tool-blocker",
        HookEvent::BeforeTool,
        r#"cat >/dev/null; printf '{"continue": false}\n'"#,
    );
    let counter = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(CountingTool(Arc::clone(&counter)));

    let (mut agent, _) = build_agent(
        ScriptedProvider::tool_then_text("call-1", "tick", json!({}), "done"),
        Settings::default(),
        tools,
        vec![veto],
        dir.path(),
    )
    .await;

    let (tx, mut rx) = mpsc::channel(256);
    agent.submit("go", tx).await.unwrap();
    drain(&mut rx);

    assert_eq!(counter.load(Ordering::SeqCst), 0, "vetoed tool must not run");
    // The call still has a paired error result so the transcript stays valid.
    let messages = agent.session().messages.view();
    let call_msg = messages.iter().find(|m| !m.tool_calls.is_empty()).unwrap();
    assert!(call_msg.tool_calls[0].error.as_deref().unwrap().contains("hook"));
    assert!(messages.iter().any(|m| m.role == Role::Tool));
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn model_swap_rotates_session_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, _) = build_agent(
        ScriptedProvider::always_text("first").with_model_name("mA"),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, _rx) = mpsc::channel(256);
    agent.submit("hello on mA", tx).await.unwrap();
    let old_id = agent.session().id.clone();
    assert!(agent.session().messages.len() >= 3);

    let replacement = Arc::new(ScriptedProvider::always_text("second").with_model_name("mB"));
    let confirmation = agent.swap_model(replacement).await.unwrap();

    let status = agent.context_status();
    assert_eq!(
        confirmation,
        format!("Loaded mB with {} tokens context.", status.usage.user_size)
    );
    assert_ne!(agent.session().id, old_id);
    assert_eq!(agent.session().model, "mB");
    assert!(agent.session().messages.is_empty());
    assert!(agent.session().checkpoints.is_empty());

    // The old session is closed on disk.
    let old_path = dir.path().join("sessions").join(format!("{old_id}.json"));
    let old: wick_session::Session =
        serde_json::from_str(&std::fs::read_to_string(old_path).unwrap()).unwrap();
    assert!(old.is_closed());
}

#[tokio::test]
async fn clear_keeps_system_prompt_and_session_id() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, _) = build_agent(
        ScriptedProvider::always_text("reply"),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, _rx) = mpsc::channel(256);
    agent.submit("hello", tx).await.unwrap();
    let id = agent.session().id.clone();

    agent.clear_messages().unwrap();
    assert_eq!(agent.session().id, id);
    assert_eq!(agent.session().messages.len(), 1);
    assert_eq!(agent.session().messages.view()[0].role, Role::System);
}

#[tokio::test]
async fn mode_switch_updates_prompt_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, provider) = build_agent(
        ScriptedProvider::new(vec![
            vec![ChatEvent::Text("a".into()), ChatEvent::Finish(FinishReason::Stop)],
            vec![ChatEvent::Text("b".into()), ChatEvent::Finish(FinishReason::Stop)],
        ]),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, _rx) = mpsc::channel(256);
    agent.submit("hi", tx.clone()).await.unwrap();

    assert!(agent.set_mode(Mode::Debugger, Some("flaky test".into())).unwrap());
    assert_eq!(agent.mode(), Mode::Debugger);

    agent.submit("and now?", tx).await.unwrap();
    let req = provider.last_request().unwrap();
    assert!(req.system.contains("Mode: debugger"));

    let history = agent.mode_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from, Mode::Assistant);
    assert_eq!(history[0].to, Mode::Debugger);
    assert_eq!(history[0].findings.as_deref(), Some("flaky test"));
}

#[tokio::test]
async fn snapshot_and_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (mut agent, _) = build_agent(
        ScriptedProvider::new(vec![
            vec![ChatEvent::Text("one".into()), ChatEvent::Finish(FinishReason::Stop)],
            vec![ChatEvent::Text("two".into()), ChatEvent::Finish(FinishReason::Stop)],
        ]),
        Settings::default(),
        default_tools(),
        vec![],
        dir.path(),
    )
    .await;

    let (tx, _rx) = mpsc::channel(256);
    agent.submit("first", tx.clone()).await.unwrap();
    let snapshot_id = agent.snapshot_now().await.unwrap();
    let saved_len = agent.session().messages.len();

    agent.submit("second", tx).await.unwrap();
    assert!(agent.session().messages.len() > saved_len);

    agent.restore_snapshot(&snapshot_id).await.unwrap();
    assert_eq!(agent.session().messages.len(), saved_len);
}
