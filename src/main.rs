// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use wick_core::{Agent, AgentEvent};
use wick_hooks::HookEngine;
use wick_model::mock::{EchoProvider, ScriptedProvider};
use wick_model::{ChatEvent, FinishReason, ProviderAdapter};
use wick_tools::builtin::{ClockTool, EchoTool};
use wick_tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let state_root = cli
        .state_dir
        .clone()
        .unwrap_or_else(wick_config::state_root);
    std::fs::create_dir_all(&state_root)
        .with_context(|| format!("creating state root {}", state_root.display()))?;

    let settings = wick_config::load(cli.settings.as_deref())?;

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::ShowSettings => {
                println!("{}", serde_json::to_string_pretty(&settings)?);
                return Ok(());
            }
            Commands::Sessions => {
                let dir = state_root.join("sessions");
                if let Ok(read) = std::fs::read_dir(&dir) {
                    let mut names: Vec<String> = read
                        .flatten()
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect();
                    names.sort();
                    for name in names {
                        println!("{name}");
                    }
                }
                return Ok(());
            }
        }
    }

    let provider = build_provider(&cli)?;
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(ClockTool);

    let workspace = std::env::current_dir().ok();
    let hooks = Arc::new(HookEngine::open(
        &state_root,
        workspace.as_deref(),
        settings.hooks.clone(),
    ));

    let mut agent = Agent::new(provider, Arc::new(tools), hooks, settings, state_root).await?;
    if let Some(mode) = cli.mode {
        agent.set_mode(mode, None)?;
    }

    repl(&mut agent).await?;
    agent.shutdown().await?;
    Ok(())
}

fn build_provider(cli: &Cli) -> anyhow::Result<Arc<dyn ProviderAdapter>> {
    match &cli.replies {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading replies file {}", path.display()))?;
            let replies: Vec<String> = serde_json::from_str(&text)
                .with_context(|| format!("parsing replies file {}", path.display()))?;
            let scripts = replies
                .into_iter()
                .map(|reply| {
                    vec![ChatEvent::Text(reply), ChatEvent::Finish(FinishReason::Stop)]
                })
                .collect();
            Ok(Arc::new(
                ScriptedProvider::new(scripts).with_model_name(cli.model.clone()),
            ))
        }
        None => Ok(Arc::new(EchoProvider::new(cli.model.clone()))),
    }
}

/// Minimal headless REPL: plain lines become turns; slash commands map to
/// the runtime's typed command surface.  The interactive TUI lives
/// elsewhere; this driver exists for smoke tests and piping.
async fn repl(agent: &mut Agent) -> anyhow::Result<()> {
    let status = agent.context_status();
    println!(
        "wick: {} | session {} | {} tokens ({} tier)",
        status.model, status.session_id, status.usage.user_size, status.tier
    );

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/new" => {
                let id = agent.new_session()?;
                println!("[wick] new session {id}");
            }
            "/clear" => {
                agent.clear_messages()?;
                println!("[wick] messages cleared");
            }
            "/context" => {
                let s = agent.context_status();
                println!(
                    "[wick] {} / {} user tokens ({:.0}%), {} provider ({:.0}%), \
                     {} checkpoints, {} compressions",
                    s.usage.current,
                    s.usage.user_size,
                    s.usage.percent_of_user * 100.0,
                    s.usage.provider_size,
                    s.usage.percent_of_provider * 100.0,
                    s.checkpoint_count,
                    s.compression_count
                );
            }
            "/context compress" => {
                let (tx, mut rx) = mpsc::channel(64);
                agent.compress_now(tx).await?;
                print_events(&mut rx);
            }
            "/context snapshot" => match agent.snapshot_now().await {
                Ok(id) => println!("[wick] snapshot {id}"),
                Err(e) => eprintln!("[wick] snapshot failed: {e}"),
            },
            other if other.starts_with("/context restore ") => {
                let id = other.trim_start_matches("/context restore ").trim();
                match agent.restore_snapshot(id).await {
                    Ok(()) => println!("[wick] restored {id}"),
                    Err(e) => eprintln!("[wick] restore failed: {e}"),
                }
            }
            other if other.starts_with("/mode ") => {
                let name = other.trim_start_matches("/mode ").trim();
                match name.parse() {
                    Ok(mode) => match agent.set_mode(mode, None) {
                        Ok(true) => println!("[wick] mode: {mode}"),
                        Ok(false) => println!("[wick] already in {mode}"),
                        Err(e) => eprintln!("[wick] {e}"),
                    },
                    Err(e) => eprintln!("[wick] {e}"),
                }
            }
            other if other.starts_with('/') => {
                eprintln!("[wick] unknown command: {other}");
            }
            input => {
                run_turn(agent, input).await?;
            }
        }
    }
    Ok(())
}

/// Drive one turn, printing events as they stream.  Ctrl-C fires the
/// turn's cancel token; the partial response is kept.
async fn run_turn(agent: &mut Agent, input: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut cancel_tx = Some(cancel_tx);

    let submit = agent.submit_with_cancel(input, tx, cancel_rx);
    tokio::pin!(submit);

    loop {
        tokio::select! {
            result = &mut submit => {
                print_events(&mut rx);
                println!();
                return result;
            }
            Some(event) = rx.recv() => print_event(event),
            _ = tokio::signal::ctrl_c(), if cancel_tx.is_some() => {
                if let Some(tx) = cancel_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    }
}

fn print_events(rx: &mut mpsc::Receiver<AgentEvent>) {
    while let Ok(event) = rx.try_recv() {
        print_event(event);
    }
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::TextDelta(t) => {
            print!("{t}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ReasoningDelta(_) => {}
        AgentEvent::ReasoningComplete(block) => {
            eprintln!("[thinking: {} tokens, collapsed]", block.token_count.unwrap_or(0));
        }
        AgentEvent::ToolCallStarted { name, .. } => eprintln!("[tool {name} …]"),
        AgentEvent::ToolCallFinished { name, is_error, .. } => {
            eprintln!("[tool {name} {}]", if is_error { "failed" } else { "done" });
        }
        AgentEvent::ContextCompacted {
            tokens_before,
            tokens_after,
            ..
        } => eprintln!("[context compacted: {tokens_before} → {tokens_after} tokens]"),
        AgentEvent::ContextWarning { percent_of_provider } => {
            eprintln!("[context {:.0}% full]", percent_of_provider * 100.0);
        }
        AgentEvent::MemoryPressure(level) => eprintln!("[memory pressure: {level}]"),
        AgentEvent::SnapshotWritten { id, purpose } => eprintln!("[snapshot {purpose}: {id}]"),
        AgentEvent::SessionRolledOver { .. } => {}
        AgentEvent::SystemMessage(msg) => eprintln!("[wick] {msg}"),
        AgentEvent::ModeChanged(mode) => eprintln!("[mode: {mode}]"),
        AgentEvent::Aborted { .. } => eprintln!("\n[cancelled]"),
        AgentEvent::Failure(f) => eprintln!("[{:?}] {}", f.kind, f.user_message),
        AgentEvent::TokenUsage { .. }
        | AgentEvent::TextComplete(_)
        | AgentEvent::TurnComplete => {}
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("WICK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "info" } else { "warn" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
