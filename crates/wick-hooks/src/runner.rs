// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sandboxed hook execution.
//!
//! One invocation = one short-lived process: the event object goes in as
//! a single line of JSON on stdin, the reply comes back as a single line
//! of JSON on stdout.  Only whitelisted interpreters are ever spawned,
//! and the check happens before spawn — a refused command creates no
//! process.  Hooks run with a scrubbed environment (PATH only) unless
//! they opt into passthrough, in their own session so they cannot reach
//! the controlling terminal, under a hard timeout with a SIGTERM →
//! SIGKILL grace window.

use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use wick_config::HookSettings;

use crate::planner::ExecutionPlan;
use crate::types::{
    ExecutionState, HookDefinition, HookEvent, HookExecution, HookReply, WireEvent,
};

/// Interpreters a hook command may name.  Matched against the command's
/// final path component.
pub const COMMAND_WHITELIST: [&str; 7] = ["node", "python", "python3", "bash", "sh", "npx", "uvx"];

/// Cap on captured stderr diagnostics.
const STDERR_CAP_BYTES: u64 = 64 * 1024;

pub fn command_allowed(command: &str) -> bool {
    let base = std::path::Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    COMMAND_WHITELIST.contains(&base.as_str())
}

fn execution(hook_id: &str, state: ExecutionState) -> HookExecution {
    HookExecution {
        id: format!("exec-{}", Uuid::new_v4()),
        hook_id: hook_id.into(),
        state,
        started_at: Utc::now(),
        finished_at: None,
        reply: None,
        stderr: String::new(),
    }
}

/// Run a single hook to completion.
///
/// The definition's `trust` field is the *effective* trust as evaluated
/// by the trust store; a pending level is refused here without a spawn,
/// as is a command outside the whitelist.
pub async fn run_hook(
    def: &HookDefinition,
    event: HookEvent,
    data: &serde_json::Value,
    settings: &HookSettings,
) -> HookExecution {
    let mut exec = execution(&def.id, ExecutionState::Queued);

    if def.trust.is_pending() {
        warn!(hook = %def.name, trust = ?def.trust, "hook blocked: approval pending");
        exec.state = ExecutionState::BlockedByTrust;
        exec.finished_at = Some(Utc::now());
        return exec;
    }
    if !command_allowed(&def.command) {
        warn!(hook = %def.name, command = %def.command, "hook blocked: command not whitelisted");
        exec.state = ExecutionState::BlockedByTrust;
        exec.finished_at = Some(Utc::now());
        return exec;
    }

    let mut cmd = Command::new(&def.command);
    cmd.args(&def.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !def.env_passthrough {
        // Scrubbed environment: hooks inherit no secrets by default.
        // PATH survives so the interpreter can resolve its own helpers.
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
    }
    // Detach from the controlling terminal; a hook must not be able to
    // write escape sequences into the UI.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(hook = %def.name, error = %e, "hook spawn failed");
            exec.state = ExecutionState::Failed;
            exec.stderr = format!("spawn failed: {e}");
            exec.finished_at = Some(Utc::now());
            return exec;
        }
    };
    exec.state = ExecutionState::Running;

    let wire = WireEvent {
        event: event.as_str().to_string(),
        data: data.clone(),
    };
    let mut line = serde_json::to_string(&wire).unwrap_or_default();
    line.push('\n');

    let mut stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let cap = settings.reply_cap_bytes as u64;

    let exchange = async {
        if let Some(ref mut pipe) = stdin {
            let _ = pipe.write_all(line.as_bytes()).await;
        }
        drop(stdin.take());

        let mut out = Vec::new();
        if let Some(pipe) = stdout {
            let _ = pipe.take(cap + 1).read_to_end(&mut out).await;
        }
        let mut err = Vec::new();
        if let Some(pipe) = stderr {
            let _ = pipe.take(STDERR_CAP_BYTES).read_to_end(&mut err).await;
        }
        let status = child.wait().await;
        (out, err, status)
    };

    let timeout = Duration::from_millis(settings.timeout_ms);
    match tokio::time::timeout(timeout, exchange).await {
        Ok((out, err, status)) => {
            exec.stderr = String::from_utf8_lossy(&err).into_owned();
            exec.finished_at = Some(Utc::now());
            let code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
            if code != 0 {
                warn!(hook = %def.name, code, "hook exited non-zero");
                exec.state = ExecutionState::Failed;
                return exec;
            }
            if out.len() as u64 > cap {
                warn!(hook = %def.name, bytes = out.len(), "hook reply exceeds size cap");
                exec.state = ExecutionState::Failed;
                return exec;
            }
            match parse_reply(&out) {
                Some(reply) => {
                    debug!(hook = %def.name, continue_ = reply.continue_, "hook reply");
                    exec.reply = Some(reply);
                    exec.state = ExecutionState::Succeeded;
                }
                None => {
                    warn!(hook = %def.name, "hook produced no valid single-line JSON reply");
                    exec.state = ExecutionState::Failed;
                }
            }
            exec
        }
        Err(_) => {
            warn!(hook = %def.name, timeout_ms = settings.timeout_ms, "hook timed out");
            terminate(&mut child, Duration::from_millis(settings.kill_grace_ms)).await;
            exec.state = ExecutionState::TimedOut;
            exec.finished_at = Some(Utc::now());
            exec
        }
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL whatever is left.
async fn terminate(child: &mut tokio::process::Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    tokio::time::sleep(grace).await;
    if child.try_wait().ok().flatten().is_none() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Strict line protocol: exactly one JSON object, nothing else on stdout.
fn parse_reply(stdout: &[u8]) -> Option<HookReply> {
    let text = std::str::from_utf8(stdout).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.lines().count() != 1 {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Outcome of dispatching one event through a full plan.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub executions: Vec<HookExecution>,
    /// False when a blocking event was vetoed; later batches did not run.
    pub continue_: bool,
    /// Concatenated `systemMessage` strings from successful replies.
    pub system_messages: Vec<String>,
}

/// Execute a plan: batches in order, hooks within a batch concurrently.
/// A veto on a blocking event stops execution of the remaining batches
/// (hooks already running are never killed early; they are bounded by
/// their own timeout).
pub async fn run_plan(
    plan: &ExecutionPlan,
    event: HookEvent,
    data: &serde_json::Value,
    settings: &HookSettings,
) -> PlanOutcome {
    let blocking = event.is_blocking();
    let mut outcome = PlanOutcome {
        continue_: true,
        ..PlanOutcome::default()
    };

    for batch in &plan.batches {
        let runs = batch
            .iter()
            .map(|def| run_hook(def, event, data, settings));
        let executions = futures::future::join_all(runs).await;

        for exec in executions {
            if let Some(reply) = &exec.reply {
                if let Some(msg) = &reply.system_message {
                    if !msg.is_empty() {
                        outcome.system_messages.push(msg.clone());
                    }
                }
            }
            if !exec.effective_continue(blocking) {
                outcome.continue_ = false;
            }
            outcome.executions.push(exec);
        }

        if !outcome.continue_ {
            break;
        }
    }
    outcome
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
