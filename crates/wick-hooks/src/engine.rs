// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One-stop hook dispatch: registry → trust evaluation → planner →
//! runner, behind a single `dispatch` call the agent loop can use at
//! each lifecycle point.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use wick_config::HookSettings;

use crate::planner::{plan, RateLimiter};
use crate::registry::HookRegistry;
use crate::runner::{run_plan, PlanOutcome};
use crate::trust::TrustStore;
use crate::types::{HookDefinition, HookEvent, HookSource, TrustLevel};

pub struct HookEngine {
    registry: HookRegistry,
    trust: Mutex<TrustStore>,
    limiter: RateLimiter,
    settings: HookSettings,
}

impl HookEngine {
    /// Build the engine from the state root: loads `hooks.json` from the
    /// user scope and `.wick/hooks.json` from the workspace, and opens
    /// the approval ledger.
    pub fn open(
        state_root: impl Into<PathBuf>,
        workspace_dir: Option<&std::path::Path>,
        settings: HookSettings,
    ) -> Self {
        let state_root = state_root.into();
        let mut registry = HookRegistry::new();
        registry.load_file(&state_root.join("hooks.json"), HookSource::User);
        if let Some(ws) = workspace_dir {
            registry.load_file(&ws.join(".wick").join("hooks.json"), HookSource::Workspace);
        }
        let limiter = RateLimiter::new(settings.global_rate_limit_per_min);
        Self {
            registry,
            trust: Mutex::new(TrustStore::open(state_root)),
            limiter,
            settings,
        }
    }

    /// Engine with an explicit registry (tests, embedders).
    pub fn with_registry(
        registry: HookRegistry,
        state_root: impl Into<PathBuf>,
        settings: HookSettings,
    ) -> Self {
        let limiter = RateLimiter::new(settings.global_rate_limit_per_min);
        Self {
            registry,
            trust: Mutex::new(TrustStore::open(state_root)),
            limiter,
            settings,
        }
    }

    pub fn registry_mut(&mut self) -> &mut HookRegistry {
        &mut self.registry
    }

    /// Record an explicit user approval for a registered hook.
    pub fn approve(&self, hook_id: &str) -> anyhow::Result<bool> {
        let Some(def) = self.registry.all().iter().find(|h| h.id == hook_id) else {
            return Ok(false);
        };
        self.trust.lock().unwrap().approve(def)?;
        Ok(true)
    }

    /// Dispatch one lifecycle event.  `file` feeds the per-hook pattern
    /// filter for tool events.  With hooks disabled this is a cheap
    /// always-continue no-op.
    pub async fn dispatch(
        &self,
        event: HookEvent,
        data: serde_json::Value,
        file: Option<&str>,
    ) -> PlanOutcome {
        if !self.settings.enabled {
            return PlanOutcome {
                continue_: true,
                ..PlanOutcome::default()
            };
        }

        // Stamp effective trust onto each candidate before planning.
        let candidates: Vec<HookDefinition> = {
            let trust = self.trust.lock().unwrap();
            self.registry
                .hooks_for_event(event)
                .into_iter()
                .map(|mut def| {
                    def.trust = trust.evaluate(&def, &self.settings);
                    def
                })
                .collect()
        };
        if candidates.is_empty() {
            return PlanOutcome {
                continue_: true,
                ..PlanOutcome::default()
            };
        }

        let plan = plan(&candidates, event, file, &self.limiter);
        debug!(event = %event, hooks = plan.hook_count(), "dispatching hooks");
        let outcome = run_plan(&plan, event, &data, &self.settings).await;

        // Remember content hashes of user hooks that actually ran, so a
        // later edit to the hook is detected as a trust change.
        {
            let mut trust = self.trust.lock().unwrap();
            for def in &candidates {
                if def.trust == TrustLevel::User
                    && outcome
                        .executions
                        .iter()
                        .any(|e| e.hook_id == def.id && e.state != crate::types::ExecutionState::BlockedByTrust)
                {
                    let _ = trust.record_seen(def);
                }
            }
        }
        outcome
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionState;

    fn sh_def(name: &str, event: HookEvent, script: &str, source: HookSource) -> HookDefinition {
        HookDefinition {
            id: name.into(),
            name: name.into(),
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            event_type: event,
            file_pattern: None,
            trust: TrustLevel::User,
            enabled: true,
            source,
            rate_limit_per_min: None,
            depends_on: vec![],
            env_passthrough: false,
        }
    }

    #[tokio::test]
    async fn dispatch_runs_matching_hook_and_collects_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HookRegistry::new();
        registry.add(sh_def(
            "greeter",
            HookEvent::SessionStart,
            r#"cat >/dev/null; printf '{"continue": true, "systemMessage": "hook says hi"}\n'"#,
            HookSource::User,
        ));
        let engine = HookEngine::with_registry(registry, dir.path(), HookSettings::default());

        let outcome = engine
            .dispatch(HookEvent::SessionStart, serde_json::json!({}), None)
            .await;
        assert!(outcome.continue_);
        assert_eq!(outcome.system_messages, vec!["hook says hi"]);
    }

    #[tokio::test]
    async fn workspace_hook_is_blocked_until_approved() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HookRegistry::new();
        registry.add(sh_def(
            "ws-check",
            HookEvent::BeforeTool,
            r#"cat >/dev/null; printf '{"continue": true}\n'"#,
            HookSource::Workspace,
        ));
        let engine = HookEngine::with_registry(registry, dir.path(), HookSettings::default());

        let outcome = engine
            .dispatch(HookEvent::BeforeTool, serde_json::json!({}), None)
            .await;
        assert_eq!(outcome.executions.len(), 1);
        assert_eq!(outcome.executions[0].state, ExecutionState::BlockedByTrust);
        // Blocked-by-trust on a blocking event maps to continue:false.
        assert!(!outcome.continue_);

        engine.approve("ws-check").unwrap();
        let outcome = engine
            .dispatch(HookEvent::BeforeTool, serde_json::json!({}), None)
            .await;
        assert_eq!(outcome.executions[0].state, ExecutionState::Succeeded);
        assert!(outcome.continue_);
    }

    #[tokio::test]
    async fn disabled_engine_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HookRegistry::new();
        registry.add(sh_def(
            "never",
            HookEvent::BeforeTool,
            "exit 1",
            HookSource::User,
        ));
        let engine = HookEngine::with_registry(
            registry,
            dir.path(),
            HookSettings {
                enabled: false,
                ..HookSettings::default()
            },
        );
        let outcome = engine
            .dispatch(HookEvent::BeforeTool, serde_json::json!({}), None)
            .await;
        assert!(outcome.continue_);
        assert!(outcome.executions.is_empty());
    }
}
