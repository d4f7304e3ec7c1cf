// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use wick_config::Mode;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub content: String,
    /// True when the tool failed non-fatally; the agent records the error
    /// as a tool message and lets the model decide how to proceed.
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Trait every tool implements.  Tools are declarative records: a name,
/// a JSON-schema parameter spec, a capability tag for router lookup, the
/// modes they are exposed in, and an execute function.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Capability tag (e.g. "web-search") used by the router.
    fn capability(&self) -> &str;
    /// The modes in which this tool is exposed to the model.
    /// Default: all modes.
    fn modes(&self) -> &[Mode] {
        &[
            Mode::Assistant,
            Mode::Debugger,
            Mode::Architect,
            Mode::Reviewer,
            Mode::Tutor,
        ]
    }
    /// Execute the tool.  Errors are wrapped in [`ToolOutcome::err`].
    async fn execute(&self, call: &ToolInvocation) -> ToolOutcome;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "does very little"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn capability(&self) -> &str {
            "noop"
        }
        async fn execute(&self, call: &ToolInvocation) -> ToolOutcome {
            ToolOutcome::ok(&call.id, "done")
        }
    }

    #[test]
    fn default_modes_cover_all_modes() {
        assert_eq!(MinimalTool.modes().len(), 5);
    }

    #[tokio::test]
    async fn outcome_constructors_set_error_flag() {
        let ok = ToolOutcome::ok("c1", "fine");
        assert!(!ok.is_error);
        let err = ToolOutcome::err("c1", "broke");
        assert!(err.is_error);
        assert_eq!(err.call_id, "c1");
    }
}
