// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A pair of small built-in tools.  Real tool surfaces (shell, files,
//! web) are provided by the host application; these exist so a bare
//! runtime has something registered and the loop can be exercised
//! end-to-end.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolInvocation, ToolOutcome};

/// Echoes its `text` argument back.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back verbatim. Useful for connectivity checks."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo back" }
            },
            "required": ["text"],
            "additionalProperties": false
        })
    }

    fn capability(&self) -> &str {
        "echo"
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutcome {
        match call.args.get("text").and_then(|v| v.as_str()) {
            Some(text) => ToolOutcome::ok(&call.id, text),
            None => ToolOutcome::err(&call.id, "missing required 'text' argument"),
        }
    }
}

/// Reports the current UTC time.
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Return the current date and time in UTC (RFC 3339)."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn capability(&self) -> &str {
        "time"
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutcome {
        ToolOutcome::ok(&call.id, chrono::Utc::now().to_rfc3339())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
