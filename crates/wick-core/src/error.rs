// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;

/// Typed failure taxonomy for the runtime.  Each variant maps onto a
/// single structured [`FailureEvent`] surfaced to the UI; presentation is
/// the UI's problem.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Network drop, 5xx, disconnect.  The agent loop retries the turn
    /// once with backoff before surfacing this.
    #[error("provider transient failure: {0}")]
    ProviderTransient(String),
    /// Schema mismatch or malformed tool-call payload from the backend.
    /// Fails the turn fast; checkpoints are never mutated.
    #[error("provider protocol violation: {0}")]
    ProviderProtocol(String),
    /// A tool returned an error.  Recorded as a tool message; the loop
    /// continues and the model may recover.
    #[error("tool '{tool}' failed: {detail}")]
    ToolExecution { tool: String, detail: String },
    /// Pre-send validation failed with the budget fully exhausted.
    #[error("context overflow: {current} tokens against a {budget}-token budget")]
    ContextOverflow { current: usize, budget: usize },
    /// Summarization produced inflated or invalid output.
    #[error("compression failed: {0}")]
    CompressionFailure(String),
    /// Hook exited non-zero, timed out, or broke the reply protocol.
    #[error("hook failure: {0}")]
    HookFailure(String),
    /// Command not whitelisted or approval pending.
    #[error("hook refused: {0}")]
    HookTrust(String),
    /// Snapshot write or read failed.
    #[error("snapshot i/o failed: {0}")]
    SnapshotIo(String),
    /// Cooperative cancellation.  Terminates the turn cleanly; not an
    /// error for accounting purposes.
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderTransient,
    ProviderProtocol,
    ToolExecution,
    ContextOverflow,
    CompressionFailure,
    HookFailure,
    HookTrust,
    SnapshotIo,
    Cancelled,
}

/// The single structured event surfaced per failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub kind: ErrorKind,
    pub recoverable: bool,
    pub user_message: String,
    pub detail: String,
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::ProviderTransient(_) => ErrorKind::ProviderTransient,
            RuntimeError::ProviderProtocol(_) => ErrorKind::ProviderProtocol,
            RuntimeError::ToolExecution { .. } => ErrorKind::ToolExecution,
            RuntimeError::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            RuntimeError::CompressionFailure(_) => ErrorKind::CompressionFailure,
            RuntimeError::HookFailure(_) => ErrorKind::HookFailure,
            RuntimeError::HookTrust(_) => ErrorKind::HookTrust,
            RuntimeError::SnapshotIo(_) => ErrorKind::SnapshotIo,
            RuntimeError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn recoverable(&self) -> bool {
        !matches!(self, RuntimeError::ProviderProtocol(_))
    }

    pub fn failure_event(&self) -> FailureEvent {
        let user_message = match self {
            RuntimeError::ProviderTransient(_) => {
                "The model backend dropped the connection. Retried once; try again.".to_string()
            }
            RuntimeError::ProviderProtocol(_) => {
                "The model backend sent a malformed response; this turn was abandoned.".to_string()
            }
            RuntimeError::ToolExecution { tool, .. } => {
                format!("Tool '{tool}' reported an error; the model will see it.")
            }
            RuntimeError::ContextOverflow { .. } => {
                "The context budget is exhausted; an emergency rollover was performed.".to_string()
            }
            RuntimeError::CompressionFailure(_) => {
                "Compression produced unusable output; falling back to truncation.".to_string()
            }
            RuntimeError::HookFailure(_) => "A hook failed.".to_string(),
            RuntimeError::HookTrust(_) => {
                "A hook was refused: not approved or not whitelisted.".to_string()
            }
            RuntimeError::SnapshotIo(_) => "A snapshot could not be written.".to_string(),
            RuntimeError::Cancelled => "Turn cancelled.".to_string(),
        };
        FailureEvent {
            kind: self.kind(),
            recoverable: self.recoverable(),
            user_message,
            detail: self.to_string(),
        }
    }
}

/// Classify a provider error string as transient (retry once) or not.
pub fn is_transient_provider_error(code: &str, message: &str) -> bool {
    let code = code.to_ascii_lowercase();
    let message = message.to_ascii_lowercase();
    code.starts_with('5')
        || code == "timeout"
        || code == "network"
        || message.contains("connection reset")
        || message.contains("connection refused")
        || message.contains("timed out")
        || message.contains("temporarily unavailable")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping_is_exhaustive() {
        assert_eq!(
            RuntimeError::ProviderTransient("x".into()).kind(),
            ErrorKind::ProviderTransient
        );
        assert_eq!(RuntimeError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            RuntimeError::ContextOverflow { current: 10, budget: 5 }.kind(),
            ErrorKind::ContextOverflow
        );
    }

    #[test]
    fn protocol_errors_are_not_recoverable() {
        assert!(!RuntimeError::ProviderProtocol("bad json".into()).recoverable());
        assert!(RuntimeError::ProviderTransient("503".into()).recoverable());
        assert!(RuntimeError::Cancelled.recoverable());
    }

    #[test]
    fn failure_event_carries_kind_and_detail() {
        let err = RuntimeError::ToolExecution {
            tool: "shell".into(),
            detail: "exit 127".into(),
        };
        let event = err.failure_event();
        assert_eq!(event.kind, ErrorKind::ToolExecution);
        assert!(event.recoverable);
        assert!(event.detail.contains("exit 127"));
        assert!(event.user_message.contains("shell"));
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient_provider_error("503", ""));
        assert!(is_transient_provider_error("timeout", ""));
        assert!(is_transient_provider_error("", "Connection reset by peer"));
        assert!(!is_transient_provider_error("400", "bad request"));
        assert!(!is_transient_provider_error("schema", "missing field"));
    }
}
