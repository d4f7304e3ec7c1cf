// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    profile::ModelProfile, provider::ChatStream, ChatEvent, ChatRequest, FinishReason,
    ProviderAdapter,
};

/// Deterministic provider that echoes the last user message back.  The
/// default backend for the headless driver when no real model is wired
/// up, and a quick connectivity check in tests.
pub struct EchoProvider {
    model: String,
}

impl EchoProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for EchoProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, req: ChatRequest) -> anyhow::Result<ChatStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == crate::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".into());
        let events: Vec<anyhow::Result<ChatEvent>> = vec![
            Ok(ChatEvent::Text(format!("MOCK: {reply}"))),
            Ok(ChatEvent::Finish(FinishReason::Stop)),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted provider for tests.  Each call to `stream_chat` pops the
/// next event script from the front of the queue, so tests can specify
/// exact streams — tool calls, reasoning, mid-stream errors — without any
/// backend running.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<ChatEvent>>>>,
    model: String,
    profile: ModelProfile,
    /// Every `ChatRequest` seen, in call order, so tests can inspect what
    /// was actually sent (system prompt, message window, tool schemas).
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of per-call event scripts.
    pub fn new(scripts: Vec<Vec<ChatEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            model: "scripted-mock".into(),
            profile: ModelProfile {
                family: "scripted-mock".into(),
                supports_tools: true,
                ..ModelProfile::default()
            },
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Override the profile reported to callers (tier breakpoints, window,
    /// reasoning capabilities).
    pub fn with_profile(mut self, profile: ModelProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Convenience: a provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            ChatEvent::Text(reply.into()),
            ChatEvent::Finish(FinishReason::Stop),
        ]])
    }

    /// Convenience: a tool call on the first round, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ChatEvent::ToolCall {
                    id: tool_id.into(),
                    name: tool_name.into(),
                    args,
                },
                ChatEvent::Finish(FinishReason::ToolCalls),
            ],
            vec![
                ChatEvent::Text(final_text.into()),
                ChatEvent::Finish(FinishReason::Stop),
            ],
        ])
    }

    /// Convenience: a provider that emits the same tool call on every round,
    /// forever.  Used to exercise the loop-limit.
    pub fn endless_tool_calls(tool_name: impl Into<String>) -> Self {
        let name = tool_name.into();
        // 64 rounds is far beyond any sane loop-limit setting.
        let scripts = (0..64)
            .map(|i| {
                vec![
                    ChatEvent::ToolCall {
                        id: format!("call-{i}"),
                        name: name.clone(),
                        args: serde_json::json!({}),
                    },
                    ChatEvent::Finish(FinishReason::ToolCalls),
                ]
            })
            .collect();
        Self::new(scripts)
    }

    /// Number of calls the provider has received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The most recent request, cloned out for inspection.
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn profile(&self) -> ModelProfile {
        self.profile.clone()
    }

    async fn stream_chat(&self, req: ChatRequest) -> anyhow::Result<ChatStream> {
        self.requests.lock().unwrap().push(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Fallback once all scripts are consumed.
                vec![
                    ChatEvent::Text("[no more scripts]".into()),
                    ChatEvent::Finish(FinishReason::Stop),
                ]
            } else {
                scripts.remove(0)
            }
        };
        let items: Vec<anyhow::Result<ChatEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let provider = ScriptedProvider::new(vec![
            vec![ChatEvent::Text("one".into()), ChatEvent::Finish(FinishReason::Stop)],
            vec![ChatEvent::Text("two".into()), ChatEvent::Finish(FinishReason::Stop)],
        ]);

        for expected in ["one", "two"] {
            let mut stream = provider.stream_chat(ChatRequest::default()).await.unwrap();
            match stream.next().await.unwrap().unwrap() {
                ChatEvent::Text(t) => assert_eq!(t, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let provider = ScriptedProvider::always_text("hi");
        let req = ChatRequest {
            model: "m".into(),
            system: "sys".into(),
            ..ChatRequest::default()
        };
        let _ = provider.stream_chat(req).await.unwrap();
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.last_request().unwrap().system, "sys");
    }

    #[tokio::test]
    async fn exhausted_scripts_fall_back() {
        let provider = ScriptedProvider::new(vec![]);
        let mut stream = provider.stream_chat(ChatRequest::default()).await.unwrap();
        match stream.next().await.unwrap().unwrap() {
            ChatEvent::Text(t) => assert!(t.contains("no more scripts")),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
