// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The [`Summarizer`] capability implemented over the active provider.
//!
//! Summarization calls are plain tool-free completions with a
//! level-specific system prompt; think regions in the output are
//! stripped so the checkpoint stores only the summary itself.

use std::sync::Arc;

use futures::StreamExt;

use wick_context::{CompressionLevel, Summarizer};
use wick_model::{ChatEvent, ChatRequest, Goal, MessageRecord, ProviderAdapter};

use crate::prompts::summarization_prompt;
use crate::reasoning::ReasoningParser;

pub struct ProviderSummarizer {
    provider: Arc<dyn ProviderAdapter>,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn ProviderAdapter>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(
        &self,
        text: &str,
        level: CompressionLevel,
        goal: Option<&Goal>,
    ) -> anyhow::Result<String> {
        let profile = self.provider.profile();
        let reasoning_capable = profile.emits_structured_reasoning || profile.uses_think_markers;

        let req = ChatRequest {
            model: self.provider.model().to_string(),
            system: summarization_prompt(level, goal, reasoning_capable),
            messages: vec![MessageRecord::user(text)],
            tools: Vec::new(),
            options: Default::default(),
        };

        let mut stream = self.provider.stream_chat(req).await?;
        let mut parser = ReasoningParser::new();
        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ChatEvent::Text(delta) => {
                    summary.push_str(&parser.feed_text(&delta).visible);
                }
                // Reasoning output is not part of the summary.
                ChatEvent::Reasoning(_) => {}
                ChatEvent::ToolCall { .. } => {}
                ChatEvent::Finish(_) => break,
                ChatEvent::Error { code, message } => {
                    anyhow::bail!("summarization stream error ({code}): {message}");
                }
            }
        }
        let (trailing, _) = parser.finish();
        summary.push_str(&trailing);
        Ok(summary.trim().to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wick_model::{mock::ScriptedProvider, FinishReason};

    #[tokio::test]
    async fn collects_text_and_strips_think_regions() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            ChatEvent::Text("<think>how to compress this</think>".into()),
            ChatEvent::Text("A tight summary.".into()),
            ChatEvent::Finish(FinishReason::Stop),
        ]]));
        let summarizer = ProviderSummarizer::new(provider.clone());
        let out = summarizer
            .summarize("long history", CompressionLevel::Detailed, None)
            .await
            .unwrap();
        assert_eq!(out, "A tight summary.");

        // The history text was sent as the user message.
        let req = provider.last_request().unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].content, "long history");
        assert!(req.tools.is_empty(), "summarization must be tool-free");
    }

    #[tokio::test]
    async fn stream_error_is_surfaced() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![ChatEvent::Error {
            code: "503".into(),
            message: "overloaded".into(),
        }]]));
        let summarizer = ProviderSummarizer::new(provider);
        let err = summarizer
            .summarize("history", CompressionLevel::Compact, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }
}
