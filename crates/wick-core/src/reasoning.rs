// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Incremental reasoning extraction.
//!
//! Reasoning arrives in one of two shapes depending on the backend:
//! structured reasoning deltas, or `<think>…</think>` regions embedded in
//! the text stream.  This parser is a small state machine fed one delta
//! at a time; it separates visible text from reasoning, survives tags
//! split across chunk boundaries, and is restartable per assistant
//! message.

use std::time::Instant;

use wick_model::{estimate_tokens, ReasoningBlock};

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Passthrough,
    InThink,
}

/// What one `feed_text` call produced.
#[derive(Debug, Default, PartialEq)]
pub struct FeedOutcome {
    /// Text that belongs in the visible assistant message.
    pub visible: String,
    /// Newly captured reasoning content.
    pub reasoning: String,
}

#[derive(Debug)]
pub struct ReasoningParser {
    state: State,
    /// Unconsumed input that may end in a partial tag.
    carry: String,
    reasoning: String,
    started_at: Option<Instant>,
    /// A think region was closed (or structured reasoning ended cleanly).
    closed: bool,
}

impl ReasoningParser {
    pub fn new() -> Self {
        Self {
            state: State::Passthrough,
            carry: String::new(),
            reasoning: String::new(),
            started_at: None,
            closed: false,
        }
    }

    /// Feed a text delta; returns the visible portion and any reasoning
    /// captured from think regions.
    pub fn feed_text(&mut self, delta: &str) -> FeedOutcome {
        self.carry.push_str(delta);
        let mut out = FeedOutcome::default();

        loop {
            match self.state {
                State::Passthrough => {
                    if let Some(pos) = self.carry.find(OPEN_TAG) {
                        out.visible.push_str(&self.carry[..pos]);
                        self.carry.drain(..pos + OPEN_TAG.len());
                        self.state = State::InThink;
                        self.started_at.get_or_insert_with(Instant::now);
                    } else {
                        let keep = partial_tag_suffix(&self.carry, OPEN_TAG);
                        let emit = self.carry.len() - keep;
                        out.visible.push_str(&self.carry[..emit]);
                        self.carry.drain(..emit);
                        break;
                    }
                }
                State::InThink => {
                    if let Some(pos) = self.carry.find(CLOSE_TAG) {
                        out.reasoning.push_str(&self.carry[..pos]);
                        self.reasoning.push_str(&self.carry[..pos]);
                        self.carry.drain(..pos + CLOSE_TAG.len());
                        self.state = State::Passthrough;
                        self.closed = true;
                    } else {
                        let keep = partial_tag_suffix(&self.carry, CLOSE_TAG);
                        let take = self.carry.len() - keep;
                        out.reasoning.push_str(&self.carry[..take]);
                        self.reasoning.push_str(&self.carry[..take]);
                        self.carry.drain(..take);
                        break;
                    }
                }
            }
        }
        out
    }

    /// Feed a structured reasoning delta (backends with native reasoning
    /// events).
    pub fn feed_reasoning(&mut self, delta: &str) {
        self.started_at.get_or_insert_with(Instant::now);
        self.reasoning.push_str(delta);
        // Structured reasoning has explicit boundaries; each delta batch
        // counts as cleanly delivered.
        self.closed = true;
    }

    /// Finalize at end of stream.  Returns any trailing visible text
    /// (a partial tag prefix that never completed) and the reasoning
    /// block when any reasoning was captured.  `complete` is false when
    /// the stream ended inside an open think region.
    pub fn finish(mut self) -> (String, Option<ReasoningBlock>) {
        let trailing = match self.state {
            State::Passthrough => std::mem::take(&mut self.carry),
            State::InThink => {
                // Unclosed region: whatever is buffered is reasoning.
                self.reasoning.push_str(&self.carry);
                String::new()
            }
        };

        let trimmed = self.reasoning.trim();
        if trimmed.is_empty() {
            return (trailing, None);
        }
        let block = ReasoningBlock {
            content: trimmed.to_string(),
            token_count: Some(estimate_tokens(trimmed)),
            duration_ms: self
                .started_at
                .map(|t| t.elapsed().as_millis() as u64),
            complete: self.closed && self.state == State::Passthrough,
        };
        (trailing, Some(block))
    }

    pub fn has_reasoning(&self) -> bool {
        !self.reasoning.trim().is_empty()
    }
}

impl Default for ReasoningParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of `tag`.
/// That suffix must be held back: the next delta may complete the tag.
fn partial_tag_suffix(s: &str, tag: &str) -> usize {
    let max = (tag.len() - 1).min(s.len());
    for len in (1..=max).rev() {
        if s.is_char_boundary(s.len() - len) && tag.starts_with(&s[s.len() - len..]) {
            return len;
        }
    }
    0
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(deltas: &[&str]) -> (String, Option<ReasoningBlock>) {
        let mut parser = ReasoningParser::new();
        let mut visible = String::new();
        for delta in deltas {
            visible.push_str(&parser.feed_text(delta).visible);
        }
        let (trailing, block) = parser.finish();
        visible.push_str(&trailing);
        (visible, block)
    }

    #[test]
    fn plain_text_passes_through() {
        let (visible, block) = run(&["hello ", "world"]);
        assert_eq!(visible, "hello world");
        assert!(block.is_none());
    }

    #[test]
    fn think_region_is_extracted() {
        let (visible, block) = run(&["<think>step 1</think>final answer."]);
        assert_eq!(visible, "final answer.");
        let block = block.unwrap();
        assert_eq!(block.content, "step 1");
        assert!(block.complete);
        assert!(block.token_count.is_some());
    }

    #[test]
    fn tag_split_across_chunks() {
        let (visible, block) = run(&["<th", "ink>reason", "ing</th", "ink>done"]);
        assert_eq!(visible, "done");
        assert_eq!(block.unwrap().content, "reasoning");
    }

    #[test]
    fn text_before_and_after_think() {
        let (visible, block) = run(&["prefix <think>hidden</think> suffix"]);
        assert_eq!(visible, "prefix  suffix");
        assert_eq!(block.unwrap().content, "hidden");
    }

    #[test]
    fn unclosed_region_is_incomplete() {
        let (visible, block) = run(&["<think>the model was cut off"]);
        assert_eq!(visible, "");
        let block = block.unwrap();
        assert_eq!(block.content, "the model was cut off");
        assert!(!block.complete);
    }

    #[test]
    fn multiple_regions_accumulate() {
        let (visible, block) = run(&["<think>a</think>one <think>b</think>two"]);
        assert_eq!(visible, "one two");
        let content = block.unwrap().content;
        assert!(content.contains('a') && content.contains('b'));
    }

    #[test]
    fn angle_bracket_that_is_not_a_tag_is_visible() {
        let (visible, block) = run(&["x < y and <b>bold</b>"]);
        assert_eq!(visible, "x < y and <b>bold</b>");
        assert!(block.is_none());
    }

    #[test]
    fn trailing_partial_tag_is_returned_as_visible() {
        // Stream ends with something that looked like a tag opening.
        let (visible, block) = run(&["result <thi"]);
        assert_eq!(visible, "result <thi");
        assert!(block.is_none());
    }

    #[test]
    fn structured_reasoning_builds_complete_block() {
        let mut parser = ReasoningParser::new();
        parser.feed_reasoning("first ");
        parser.feed_reasoning("second");
        let out = parser.feed_text("visible");
        assert_eq!(out.visible, "visible");
        let (_, block) = parser.finish();
        let block = block.unwrap();
        assert_eq!(block.content, "first second");
        assert!(block.complete);
    }

    #[test]
    fn feed_outcome_reports_incremental_reasoning() {
        let mut parser = ReasoningParser::new();
        let out = parser.feed_text("<think>abc");
        assert_eq!(out.reasoning, "abc");
        assert_eq!(out.visible, "");
        let out = parser.feed_text("def</think>ok");
        assert_eq!(out.reasoning, "def");
        assert_eq!(out.visible, "ok");
    }

    #[test]
    fn partial_suffix_helper() {
        assert_eq!(partial_tag_suffix("abc<", OPEN_TAG), 1);
        assert_eq!(partial_tag_suffix("abc<think", OPEN_TAG), 6);
        assert_eq!(partial_tag_suffix("abc", OPEN_TAG), 0);
        assert_eq!(partial_tag_suffix("", OPEN_TAG), 0);
        assert_eq!(partial_tag_suffix("x</think", CLOSE_TAG), 7);
    }
}
