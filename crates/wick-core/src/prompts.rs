// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System-prompt assembly.
//!
//! The outgoing system prompt is layered in a fixed order: tier-locked
//! base, mode overlay, a tool-format note for backends without
//! structured tool calling, and focused-file content.  Tier selection is
//! frozen for the duration of a turn; every layer change funnels through
//! `update_system_prompt()` so rebuilds happen exactly once between
//! turns.

use wick_config::Mode;
use wick_context::CompressionLevel;
use wick_model::{Goal, Tier};

// ─── Base prompts by tier ─────────────────────────────────────────────────────
// Smaller budgets get terser prompts: at 4k tokens every instruction line
// competes with conversation history.

const BASE_MICRO: &str = "\
You are a capable assistant running on a local model with a very small \
context window. Be brief. Prefer direct answers over exposition. Never \
repeat earlier conversation content back to the user.";

const BASE_COMPACT: &str = "\
You are a capable assistant running on a local model with a small context \
window. Keep answers focused and avoid restating context. Use tools when \
they are available rather than guessing.";

const BASE_STANDARD: &str = "\
You are a capable assistant running on a locally hosted model.\n\
- Use the available tools instead of guessing about files, time, or external state.\n\
- Be precise; prefer short working examples over long explanations.\n\
- If earlier conversation has been summarized, treat the summaries as accurate history.";

const BASE_EXTENDED: &str = "\
You are a capable assistant running on a locally hosted model with a large \
context window.\n\
- Use the available tools instead of guessing about files, time, or external state.\n\
- Be precise; prefer short working examples over long explanations.\n\
- If earlier conversation has been summarized, treat the summaries as accurate history.\n\
- For multi-step tasks, state a short plan before acting and keep it updated.";

const BASE_EXPANSIVE: &str = "\
You are a capable assistant running on a locally hosted model with a very \
large context window.\n\
- Use the available tools instead of guessing about files, time, or external state.\n\
- Be precise; prefer short working examples over long explanations.\n\
- If earlier conversation has been summarized, treat the summaries as accurate history.\n\
- For multi-step tasks, state a short plan before acting and keep it updated.\n\
- You may quote longer excerpts when the user asks for them; the budget allows it.";

fn base_for_tier(tier: Tier) -> &'static str {
    match tier {
        Tier::Micro => BASE_MICRO,
        Tier::Compact => BASE_COMPACT,
        Tier::Standard => BASE_STANDARD,
        Tier::Extended => BASE_EXTENDED,
        Tier::Expansive => BASE_EXPANSIVE,
    }
}

// ─── Mode overlays ────────────────────────────────────────────────────────────

fn overlay_for_mode(mode: Mode) -> &'static str {
    match mode {
        Mode::Assistant => "",
        Mode::Debugger => {
            "\n\nMode: debugger. Work hypothesis-first: state the suspected \
             fault, gather evidence with tools before proposing a fix, and \
             report findings as observation → hypothesis → next probe."
        }
        Mode::Architect => {
            "\n\nMode: architect. Focus on structure: interfaces, data flow, \
             and trade-offs. Present options with consequences before \
             recommending one. Avoid line-level code unless asked."
        }
        Mode::Reviewer => {
            "\n\nMode: reviewer. Review, do not rewrite. Report findings with \
             severity and location; call out only what you would block a \
             merge over, and say so when the code is fine."
        }
        Mode::Tutor => {
            "\n\nMode: tutor. Explain before prescribing. Build up from what \
             the user already knows, check understanding, and prefer guiding \
             questions over finished solutions."
        }
    }
}

/// Injected only when the backend lacks structured tool calling.
const TOOL_FORMAT_NOTE: &str = "\n\n\
This backend has no native tool-call support. To use a tool, reply with \
a single line containing exactly:\n\
TOOL_CALL {\"name\": \"<tool>\", \"args\": {...}}\n\
and nothing else; the result will arrive in the next user message.";

// ─── Orchestrator ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PromptOrchestrator {
    /// Frozen at auto-size time; changes only through an explicit resize
    /// between turns, never mid-turn.
    tier: Tier,
    mode: Mode,
    supports_tools: bool,
    /// Files the mode manager marked as "in focus": (name, content).
    focused_files: Vec<(String, String)>,
    current: String,
}

impl PromptOrchestrator {
    pub fn new(tier: Tier, mode: Mode, supports_tools: bool) -> Self {
        let mut this = Self {
            tier,
            mode,
            supports_tools,
            focused_files: Vec::new(),
            current: String::new(),
        };
        this.update_system_prompt();
        this
    }

    /// The single rebuild point.  Called once after any tier or mode (or
    /// focus) change, before the next turn.
    pub fn update_system_prompt(&mut self) {
        let mut prompt = String::from(base_for_tier(self.tier));
        prompt.push_str(overlay_for_mode(self.mode));
        if !self.supports_tools {
            prompt.push_str(TOOL_FORMAT_NOTE);
        }
        for (name, content) in &self.focused_files {
            prompt.push_str(&format!("\n\nFile in focus: {name}\n```\n{content}\n```"));
        }
        self.current = prompt;
    }

    pub fn system_prompt(&self) -> &str {
        &self.current
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
        self.update_system_prompt();
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.update_system_prompt();
    }

    pub fn focus_file(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.focused_files.push((name.into(), content.into()));
        self.update_system_prompt();
    }

    pub fn clear_focus(&mut self) {
        self.focused_files.clear();
        self.update_system_prompt();
    }
}

// ─── Summarization prompts ────────────────────────────────────────────────────

/// System prompt for a summarization call.
///
/// Reasoning-capable models get a terser framing: the elaborate version
/// sends them into paragraphs of meta-thinking about how to summarize
/// before any summary appears.
pub fn summarization_prompt(
    level: CompressionLevel,
    goal: Option<&Goal>,
    reasoning_capable: bool,
) -> String {
    let mut prompt = if reasoning_capable {
        String::from(
            "Compress the following conversation history. Output only the \
             summary, no preamble. ",
        )
    } else {
        String::from(
            "You are a context compression assistant. The text below is \
             conversation history that must be replaced by a summary to free \
             up context space. Produce that summary now. ",
        )
    };
    prompt.push_str(level.directive());
    if let Some(goal) = goal {
        prompt.push_str(&format!(
            "\n\nThe user's overall goal: {}. Weight the summary toward \
             information relevant to this goal.",
            goal.summary
        ));
        if !goal.milestones.is_empty() {
            prompt.push_str(&format!("\nMilestones: {}", goal.milestones.join("; ")));
        }
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tier_has_a_distinct_base() {
        let prompts: Vec<&str> = Tier::ALL.iter().map(|t| base_for_tier(*t)).collect();
        for (i, a) in prompts.iter().enumerate() {
            for b in prompts.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn layering_order_is_base_mode_toolnote_focus() {
        let mut orch = PromptOrchestrator::new(Tier::Standard, Mode::Debugger, false);
        orch.focus_file("main.rs", "fn main() {}");
        let prompt = orch.system_prompt();

        let base_pos = prompt.find("locally hosted model").unwrap();
        let mode_pos = prompt.find("Mode: debugger").unwrap();
        let note_pos = prompt.find("TOOL_CALL").unwrap();
        let focus_pos = prompt.find("File in focus: main.rs").unwrap();
        assert!(base_pos < mode_pos);
        assert!(mode_pos < note_pos);
        assert!(note_pos < focus_pos);
    }

    #[test]
    fn tool_note_only_without_structured_support() {
        let with = PromptOrchestrator::new(Tier::Standard, Mode::Assistant, true);
        assert!(!with.system_prompt().contains("TOOL_CALL"));
        let without = PromptOrchestrator::new(Tier::Standard, Mode::Assistant, false);
        assert!(without.system_prompt().contains("TOOL_CALL"));
    }

    #[test]
    fn mode_change_rebuilds_once_through_update() {
        let mut orch = PromptOrchestrator::new(Tier::Standard, Mode::Assistant, true);
        assert!(!orch.system_prompt().contains("Mode: reviewer"));
        orch.set_mode(Mode::Reviewer);
        assert!(orch.system_prompt().contains("Mode: reviewer"));
    }

    #[test]
    fn tier_change_swaps_base() {
        let mut orch = PromptOrchestrator::new(Tier::Micro, Mode::Assistant, true);
        assert!(orch.system_prompt().contains("very small"));
        orch.set_tier(Tier::Expansive);
        assert!(orch.system_prompt().contains("very large"));
    }

    #[test]
    fn clear_focus_removes_file_content() {
        let mut orch = PromptOrchestrator::new(Tier::Standard, Mode::Assistant, true);
        orch.focus_file("secret.txt", "token=abc");
        assert!(orch.system_prompt().contains("token=abc"));
        orch.clear_focus();
        assert!(!orch.system_prompt().contains("token=abc"));
    }

    #[test]
    fn summarization_prompt_varies_with_reasoning_capability() {
        let chatty = summarization_prompt(CompressionLevel::Detailed, None, false);
        let terse = summarization_prompt(CompressionLevel::Detailed, None, true);
        assert!(chatty.len() > terse.len());
        assert!(terse.contains("no preamble"));
    }

    #[test]
    fn summarization_prompt_includes_goal() {
        let goal = Goal {
            summary: "port the parser to async".into(),
            milestones: vec!["lexer".into(), "parser".into()],
        };
        let prompt = summarization_prompt(CompressionLevel::Compact, Some(&goal), false);
        assert!(prompt.contains("port the parser to async"));
        assert!(prompt.contains("lexer; parser"));
    }
}
