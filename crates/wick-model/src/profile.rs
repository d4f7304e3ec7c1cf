// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model profiles: per-family sizing and capability data, with a bundled
//! static table matched by family substring.

use serde::{Deserialize, Serialize};

/// Named classification of a user-facing context budget, smallest to
/// largest.  The boundaries come from the model profile, never from the
/// classifier itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Micro,
    Compact,
    Standard,
    Extended,
    Expansive,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Micro => write!(f, "micro"),
            Tier::Compact => write!(f, "compact"),
            Tier::Standard => write!(f, "standard"),
            Tier::Extended => write!(f, "extended"),
            Tier::Expansive => write!(f, "expansive"),
        }
    }
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Micro,
        Tier::Compact,
        Tier::Standard,
        Tier::Extended,
        Tier::Expansive,
    ];
}

/// Sizing and capability data for one model family.
///
/// `overhead_factor` converts a user-facing budget into the budget actually
/// sent to the backend (the remainder covers template expansion, special
/// tokens, and per-request scaffolding).  `kv_bytes_per_token` and
/// `base_vram_bytes` feed the VRAM auto-sizer; they are rough per-family
/// figures, good enough for an advisory fit check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub family: String,
    pub context_window: usize,
    pub overhead_factor: f32,
    /// Upper boundaries of the first four tiers; anything above the last
    /// boundary is `Expansive`.
    pub tier_breakpoints: [usize; 4],
    pub min_user_size: usize,
    pub kv_bytes_per_token: u64,
    pub base_vram_bytes: u64,
    pub emits_structured_reasoning: bool,
    pub uses_think_markers: bool,
    pub supports_tools: bool,
}

impl Default for ModelProfile {
    fn default() -> Self {
        // Conservative fallback for unknown families: a modest window, no
        // structured tool support claimed.
        Self {
            family: "unknown".into(),
            context_window: 8192,
            overhead_factor: 0.85,
            tier_breakpoints: [2048, 4096, 6144, 8192],
            min_user_size: 2048,
            kv_bytes_per_token: 65536,
            base_vram_bytes: 512 * 1024 * 1024,
            emits_structured_reasoning: false,
            uses_think_markers: false,
            supports_tools: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    profiles: Vec<ModelProfile>,
}

/// All bundled profiles.
pub fn static_profiles() -> Vec<ModelProfile> {
    let json = include_str!("../profiles.json");
    let file: ProfileFile = serde_json::from_str(json).expect("bundled profiles.json must be valid");
    file.profiles
}

/// Resolve the profile for a model name by family substring match
/// (e.g. `"qwen2.5-coder:14b"` → the `qwen` profile).  Unknown names get
/// the conservative default profile.
pub fn profile_for(model_name: &str) -> ModelProfile {
    let lower = model_name.to_ascii_lowercase();
    static_profiles()
        .into_iter()
        .find(|p| lower.contains(&p.family))
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
