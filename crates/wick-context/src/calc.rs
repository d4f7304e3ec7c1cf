// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Pure context-size arithmetic: tier classification, user ↔ provider
//! budget conversion, and VRAM-advised auto-sizing.
//!
//! Every function here is total.  All thresholds and factors come from the
//! [`ModelProfile`]; nothing numeric is baked into the functions themselves.

use wick_model::{ModelProfile, Tier};

use crate::vram::VramInfo;

/// User sizes are presented in steps of this granularity so the UI shows a
/// clean figure after the inverse conversion.
const USER_SIZE_GRANULARITY: usize = 256;

/// Classify a user-facing budget into its tier using the profile's
/// breakpoints.  Monotone: a larger budget never maps to a smaller tier.
pub fn classify_tier(user_size: usize, profile: &ModelProfile) -> Tier {
    let bp = &profile.tier_breakpoints;
    if user_size <= bp[0] {
        Tier::Micro
    } else if user_size <= bp[1] {
        Tier::Compact
    } else if user_size <= bp[2] {
        Tier::Standard
    } else if user_size <= bp[3] {
        Tier::Extended
    } else {
        Tier::Expansive
    }
}

/// Budget actually sent to the backend: the user budget minus the
/// provider overhead share (template expansion, special tokens, request
/// scaffolding).  Always at least 1.
pub fn provider_size_from_user(user_size: usize, profile: &ModelProfile) -> usize {
    ((user_size as f64) * (profile.overhead_factor as f64)).floor() as usize
}

/// Inverse of [`provider_size_from_user`], rounded up to the display
/// granularity and capped at the model window, so auto-sizing presents a
/// clean user-facing figure.
pub fn user_size_from_provider(provider_size: usize, profile: &ModelProfile) -> usize {
    let raw = ((provider_size as f64) / (profile.overhead_factor as f64)).ceil() as usize;
    let rounded = raw.div_ceil(USER_SIZE_GRANULARITY) * USER_SIZE_GRANULARITY;
    rounded.min(profile.context_window).max(USER_SIZE_GRANULARITY)
}

/// Result of the advisory auto-sizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSize {
    pub user_size: usize,
    pub tier: Tier,
}

/// Pick the largest user budget whose estimated footprint fits in free
/// VRAM after the configured safety margin.
///
/// Footprint model: `base_vram_bytes` for the loaded weights and runtime
/// scaffolding plus `kv_bytes_per_token` per provider-side token.  When no
/// VRAM figure is available (headless CI, CPU-only boxes, a dead probe)
/// the minimum profile tier is returned — the result is always a positive
/// size.
pub fn suggest_auto_size(
    vram: Option<&VramInfo>,
    profile: &ModelProfile,
    vram_buffer_bytes: u64,
) -> AutoSize {
    let fallback = AutoSize {
        user_size: profile.min_user_size,
        tier: classify_tier(profile.min_user_size, profile),
    };

    let Some(info) = vram else {
        return fallback;
    };

    let budget = info
        .free_bytes()
        .saturating_sub(vram_buffer_bytes)
        .saturating_sub(profile.base_vram_bytes);
    if budget == 0 || profile.kv_bytes_per_token == 0 {
        return fallback;
    }

    let provider_tokens = (budget / profile.kv_bytes_per_token) as usize;
    if provider_tokens == 0 {
        return fallback;
    }

    // Never suggest past the model's own window.
    let provider_cap = provider_size_from_user(profile.context_window, profile);
    let user_size = user_size_from_provider(provider_tokens.min(provider_cap), profile)
        .clamp(profile.min_user_size, profile.context_window);

    AutoSize {
        user_size,
        tier: classify_tier(user_size, profile),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
