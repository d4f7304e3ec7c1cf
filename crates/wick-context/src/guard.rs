// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Graded memory-pressure assessment.
//!
//! The guard looks at two advisory figures — the provider-pool fill ratio
//! and observed VRAM pressure — and grades the worse of the two.  The
//! runtime maps the grade to actions: background compression and a
//! best-effort recovery snapshot at warning, forced truncation plus a
//! budget cut at critical, emergency snapshot and minimum-tier clear at
//! emergency.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PressureLevel::Normal => write!(f, "normal"),
            PressureLevel::Warning => write!(f, "warning"),
            PressureLevel::Critical => write!(f, "critical"),
            PressureLevel::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardThresholds {
    pub warning: f32,
    pub critical: f32,
    pub emergency: f32,
}

impl Default for GuardThresholds {
    fn default() -> Self {
        Self {
            warning: 0.80,
            critical: 0.90,
            emergency: 0.95,
        }
    }
}

/// Fraction by which the user budget is reduced at critical pressure.
pub const CRITICAL_SHRINK_FACTOR: f32 = 0.75;

/// Grade the worse of the fill ratio and the VRAM pressure.  A missing
/// VRAM figure contributes nothing (advisory absence).
pub fn assess(
    fill_ratio: f32,
    vram_pressure: Option<f32>,
    thresholds: &GuardThresholds,
) -> PressureLevel {
    let worst = vram_pressure
        .map(|v| fill_ratio.max(v))
        .unwrap_or(fill_ratio);
    if worst >= thresholds.emergency {
        PressureLevel::Emergency
    } else if worst >= thresholds.critical {
        PressureLevel::Critical
    } else if worst >= thresholds.warning {
        PressureLevel::Warning
    } else {
        PressureLevel::Normal
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
