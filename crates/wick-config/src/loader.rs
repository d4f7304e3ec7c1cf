// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::Settings;

/// Root directory for all persistent runtime state: `settings.json`,
/// `sessions/`, `context-snapshots/`, `mode-transition-snapshots/`,
/// and the hook approval ledger.
///
/// Resolution order: `WICK_STATE_DIR` env override, the platform data
/// directory, then `~/.wick` as a last resort.
pub fn state_root() -> PathBuf {
    if let Ok(dir) = std::env::var("WICK_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(data) = dirs::data_dir() {
        return data.join("wick");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wick")
}

/// Load settings from `settings.json` under the state root, or from an
/// explicit path (e.g. a `--settings` CLI flag).
///
/// A missing file yields defaults.  A malformed file also yields defaults
/// with a warning — a typo in one knob must not brick the runtime.
/// An explicit path that does not exist is an error: the caller asked for
/// that specific file.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Settings> {
    let path = match explicit {
        Some(p) => {
            if !p.is_file() {
                anyhow::bail!("settings file not found: {}", p.display());
            }
            p.to_path_buf()
        }
        None => {
            let p = state_root().join("settings.json");
            if !p.is_file() {
                debug!("no settings.json found; using defaults");
                return Ok(Settings::default());
            }
            p
        }
    };

    let text = std::fs::read_to_string(&path)?;
    match serde_json::from_str::<Settings>(&text) {
        Ok(settings) => {
            debug!(path = %path.display(), "loaded settings");
            Ok(settings)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed settings.json; using defaults");
            Ok(Settings::default())
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
