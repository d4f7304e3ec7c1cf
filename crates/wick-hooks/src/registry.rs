// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use tracing::{debug, warn};

use crate::types::{HookDefinition, HookEvent, HookSource};

/// Holds every loaded hook definition.  Name conflicts are resolved by
/// source priority: builtin beats user beats workspace beats extension.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: Vec<HookDefinition>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one definition, applying the source-priority conflict rule.
    pub fn add(&mut self, def: HookDefinition) {
        if let Some(existing) = self.hooks.iter().position(|h| h.name == def.name) {
            if def.source.priority() < self.hooks[existing].source.priority() {
                debug!(name = %def.name, "higher-priority source replaces hook");
                self.hooks[existing] = def;
            } else {
                debug!(name = %def.name, "keeping higher-priority definition");
            }
            return;
        }
        self.hooks.push(def);
    }

    /// Load a JSON array of definitions from `path`, stamping each with
    /// `source`.  A missing file is fine (no hooks from that source);
    /// a malformed file is skipped with a warning.
    pub fn load_file(&mut self, path: &Path, source: HookSource) {
        let Ok(text) = std::fs::read_to_string(path) else {
            return;
        };
        let defs: Vec<HookDefinition> = match serde_json::from_str(&text) {
            Ok(defs) => defs,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed hooks file; skipping");
                return;
            }
        };
        for mut def in defs {
            def.source = source;
            self.add(def);
        }
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.hooks.iter_mut().find(|h| h.id == id) {
            Some(hook) => {
                hook.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Enabled hooks registered for `event`, ordered by source priority
    /// then name.
    pub fn hooks_for_event(&self, event: HookEvent) -> Vec<HookDefinition> {
        let mut hooks: Vec<HookDefinition> = self
            .hooks
            .iter()
            .filter(|h| h.enabled && h.event_type == event)
            .cloned()
            .collect();
        hooks.sort_by(|a, b| {
            a.source
                .priority()
                .cmp(&b.source.priority())
                .then_with(|| a.name.cmp(&b.name))
        });
        hooks
    }

    pub fn all(&self) -> &[HookDefinition] {
        &self.hooks
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut HookDefinition> {
        self.hooks.iter_mut().find(|h| h.id == id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
