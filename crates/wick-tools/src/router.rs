// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Capability routing: map an abstract capability ("web-search",
//! "file-read") to a concrete tool instance.  Concrete tools may be
//! builtin or backed by an external tool server; the router only sees the
//! [`Tool`] trait.

use std::sync::Arc;

use crate::registry::ToolRegistry;
use crate::tool::Tool;

impl ToolRegistry {
    /// Find a tool providing `capability`.  When several match, the one
    /// with the lexicographically smallest name wins so resolution is
    /// deterministic across runs.
    pub fn resolve_capability(&self, capability: &str) -> Option<Arc<dyn Tool>> {
        let mut matches: Vec<Arc<dyn Tool>> = self
            .iter_tools()
            .filter(|t| t.capability() == capability)
            .collect();
        matches.sort_by(|a, b| a.name().cmp(b.name()));
        matches.into_iter().next()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
