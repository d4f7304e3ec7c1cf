// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Execution planning: filter the registered hooks down to the ones that
//! apply to an event, enforce rate limits, and order the survivors into
//! batches.  Hooks in the same batch have no dependencies between them
//! and may run in parallel; batches run sequentially.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, warn};

use crate::types::{HookDefinition, HookEvent};

/// Why a hook was dropped from a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RateLimited,
    GlobalRateLimited,
    InvalidFilePattern,
}

#[derive(Debug, Default)]
pub struct ExecutionPlan {
    /// Sequential batches; hooks within one batch are independent.
    pub batches: Vec<Vec<HookDefinition>>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(|b| b.is_empty())
    }

    pub fn hook_count(&self) -> usize {
        self.batches.iter().map(|b| b.len()).sum()
    }
}

/// Sliding-window rate limiter: per-hook windows plus a global ceiling.
pub struct RateLimiter {
    window: Duration,
    global_limit: u32,
    state: Mutex<LimiterState>,
}

#[derive(Default)]
struct LimiterState {
    per_hook: HashMap<String, VecDeque<Instant>>,
    global: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(global_limit: u32) -> Self {
        Self {
            window: Duration::from_secs(60),
            global_limit,
            state: Mutex::new(LimiterState::default()),
        }
    }

    #[cfg(test)]
    fn with_window(global_limit: u32, window: Duration) -> Self {
        Self {
            window,
            global_limit,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Check both limits and record the invocation when admitted.
    pub fn admit(&self, hook_id: &str, per_hook_limit: Option<u32>) -> Result<(), SkipReason> {
        let now = Instant::now();
        let mut st = self.state.lock().unwrap();

        while st.global.front().is_some_and(|t| now - *t > self.window) {
            st.global.pop_front();
        }
        if st.global.len() as u32 >= self.global_limit {
            return Err(SkipReason::GlobalRateLimited);
        }

        if let Some(limit) = per_hook_limit {
            let times = st.per_hook.entry(hook_id.to_string()).or_default();
            while times.front().is_some_and(|t| now - *t > self.window) {
                times.pop_front();
            }
            if times.len() as u32 >= limit {
                return Err(SkipReason::RateLimited);
            }
            times.push_back(now);
        }

        st.global.push_back(now);
        Ok(())
    }
}

/// Build an execution plan for `event`.
///
/// `file` is the path a tool event concerns, matched against each hook's
/// optional file pattern; a hook with a pattern never fires for events
/// that carry no file.  Dependency layering: hooks whose `depends_on`
/// are all satisfied by earlier batches land in the next batch; unknown
/// dependency names are ignored; a dependency cycle falls back to one
/// hook per batch (fully sequential) for the hooks involved.
pub fn plan(
    hooks: &[HookDefinition],
    event: HookEvent,
    file: Option<&str>,
    limiter: &RateLimiter,
) -> ExecutionPlan {
    let mut plan = ExecutionPlan::default();

    let mut applicable: Vec<HookDefinition> = Vec::new();
    for hook in hooks {
        if !hook.enabled || hook.event_type != event {
            continue;
        }
        if let Some(pattern) = &hook.file_pattern {
            let Some(file) = file else {
                continue;
            };
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(file) {
                        continue;
                    }
                }
                Err(e) => {
                    warn!(hook = %hook.name, error = %e, "invalid file pattern");
                    plan.skipped
                        .push((hook.id.clone(), SkipReason::InvalidFilePattern));
                    continue;
                }
            }
        }
        match limiter.admit(&hook.id, hook.rate_limit_per_min) {
            Ok(()) => applicable.push(hook.clone()),
            Err(reason) => plan.skipped.push((hook.id.clone(), reason)),
        }
    }

    if applicable.is_empty() {
        return plan;
    }

    plan.batches = layer_by_dependencies(applicable);
    debug!(
        event = %event,
        batches = plan.batches.len(),
        hooks = plan.hook_count(),
        "hook plan built"
    );
    plan
}

/// Kahn-style layering over the applicable set.
fn layer_by_dependencies(mut pending: Vec<HookDefinition>) -> Vec<Vec<HookDefinition>> {
    let names: HashSet<String> = pending.iter().map(|h| h.name.clone()).collect();
    let mut done: HashSet<String> = HashSet::new();
    let mut batches = Vec::new();

    while !pending.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|h| {
            h.depends_on
                .iter()
                .all(|dep| !names.contains(dep) || done.contains(dep))
        });

        if ready.is_empty() {
            // Dependency cycle: degrade to strict sequential order.
            warn!("hook dependency cycle detected; running remaining hooks sequentially");
            for hook in blocked {
                batches.push(vec![hook]);
            }
            break;
        }

        for hook in &ready {
            done.insert(hook.name.clone());
        }
        batches.push(ready);
        pending = blocked;
    }
    batches
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
