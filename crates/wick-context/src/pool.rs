// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Stateful holder of the dual context budget.
//!
//! The pool tracks the user-facing size, the derived provider size, the
//! current token load, and the number of in-flight provider requests.
//! `resize` is the only mutation that must serialize against requests: it
//! waits until the in-flight counter reaches zero before committing, so no
//! stream ever runs under mixed old/new sizes.

use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::warn;

use wick_model::ModelProfile;

use crate::calc::provider_size_from_user;

/// Read-only usage view.  The UI reads `percent_of_user`; the memory guard
/// and compression coordinator read `percent_of_provider`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    pub current: usize,
    pub user_size: usize,
    pub provider_size: usize,
    pub percent_of_user: f32,
    pub percent_of_provider: f32,
}

#[derive(Debug)]
struct PoolState {
    user_size: usize,
    provider_size: usize,
    current_tokens: usize,
    active_requests: usize,
    /// Set while a resize is parked waiting for the counter to drain; used
    /// only to flag late-started requests in the log.
    resize_waiting: bool,
}

#[derive(Debug)]
pub struct ContextPool {
    state: Mutex<PoolState>,
    drained: Notify,
}

impl ContextPool {
    pub fn new(user_size: usize, profile: &ModelProfile) -> Self {
        Self {
            state: Mutex::new(PoolState {
                user_size,
                provider_size: provider_size_from_user(user_size, profile),
                current_tokens: 0,
                active_requests: 0,
                resize_waiting: false,
            }),
            drained: Notify::new(),
        }
    }

    /// Update the current token load (derived figure, recomputed by the
    /// caller from the message store and checkpoint store).
    pub fn set_tokens(&self, tokens: usize) {
        self.state.lock().unwrap().current_tokens = tokens;
    }

    pub fn add_request(&self) {
        let mut st = self.state.lock().unwrap();
        st.active_requests += 1;
        if st.resize_waiting {
            warn!(
                active = st.active_requests,
                "request started while a resize is waiting for the pool to drain"
            );
        }
    }

    pub fn finish_request(&self) {
        let mut st = self.state.lock().unwrap();
        st.active_requests = st.active_requests.saturating_sub(1);
        if st.active_requests == 0 {
            self.drained.notify_waiters();
        }
    }

    pub fn active_requests(&self) -> usize {
        self.state.lock().unwrap().active_requests
    }

    /// Resize both budgets.  Waits for `active_requests == 0` before
    /// committing.  Resizing to the identical user size is a no-op: no
    /// wait, no log.  Returns `(user_size, provider_size)` after commit.
    pub async fn resize(&self, new_user_size: usize, profile: &ModelProfile) -> (usize, usize) {
        loop {
            // Arm the notification before re-checking the counter so a
            // finish_request between the check and the await is not lost.
            let notified = self.drained.notified();
            {
                let mut st = self.state.lock().unwrap();
                if st.user_size == new_user_size {
                    st.resize_waiting = false;
                    return (st.user_size, st.provider_size);
                }
                if st.active_requests == 0 {
                    st.user_size = new_user_size;
                    st.provider_size = provider_size_from_user(new_user_size, profile);
                    st.resize_waiting = false;
                    return (st.user_size, st.provider_size);
                }
                st.resize_waiting = true;
            }
            notified.await;
        }
    }

    pub fn usage(&self) -> ContextUsage {
        let st = self.state.lock().unwrap();
        let pct = |budget: usize| {
            if budget == 0 {
                0.0
            } else {
                (st.current_tokens as f64 / budget as f64) as f32
            }
        };
        ContextUsage {
            current: st.current_tokens,
            user_size: st.user_size,
            provider_size: st.provider_size,
            percent_of_user: pct(st.user_size),
            percent_of_provider: pct(st.provider_size),
        }
    }

    pub fn user_size(&self) -> usize {
        self.state.lock().unwrap().user_size
    }

    pub fn provider_size(&self) -> usize {
        self.state.lock().unwrap().provider_size
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn profile() -> ModelProfile {
        ModelProfile {
            context_window: 131072,
            overhead_factor: 0.85,
            ..ModelProfile::default()
        }
    }

    #[test]
    fn provider_size_derived_on_construction() {
        let pool = ContextPool::new(16384, &profile());
        assert_eq!(pool.user_size(), 16384);
        assert_eq!(pool.provider_size(), 13926);
    }

    #[test]
    fn usage_reports_both_percentages() {
        let pool = ContextPool::new(16384, &profile());
        pool.set_tokens(11200);
        let u = pool.usage();
        assert_eq!(u.current, 11200);
        assert!((u.percent_of_user - 11200.0 / 16384.0).abs() < 1e-4);
        assert!((u.percent_of_provider - 11200.0 / 13926.0).abs() < 1e-4);
        assert!(u.percent_of_provider > u.percent_of_user);
    }

    #[tokio::test]
    async fn resize_with_no_requests_commits_immediately() {
        let pool = ContextPool::new(16384, &profile());
        let (user, provider) = pool.resize(8192, &profile()).await;
        assert_eq!(user, 8192);
        assert_eq!(provider, provider_size_from_user(8192, &profile()));
    }

    #[tokio::test]
    async fn resize_to_identical_size_is_noop_even_with_active_requests() {
        let pool = ContextPool::new(16384, &profile());
        pool.add_request();
        // Must not wait for the active request.
        let (user, _) = pool.resize(16384, &profile()).await;
        assert_eq!(user, 16384);
        pool.finish_request();
    }

    #[tokio::test]
    async fn resize_waits_for_active_requests_to_drain() {
        let pool = Arc::new(ContextPool::new(16384, &profile()));
        pool.add_request();

        let p = Arc::clone(&pool);
        let resize = tokio::spawn(async move { p.resize(8192, &profile()).await });

        // Give the resize a chance to park.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!resize.is_finished(), "resize must wait while a request is in flight");
        assert_eq!(pool.user_size(), 16384, "old size must hold until drain");

        pool.finish_request();
        let (user, _) = tokio::time::timeout(Duration::from_secs(1), resize)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user, 8192);
    }

    #[tokio::test]
    async fn late_request_does_not_block_resize_forever() {
        let pool = Arc::new(ContextPool::new(16384, &profile()));
        pool.add_request();

        let p = Arc::clone(&pool);
        let resize = tokio::spawn(async move { p.resize(4096, &profile()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A request sneaks in while the resize is parked, then both finish.
        pool.add_request();
        pool.finish_request();
        pool.finish_request();

        let (user, _) = tokio::time::timeout(Duration::from_secs(1), resize)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user, 4096);
    }

    #[test]
    fn finish_request_saturates_at_zero() {
        let pool = ContextPool::new(4096, &profile());
        pool.finish_request();
        assert_eq!(pool.active_requests(), 0);
    }
}
