// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Advisory GPU memory monitor.
//!
//! A background task samples a [`VramProbe`] on a fixed cadence and parks
//! the latest figure in a watch channel.  Consumers (the auto-sizer, the
//! memory guard) only ever read `latest()`; a dead or absent probe simply
//! yields `None` and everything degrades to the no-VRAM fallback paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

/// A point-in-time GPU memory reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VramInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub device: String,
}

impl VramInfo {
    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }

    /// Fraction of device memory in use (0.0–1.0).
    pub fn pressure(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.total_bytes as f64) as f32
    }
}

/// Source of VRAM readings.  `None` means "no figure available right now";
/// callers must treat that as advisory absence, not as an error.
#[async_trait]
pub trait VramProbe: Send + Sync {
    async fn sample(&self) -> Option<VramInfo>;
}

/// Probe backed by `nvidia-smi`.  Returns `None` when the binary is
/// missing, exits non-zero, or prints something unparseable — all common
/// on CPU-only machines and inside containers.
pub struct NvidiaSmiProbe;

#[async_trait]
impl VramProbe for NvidiaSmiProbe {
    async fn sample(&self) -> Option<VramInfo> {
        let output = tokio::process::Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.total,memory.used",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_nvidia_smi_line(text.lines().next()?)
    }
}

/// Parse one CSV line of `name, total_mib, used_mib`.
fn parse_nvidia_smi_line(line: &str) -> Option<VramInfo> {
    let mut parts = line.split(',').map(str::trim);
    let device = parts.next()?.to_string();
    let total_mib: u64 = parts.next()?.parse().ok()?;
    let used_mib: u64 = parts.next()?.parse().ok()?;
    Some(VramInfo {
        total_bytes: total_mib * 1024 * 1024,
        used_bytes: used_mib * 1024 * 1024,
        device,
    })
}

/// Fixed-value probe for tests and for platforms with no GPU query path.
pub struct StaticProbe(pub Option<VramInfo>);

#[async_trait]
impl VramProbe for StaticProbe {
    async fn sample(&self) -> Option<VramInfo> {
        self.0.clone()
    }
}

/// Handle to the polling task.  Dropping the monitor stops the task.
pub struct VramMonitor {
    rx: watch::Receiver<Option<VramInfo>>,
    handle: tokio::task::JoinHandle<()>,
}

impl VramMonitor {
    /// Start polling `probe` every `interval`.  The first sample is taken
    /// immediately so `latest()` is meaningful right after startup.
    pub fn spawn(probe: Arc<dyn VramProbe>, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sample = probe.sample().await;
                if let Some(ref info) = sample {
                    debug!(
                        device = %info.device,
                        used_mib = info.used_bytes / (1024 * 1024),
                        total_mib = info.total_bytes / (1024 * 1024),
                        "vram sample"
                    );
                }
                // Receiver side never closes before the monitor is dropped,
                // but a failed send just means nobody is listening any more.
                if tx.send(sample).is_err() {
                    break;
                }
            }
        });
        Self { rx, handle }
    }

    /// Monitor that never produces a reading.  Used when auto-sizing is
    /// disabled so downstream code does not special-case "no monitor".
    pub fn disabled() -> Self {
        Self::spawn(Arc::new(StaticProbe(None)), Duration::from_secs(3600))
    }

    /// The most recent reading, if any.
    pub fn latest(&self) -> Option<VramInfo> {
        self.rx.borrow().clone()
    }

    /// Current pressure figure for the memory guard.
    pub fn pressure(&self) -> Option<f32> {
        self.rx.borrow().as_ref().map(VramInfo::pressure)
    }
}

impl Drop for VramMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
