// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context engine: dual-budget pool, tier arithmetic, VRAM advisory,
//! message and checkpoint stores, the compression pipeline, and the
//! memory guard.

pub mod calc;
pub mod checkpoint;
pub mod coordinator;
pub mod guard;
pub mod pool;
pub mod store;
pub mod vram;

pub use calc::{classify_tier, provider_size_from_user, suggest_auto_size, user_size_from_provider, AutoSize};
pub use checkpoint::{
    age_checkpoints, compress_checkpoint, merge_compact_checkpoints, target_level_for_age,
    Checkpoint, CheckpointStore, CompressionLevel, Summarizer,
};
pub use coordinator::{
    serialize_history, CompressionAction, CompressionCoordinator, CompressionReport, InProgressGate,
};
pub use guard::{assess, GuardThresholds, PressureLevel, CRITICAL_SHRINK_FACTOR};
pub use pool::{ContextPool, ContextUsage};
pub use store::MessageStore;
pub use vram::{NvidiaSmiProbe, StaticProbe, VramInfo, VramMonitor, VramProbe};
