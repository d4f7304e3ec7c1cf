// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Message types, the provider adapter contract, model profiles, and the
//! token estimator.

pub mod estimator;
pub mod mock;
pub mod profile;
mod provider;
mod types;

pub use estimator::estimate_tokens;
pub use profile::{profile_for, ModelProfile, Tier};
pub use provider::{ChatStream, ProviderAdapter};
pub use types::{
    ChatEvent, ChatOptions, ChatRequest, FinishReason, Goal, MessageRecord, ReasoningBlock, Role,
    ToolCallRecord, ToolSchema,
};
