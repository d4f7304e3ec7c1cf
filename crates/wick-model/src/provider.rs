// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{profile::ModelProfile, ChatEvent, ChatRequest};

pub type ChatStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatEvent>> + Send>>;

/// The contract every model backend implements.
///
/// Only the streaming call is mandatory.  Token counting and the model
/// management surface are optional: backends that cannot serve them keep
/// the defaults (`None` / unsupported) and callers fall back to the
/// estimator or surface the error to the user.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Human-readable backend name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model(&self) -> &str;

    /// Sizing and capability data for the active model.
    ///
    /// The default resolves against the bundled profile table by family
    /// substring.  Override when the backend can report exact figures
    /// (e.g. the loaded context length of a local server).
    fn profile(&self) -> ModelProfile {
        crate::profile::profile_for(self.model())
    }

    /// Send a chat request and return a streaming response.
    async fn stream_chat(&self, req: ChatRequest) -> anyhow::Result<ChatStream>;

    /// Exact prompt token count for a request, when the backend can supply
    /// one.  `None` means "use the estimator".
    async fn count_tokens(&self, _req: &ChatRequest) -> Option<usize> {
        None
    }

    // ── Optional model management surface ────────────────────────────────────

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("{}: model listing not supported", self.name())
    }

    async fn pull_model(&self, model: &str) -> anyhow::Result<()> {
        anyhow::bail!("{}: cannot pull {model}", self.name())
    }

    async fn delete_model(&self, model: &str) -> anyhow::Result<()> {
        anyhow::bail!("{}: cannot delete {model}", self.name())
    }

    async fn show_model(&self, model: &str) -> anyhow::Result<String> {
        anyhow::bail!("{}: no metadata for {model}", self.name())
    }

    async fn unload_model(&self) -> anyhow::Result<()> {
        anyhow::bail!("{}: unload not supported", self.name())
    }
}
