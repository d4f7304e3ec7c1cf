// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Compressed conversation checkpoints and their lifecycle.
//!
//! A checkpoint replaces a contiguous run of live messages with a leveled
//! summary.  Checkpoints age as further compressions happen: the older the
//! epoch that produced one, the more aggressively its summary is rewritten
//! (detailed → moderate → compact).  Old compact checkpoints eventually
//! merge into a single record.  Checkpoints are plain records in a flat
//! arena — aging and merging build a DAG of original-id sets, never
//! pointers between checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use wick_model::{estimate_tokens, Goal};

/// Summary granularity.  Ordered: `Compact < Moderate < Detailed`.
/// Aging and emergency compression only ever move downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Compact,
    Moderate,
    Detailed,
}

impl CompressionLevel {
    /// Numeric form used in filenames and status output (3 = detailed).
    pub fn rank(self) -> u8 {
        match self {
            CompressionLevel::Compact => 1,
            CompressionLevel::Moderate => 2,
            CompressionLevel::Detailed => 3,
        }
    }

    /// Summarization directive for this level, appended to the compaction
    /// prompt by the summarizer.
    pub fn directive(self) -> &'static str {
        match self {
            CompressionLevel::Detailed => {
                "Preserve all technical details, decisions, file names, code \
                 fragments, and tool outputs that may matter for future work."
            }
            CompressionLevel::Moderate => {
                "Keep key decisions, open tasks, and important identifiers; \
                 drop tool output bodies and step-by-step detail."
            }
            CompressionLevel::Compact => {
                "Produce the tersest possible digest: outcomes, active \
                 constraints, and unresolved items only."
            }
        }
    }
}

/// Aging target purely as a function of epoch distance.
pub fn target_level_for_age(age: u64) -> CompressionLevel {
    match age {
        0..=4 => CompressionLevel::Detailed,
        5..=9 => CompressionLevel::Moderate,
        _ => CompressionLevel::Compact,
    }
}

/// A compressed summary standing in for a run of replaced messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    /// Ids of the live messages this checkpoint replaced (flat, unordered
    /// with respect to other checkpoints; union semantics under merge).
    pub original_message_ids: Vec<String>,
    pub token_count: usize,
    pub level: CompressionLevel,
    /// The compression epoch that produced (or last merged) this record.
    pub compression_number: u64,
    /// The model that wrote the current summary text.
    pub model: String,
    /// Last rewrite time (aging, merging, emergency down-level).
    pub compressed_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        summary: impl Into<String>,
        original_message_ids: Vec<String>,
        level: CompressionLevel,
        compression_number: u64,
        model: impl Into<String>,
    ) -> Self {
        let summary = summary.into();
        let token_count = estimate_tokens(&summary);
        let now = Utc::now();
        Self {
            id: format!("ckpt-{}", Uuid::new_v4()),
            timestamp: now,
            summary,
            original_message_ids,
            token_count,
            level,
            compression_number,
            model: model.into(),
            compressed_at: now,
        }
    }

    /// Epoch distance from the current compression number.
    pub fn age(&self, current_number: u64) -> u64 {
        current_number.saturating_sub(self.compression_number)
    }
}

/// Capability seam for producing summaries.  Implemented over the active
/// provider by the runtime; tests plug in scripted summarizers.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        text: &str,
        level: CompressionLevel,
        goal: Option<&Goal>,
    ) -> anyhow::Result<String>;
}

/// Flat arena of checkpoints with stable ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointStore {
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ckpt: Checkpoint) -> String {
        let id = ckpt.id.clone();
        self.checkpoints.push(ckpt);
        id
    }

    pub fn view(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.checkpoints.iter().map(|c| c.token_count).sum()
    }

    /// Union of all replaced message ids across the arena.
    pub fn original_id_union(&self) -> std::collections::HashSet<String> {
        self.checkpoints
            .iter()
            .flat_map(|c| c.original_message_ids.iter().cloned())
            .collect()
    }

    pub fn replace_all(&mut self, checkpoints: Vec<Checkpoint>) {
        self.checkpoints = checkpoints;
    }

    pub fn clear(&mut self) {
        self.checkpoints.clear();
    }
}

// ─── Lifecycle operations ─────────────────────────────────────────────────────

/// Age every checkpoint whose level exceeds the target for its epoch
/// distance, re-summarizing its own summary at the target level.
///
/// Checkpoints tied on age are processed in timestamp order.  A rewrite
/// that fails to shrink the summary is discarded (the old text and level
/// are kept) so aging can never inflate the arena.  Returns the total
/// token delta (negative when the arena shrank).
pub async fn age_checkpoints(
    store: &mut CheckpointStore,
    current_number: u64,
    summarizer: &dyn Summarizer,
    goal: Option<&Goal>,
) -> anyhow::Result<i64> {
    let mut order: Vec<usize> = (0..store.checkpoints.len())
        .filter(|&i| {
            let c = &store.checkpoints[i];
            target_level_for_age(c.age(current_number)) < c.level
        })
        .collect();
    order.sort_by_key(|&i| store.checkpoints[i].timestamp);

    let mut delta: i64 = 0;
    for i in order {
        let (target, old_tokens, text) = {
            let c = &store.checkpoints[i];
            (
                target_level_for_age(c.age(current_number)),
                c.token_count,
                c.summary.clone(),
            )
        };
        let rewritten = summarizer.summarize(&text, target, goal).await?;
        let new_tokens = estimate_tokens(&rewritten);
        if rewritten.is_empty() || new_tokens >= old_tokens {
            warn!(
                checkpoint = %store.checkpoints[i].id,
                old_tokens,
                new_tokens,
                "aging rewrite did not shrink summary; keeping original"
            );
            continue;
        }
        let c = &mut store.checkpoints[i];
        debug!(checkpoint = %c.id, from = c.level.rank(), to = target.rank(), "aged checkpoint");
        c.summary = rewritten;
        c.token_count = new_tokens;
        c.level = target;
        c.compressed_at = Utc::now();
        delta += new_tokens as i64 - old_tokens as i64;
    }
    Ok(delta)
}

/// Delimiter between sibling summaries when merging.
const MERGE_DELIMITER: &str = "\n\n---\n\n";

/// Default number of compact checkpoints required before a merge runs.
pub const MERGE_MIN_COMPACT: usize = 3;

/// Merge the compact (Level-1) checkpoints into a single record when at
/// least `min_count` of them exist.
///
/// The merged record inherits the highest compression number and the
/// union of the replaced message ids; its timestamp is the earliest of
/// the merged set so ordering against other checkpoints is preserved.
/// Returns the new checkpoint id, or `None` when nothing was eligible.
pub async fn merge_compact_checkpoints(
    store: &mut CheckpointStore,
    summarizer: &dyn Summarizer,
    goal: Option<&Goal>,
    min_count: usize,
) -> anyhow::Result<Option<String>> {
    let compact: Vec<usize> = (0..store.checkpoints.len())
        .filter(|&i| store.checkpoints[i].level == CompressionLevel::Compact)
        .collect();
    if compact.len() < min_count.max(2) {
        return Ok(None);
    }

    let mut victims: Vec<Checkpoint> = Vec::with_capacity(compact.len());
    for &i in compact.iter().rev() {
        victims.push(store.checkpoints.remove(i));
    }
    victims.sort_by_key(|c| c.timestamp);

    let combined = victims
        .iter()
        .map(|c| c.summary.as_str())
        .collect::<Vec<_>>()
        .join(MERGE_DELIMITER);
    let merged_summary = summarizer
        .summarize(&combined, CompressionLevel::Compact, goal)
        .await;

    let merged_summary = match merged_summary {
        Ok(s) if !s.is_empty() => s,
        outcome => {
            if let Err(e) = outcome {
                warn!(error = %e, "merge summarization failed; restoring checkpoints");
            }
            // Put the victims back; a failed merge must not lose history.
            for c in victims {
                store.checkpoints.push(c);
            }
            store.checkpoints.sort_by_key(|c| c.timestamp);
            return Ok(None);
        }
    };

    let ids = victims
        .iter()
        .flat_map(|c| c.original_message_ids.iter().cloned())
        .collect();
    let number = victims.iter().map(|c| c.compression_number).max().unwrap_or(0);
    let earliest = victims.iter().map(|c| c.timestamp).min().unwrap_or_else(Utc::now);

    let mut merged = Checkpoint::new(
        merged_summary,
        ids,
        CompressionLevel::Compact,
        number,
        victims
            .last()
            .map(|c| c.model.clone())
            .unwrap_or_default(),
    );
    merged.timestamp = earliest;
    debug!(merged = victims.len(), id = %merged.id, "merged compact checkpoints");

    let id = merged.id.clone();
    store.checkpoints.push(merged);
    store.checkpoints.sort_by_key(|c| c.timestamp);
    Ok(Some(id))
}

/// Emergency down-level of a single checkpoint.  Errors when the target
/// is not strictly below the current level.
pub async fn compress_checkpoint(
    ckpt: &mut Checkpoint,
    target: CompressionLevel,
    summarizer: &dyn Summarizer,
    goal: Option<&Goal>,
) -> anyhow::Result<()> {
    if target >= ckpt.level {
        anyhow::bail!(
            "cannot compress checkpoint {} from level {} to level {}",
            ckpt.id,
            ckpt.level.rank(),
            target.rank()
        );
    }
    let rewritten = summarizer.summarize(&ckpt.summary, target, goal).await?;
    if rewritten.is_empty() {
        anyhow::bail!("summarizer returned empty output for checkpoint {}", ckpt.id);
    }
    ckpt.summary = rewritten;
    ckpt.token_count = estimate_tokens(&ckpt.summary);
    ckpt.level = target;
    ckpt.compressed_at = Utc::now();
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
