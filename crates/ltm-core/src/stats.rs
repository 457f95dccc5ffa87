//! Session statistics: per-model breakdowns, totals and merging.
//!
//! Everything here is pure computation over already-fetched records.
//!
//! # Ordering
//!
//! Breakdowns are ordered by the model catalog's fixed sort order. Models
//! missing from the catalog sort last and keep the order in which they were
//! first seen (the sort is stable).

use serde::{Deserialize, Serialize};

use crate::model::{color_for, resolve_display_name, sort_order_for};
use crate::record::{MetadataRecord, StepRecord, Usage};
use crate::tokens::cache_efficiency;
use crate::TokenCount;

// ============================================================================
// Model Stats
// ============================================================================

/// Usage accumulated for one model, keyed by display name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelStats {
    pub display_name: String,
    pub calls: u64,
    pub input: TokenCount,
    pub output: TokenCount,
    pub cache_read: TokenCount,
}

impl ModelStats {
    /// Creates an empty accumulator for a display name.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Folds one usage-bearing call into this accumulator.
    pub fn record(&mut self, usage: &Usage) {
        self.calls = self.calls.saturating_add(1);
        self.input += usage.input;
        self.output += usage.output;
        self.cache_read += usage.cache_read;
    }

    /// Adds another accumulator's counts to this one.
    pub fn absorb(&mut self, other: &ModelStats) {
        self.calls = self.calls.saturating_add(other.calls);
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
    }

    /// Position of this model in catalog order.
    pub fn sort_order(&self) -> u32 {
        sort_order_for(&self.display_name)
    }

    /// Display colour from the catalog.
    pub fn color(&self) -> &'static str {
        color_for(&self.display_name)
    }

    /// Percentage of this model's input served from cache.
    pub fn cache_efficiency(&self) -> u32 {
        cache_efficiency(self.input, self.cache_read)
    }
}

// ============================================================================
// Totals
// ============================================================================

/// Call and token totals across all models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input: TokenCount,
    pub output: TokenCount,
    pub cache_read: TokenCount,
}

impl UsageTotals {
    /// Folds one usage-bearing call into the totals.
    pub fn record(&mut self, usage: &Usage) {
        self.calls = self.calls.saturating_add(1);
        self.input += usage.input;
        self.output += usage.output;
        self.cache_read += usage.cache_read;
    }

    /// Returns true if no call was recorded.
    pub fn is_empty(&self) -> bool {
        self.calls == 0
    }
}

// ============================================================================
// Accumulator
// ============================================================================

/// Per-model accumulator with at most one entry per display name.
///
/// Entries keep first-seen order until [`ModelAccumulator::into_sorted`].
#[derive(Debug, Clone, Default)]
pub(crate) struct ModelAccumulator {
    entries: Vec<ModelStats>,
}

impl ModelAccumulator {
    fn with_entry(&mut self, display_name: &str, apply: impl FnOnce(&mut ModelStats)) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|m| m.display_name == display_name)
        {
            apply(existing);
            return;
        }
        let mut created = ModelStats::new(display_name);
        apply(&mut created);
        self.entries.push(created);
    }

    /// Resolves the usage's model and folds the call into its entry.
    pub(crate) fn record(&mut self, usage: &Usage) {
        let display_name = resolve_display_name(usage.model.as_deref());
        self.with_entry(&display_name, |entry| entry.record(usage));
    }

    /// Merges an existing accumulator entry into this one.
    pub(crate) fn absorb(&mut self, stats: &ModelStats) {
        self.with_entry(&stats.display_name, |entry| entry.absorb(stats));
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ModelStats> {
        self.entries.iter()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the accumulator, returning entries in catalog order.
    pub(crate) fn into_sorted(mut self) -> Vec<ModelStats> {
        self.entries.sort_by_key(ModelStats::sort_order);
        self.entries
    }
}

// ============================================================================
// Aggregated Stats
// ============================================================================

/// Cumulative usage for one session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub total_calls: u64,
    pub total_input: TokenCount,
    pub total_output: TokenCount,
    pub total_cache_read: TokenCount,
    /// Context-window estimate of the most recently observed metadata record.
    pub last_context_size: TokenCount,
    /// One entry per display name, in catalog order.
    pub model_breakdown: Vec<ModelStats>,
}

impl AggregatedStats {
    /// Returns true if no usage was recorded.
    pub fn is_empty(&self) -> bool {
        self.total_calls == 0 && self.total_input.is_zero()
    }

    /// Looks up a model entry by display name.
    pub fn model(&self, display_name: &str) -> Option<&ModelStats> {
        self.model_breakdown
            .iter()
            .find(|m| m.display_name == display_name)
    }

    /// Percentage of the session's input served from cache.
    pub fn cache_efficiency(&self) -> u32 {
        cache_efficiency(self.total_input, self.total_cache_read)
    }

    fn from_parts(totals: UsageTotals, last_context_size: TokenCount, acc: ModelAccumulator) -> Self {
        Self {
            total_calls: totals.calls,
            total_input: totals.input,
            total_output: totals.output,
            total_cache_read: totals.cache_read,
            last_context_size,
            model_breakdown: acc.into_sorted(),
        }
    }
}

/// Aggregates raw metadata and step batches into session statistics.
///
/// Every metadata record and every step that carries usage counts as one
/// call, whatever the step's type. `last_context_size` is the context
/// estimate of the last metadata record in `metadata`.
pub fn calculate(metadata: &[MetadataRecord], steps: &[StepRecord]) -> AggregatedStats {
    let mut acc = ModelAccumulator::default();
    let mut totals = UsageTotals::default();

    let usages = metadata
        .iter()
        .filter_map(|r| r.usage.as_ref())
        .chain(steps.iter().filter_map(|s| s.usage.as_ref()));
    for usage in usages {
        acc.record(usage);
        totals.record(usage);
    }

    let last_context_size = metadata
        .last()
        .map(|r| r.context_estimate)
        .unwrap_or_default();

    AggregatedStats::from_parts(totals, last_context_size, acc)
}

/// Merges a delta aggregate into a base aggregate.
///
/// Totals are summed and model entries unioned by display name. The delta's
/// `last_context_size` wins only if the delta saw at least one call or
/// input token.
pub fn merge(base: &AggregatedStats, delta: &AggregatedStats) -> AggregatedStats {
    let delta_contributed = delta.total_calls > 0 || !delta.total_input.is_zero();

    let mut acc = ModelAccumulator::default();
    for stats in base.model_breakdown.iter().chain(&delta.model_breakdown) {
        acc.absorb(stats);
    }

    AggregatedStats {
        total_calls: base.total_calls.saturating_add(delta.total_calls),
        total_input: base.total_input + delta.total_input,
        total_output: base.total_output + delta.total_output,
        total_cache_read: base.total_cache_read + delta.total_cache_read,
        last_context_size: if delta_contributed {
            delta.last_context_size
        } else {
            base.last_context_size
        },
        model_breakdown: acc.into_sorted(),
    }
}
