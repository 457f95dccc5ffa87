//! Usage-bearing events fetched from the backend.
//!
//! These are the normalized forms of the loosely structured JSON the backend
//! returns. Every optional field is explicit; numeric fields have already
//! been coerced (missing or non-numeric values become zero) by the protocol
//! layer, so aggregation never has to deal with malformed input.

use serde::{Deserialize, Serialize};

use crate::TokenCount;

/// Token usage attached to a model invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Raw model identifier, if the backend reported one.
    pub model: Option<String>,
    pub input: TokenCount,
    pub output: TokenCount,
    pub cache_read: TokenCount,
}

impl Usage {
    pub fn new(model: Option<&str>, input: u64, output: u64, cache_read: u64) -> Self {
        Self {
            model: model.map(str::to_string),
            input: TokenCount::new(input),
            output: TokenCount::new(output),
            cache_read: TokenCount::new(cache_read),
        }
    }
}

/// A chat/model invocation record ("generator metadata").
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Explicit record timestamp (RFC 3339), when present.
    pub timestamp: Option<String>,
    /// Timestamp of the chat turn start nested inside the record.
    pub session_started_at: Option<String>,
    pub usage: Option<Usage>,
    /// Backend's estimate of the context window in use after this call.
    pub context_estimate: TokenCount,
}

impl MetadataRecord {
    /// Creates a record carrying only usage.
    pub fn with_usage(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Default::default()
        }
    }

    /// Timestamps usable for day bucketing, in priority order.
    ///
    /// The explicit record timestamp comes first, then the nested chat
    /// start time. Empty strings are skipped.
    pub fn date_sources(&self) -> impl Iterator<Item = &str> {
        [self.timestamp.as_deref(), self.session_started_at.as_deref()]
            .into_iter()
            .flatten()
            .filter(|t| !t.trim().is_empty())
    }
}

/// An auxiliary trajectory step (checkpoint, sub-agent action, ...).
///
/// Any step may carry usage regardless of its type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_type: Option<String>,
    pub created_at: Option<String>,
    pub usage: Option<Usage>,
}

impl StepRecord {
    /// Creates a step carrying only usage.
    pub fn with_usage(step_type: &str, usage: Usage) -> Self {
        Self {
            step_type: Some(step_type.to_string()),
            created_at: None,
            usage: Some(usage),
        }
    }
}
