//! Parsing backend JSON responses.
//!
//! Backend payloads are protobuf messages rendered as JSON: every field is
//! optional and 64-bit integers usually arrive as decimal strings. All raw
//! structures therefore default every field, and numbers go through
//! [`coerce_u64`] which maps anything non-numeric to zero.
//!
//! A page item that does not match the expected shape at all still decodes
//! (as an empty record) so that it keeps its place in the offset space.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use ltm_core::{MetadataRecord, SessionId, SessionSummary, StepRecord, TokenCount, Usage};

/// Errors decoding a whole response body.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Coerces a loosely typed JSON number to `u64`.
///
/// Accepts integers, finite non-negative floats (truncated) and decimal
/// strings. Anything else, including negative numbers, is zero.
pub fn coerce_u64(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && *f >= 0.0)
                        .map(|f| f as u64)
                })
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn coerce_opt(value: &Option<Value>) -> u64 {
    value.as_ref().map(coerce_u64).unwrap_or(0)
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

// ============================================================================
// Sessions
// ============================================================================

/// Response of the list-all-sessions method.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSessionList {
    #[serde(default)]
    pub trajectory_summaries: BTreeMap<String, RawSessionSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSessionSummary {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub last_modified_time: Option<String>,
    #[serde(default)]
    pub step_count: Option<Value>,
}

impl RawSessionList {
    /// Decodes a list-all-sessions response body.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value).map_err(|source| ProtocolError::Decode {
            what: "session list",
            source,
        })
    }

    /// Converts to summaries, newest first (ties by session id).
    pub fn to_summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .trajectory_summaries
            .iter()
            .map(|(id, raw)| SessionSummary {
                session_id: SessionId::new(id.clone()),
                summary: raw.summary.clone().unwrap_or_default(),
                last_modified: raw.last_modified_time.clone().unwrap_or_default(),
                step_count: coerce_opt(&raw.step_count),
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.session_id.as_str().cmp(b.session_id.as_str()))
        });
        summaries
    }
}

// ============================================================================
// Usage
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUsage {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: Option<Value>,
    #[serde(default)]
    pub output_tokens: Option<Value>,
    #[serde(default)]
    pub cache_read_tokens: Option<Value>,
}

impl RawUsage {
    /// Converts to a domain usage, falling back to `model_hint` for the model.
    pub fn to_usage(&self, model_hint: Option<&String>) -> Usage {
        Usage {
            model: non_empty(&self.model).or_else(|| model_hint.cloned()),
            input: TokenCount::new(coerce_opt(&self.input_tokens)),
            output: TokenCount::new(coerce_opt(&self.output_tokens)),
            cache_read: TokenCount::new(coerce_opt(&self.cache_read_tokens)),
        }
    }
}

// ============================================================================
// Metadata Records
// ============================================================================

/// One item of a metadata page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetadataRecord {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub chat_model: Option<RawChatModel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChatModel {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
    #[serde(default)]
    pub chat_start_metadata: Option<RawChatStart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChatStart {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub context_window_metadata: Option<RawContextWindow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContextWindow {
    #[serde(default)]
    pub estimated_tokens_used: Option<Value>,
}

impl RawMetadataRecord {
    /// Converts to the domain record.
    pub fn to_record(&self) -> MetadataRecord {
        let chat = self.chat_model.as_ref();
        let start = chat.and_then(|c| c.chat_start_metadata.as_ref());
        let model_hint = chat.and_then(|c| non_empty(&c.model));

        MetadataRecord {
            timestamp: non_empty(&self.timestamp),
            session_started_at: start.and_then(|s| non_empty(&s.created_at)),
            usage: chat
                .and_then(|c| c.usage.as_ref())
                .map(|u| u.to_usage(model_hint.as_ref())),
            context_estimate: TokenCount::new(
                start
                    .and_then(|s| s.context_window_metadata.as_ref())
                    .map(|w| coerce_opt(&w.estimated_tokens_used))
                    .unwrap_or(0),
            ),
        }
    }
}

// ============================================================================
// Steps
// ============================================================================

/// One item of a steps page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStep {
    #[serde(default, rename = "type")]
    pub step_type: Option<String>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
    #[serde(default)]
    pub metadata: Option<RawStepMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStepMetadata {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub model_usage: Option<RawUsage>,
}

impl RawStep {
    /// Converts to the domain step.
    ///
    /// Usage is taken from the step itself or, failing that, its metadata.
    pub fn to_record(&self) -> StepRecord {
        let metadata = self.metadata.as_ref();
        StepRecord {
            step_type: non_empty(&self.step_type),
            created_at: metadata.and_then(|m| non_empty(&m.created_at)),
            usage: self
                .usage
                .as_ref()
                .or_else(|| metadata.and_then(|m| m.model_usage.as_ref()))
                .map(|u| u.to_usage(None)),
        }
    }
}

// ============================================================================
// Pages
// ============================================================================

/// A page of metadata items.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetadataPage {
    #[serde(default, rename = "generatorMetadata", alias = "items")]
    pub items: Vec<Value>,
}

/// A page of step items.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStepsPage {
    #[serde(default, rename = "steps", alias = "items")]
    pub items: Vec<Value>,
}

/// Decodes each item independently; malformed items become defaults.
fn decode_items<T: DeserializeOwned + Default>(items: Vec<Value>, what: &'static str) -> Vec<T> {
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).unwrap_or_else(|e| {
                debug!(what, error = %e, "Malformed item, treating as empty");
                T::default()
            })
        })
        .collect()
}

/// Decodes a metadata page response into domain records.
pub fn parse_metadata_page(value: Value) -> Result<Vec<MetadataRecord>, ProtocolError> {
    let page: RawMetadataPage =
        serde_json::from_value(value).map_err(|source| ProtocolError::Decode {
            what: "metadata page",
            source,
        })?;
    Ok(decode_items::<RawMetadataRecord>(page.items, "metadata")
        .iter()
        .map(RawMetadataRecord::to_record)
        .collect())
}

/// Decodes a steps page response into domain steps.
pub fn parse_steps_page(value: Value) -> Result<Vec<StepRecord>, ProtocolError> {
    let page: RawStepsPage =
        serde_json::from_value(value).map_err(|source| ProtocolError::Decode {
            what: "steps page",
            source,
        })?;
    Ok(decode_items::<RawStep>(page.items, "step")
        .iter()
        .map(RawStep::to_record)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_u64() {
        assert_eq!(coerce_u64(&json!(42)), 42);
        assert_eq!(coerce_u64(&json!("1234")), 1234);
        assert_eq!(coerce_u64(&json!(" 77 ")), 77);
        assert_eq!(coerce_u64(&json!(12.9)), 12);
        assert_eq!(coerce_u64(&json!("3.5")), 3);
        assert_eq!(coerce_u64(&json!(-5)), 0);
        assert_eq!(coerce_u64(&json!("lots")), 0);
        assert_eq!(coerce_u64(&json!(null)), 0);
        assert_eq!(coerce_u64(&json!({"n": 1})), 0);
    }

    #[test]
    fn test_session_list() {
        let body = json!({
            "trajectorySummaries": {
                "old": {"summary": "Old work", "lastModifiedTime": "2026-02-03T09:00:00Z", "stepCount": "12"},
                "new": {"summary": "New work", "lastModifiedTime": "2026-02-04T10:00:00Z", "stepCount": 3},
                "bare": {}
            }
        });
        let summaries = RawSessionList::from_value(body).unwrap().to_summaries();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].session_id.as_str(), "new");
        assert_eq!(summaries[0].step_count, 3);
        assert_eq!(summaries[1].session_id.as_str(), "old");
        assert_eq!(summaries[1].step_count, 12);
        assert_eq!(summaries[2].last_modified, "");
    }

    #[test]
    fn test_empty_session_list() {
        let summaries = RawSessionList::from_value(json!({})).unwrap().to_summaries();
        assert!(summaries.is_empty());
    }

    #[test]
    fn test_session_list_wrong_shape_is_error() {
        assert!(RawSessionList::from_value(json!({"trajectorySummaries": 5})).is_err());
    }

    #[test]
    fn test_metadata_record_full() {
        let body = json!({
            "generatorMetadata": [{
                "chatModel": {
                    "model": "MODEL_CLAUDE_4_5_SONNET",
                    "usage": {"inputTokens": "100", "outputTokens": "50", "cacheReadTokens": "20"},
                    "chatStartMetadata": {
                        "createdAt": "2026-01-20T10:53:04Z",
                        "contextWindowMetadata": {"estimatedTokensUsed": 4096}
                    }
                }
            }]
        });
        let records = parse_metadata_page(body).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.timestamp, None);
        assert_eq!(record.session_started_at.as_deref(), Some("2026-01-20T10:53:04Z"));
        assert_eq!(record.context_estimate.as_u64(), 4096);
        let usage = record.usage.as_ref().unwrap();
        assert_eq!(usage.model.as_deref(), Some("MODEL_CLAUDE_4_5_SONNET"));
        assert_eq!(usage.input.as_u64(), 100);
        assert_eq!(usage.output.as_u64(), 50);
        assert_eq!(usage.cache_read.as_u64(), 20);
    }

    #[test]
    fn test_usage_model_preferred_over_chat_model() {
        let body = json!({"items": [{
            "timestamp": "2026-01-21T00:00:00Z",
            "chatModel": {"model": "A", "usage": {"model": "B", "inputTokens": 1}}
        }]});
        let records = parse_metadata_page(body).unwrap();
        assert_eq!(records[0].usage.as_ref().unwrap().model.as_deref(), Some("B"));
        assert_eq!(records[0].timestamp.as_deref(), Some("2026-01-21T00:00:00Z"));
    }

    #[test]
    fn test_malformed_item_keeps_its_slot() {
        let body = json!({"generatorMetadata": [
            "garbage",
            {"chatModel": "also garbage"},
            {"chatModel": {"usage": {"inputTokens": "not a number"}}}
        ]});
        let records = parse_metadata_page(body).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].usage.is_none());
        assert!(records[1].usage.is_none());
        assert_eq!(records[2].usage.as_ref().unwrap().input.as_u64(), 0);
    }

    #[test]
    fn test_empty_page() {
        assert!(parse_metadata_page(json!({})).unwrap().is_empty());
        assert!(parse_steps_page(json!({"steps": []})).unwrap().is_empty());
    }

    #[test]
    fn test_steps_usage_locations() {
        let body = json!({"steps": [
            {"type": "CORTEX_STEP_TYPE_CHECKPOINT",
             "metadata": {"createdAt": "2026-02-05T09:30:00Z",
                          "modelUsage": {"model": "MODEL_GOOGLE_GEMINI_2_5_FLASH", "inputTokens": "300"}}},
            {"type": "CORTEX_STEP_TYPE_SUBAGENT", "usage": {"outputTokens": 9}},
            {"type": "CORTEX_STEP_TYPE_USER_INPUT", "metadata": {"createdAt": "2026-02-05T09:29:00Z"}}
        ]});
        let steps = parse_steps_page(body).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].created_at.as_deref(), Some("2026-02-05T09:30:00Z"));
        assert_eq!(steps[0].usage.as_ref().unwrap().input.as_u64(), 300);
        assert_eq!(steps[1].usage.as_ref().unwrap().output.as_u64(), 9);
        assert!(steps[2].usage.is_none());
    }
}
