//! Model catalog: display names, sort order and colours.
//!
//! The backend reports raw model identifiers such as
//! `MODEL_CLAUDE_4_5_SONNET`. Statistics are keyed by the human-readable
//! display name resolved here; identifiers missing from the catalog keep
//! their raw identifier and sort after every catalogued model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort position given to models that are not in the catalog.
pub const UNKNOWN_MODEL_ORDER: u32 = u32::MAX;

/// Display colour given to models that are not in the catalog.
pub const DEFAULT_MODEL_COLOR: &str = "#9AA0A6";

/// Display name used when a usage record carries no model identifier at all.
pub const UNKNOWN_MODEL_NAME: &str = "Unknown";

/// Known backend model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    #[serde(rename = "MODEL_GOOGLE_GEMINI_3_PRO_HIGH")]
    Gemini3ProHigh,

    #[serde(rename = "MODEL_GOOGLE_GEMINI_3_PRO_LOW")]
    Gemini3ProLow,

    #[serde(rename = "MODEL_GOOGLE_GEMINI_2_5_FLASH")]
    Gemini25Flash,

    #[serde(rename = "MODEL_CLAUDE_4_5_SONNET")]
    Sonnet45,

    #[serde(rename = "MODEL_CLAUDE_4_5_SONNET_THINKING")]
    Sonnet45Thinking,

    #[serde(rename = "MODEL_CLAUDE_4_5_OPUS_THINKING")]
    Opus45Thinking,

    #[serde(rename = "MODEL_OPENAI_GPT_OSS_120B_MEDIUM")]
    GptOss120bMedium,
}

impl Model {
    /// Every catalogued model, in display order.
    pub const ALL: [Model; 7] = [
        Self::Gemini3ProHigh,
        Self::Gemini3ProLow,
        Self::Gemini25Flash,
        Self::Sonnet45,
        Self::Sonnet45Thinking,
        Self::Opus45Thinking,
        Self::GptOss120bMedium,
    ];

    /// Returns the raw identifier the backend uses for this model.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Gemini3ProHigh => "MODEL_GOOGLE_GEMINI_3_PRO_HIGH",
            Self::Gemini3ProLow => "MODEL_GOOGLE_GEMINI_3_PRO_LOW",
            Self::Gemini25Flash => "MODEL_GOOGLE_GEMINI_2_5_FLASH",
            Self::Sonnet45 => "MODEL_CLAUDE_4_5_SONNET",
            Self::Sonnet45Thinking => "MODEL_CLAUDE_4_5_SONNET_THINKING",
            Self::Opus45Thinking => "MODEL_CLAUDE_4_5_OPUS_THINKING",
            Self::GptOss120bMedium => "MODEL_OPENAI_GPT_OSS_120B_MEDIUM",
        }
    }

    /// Returns a human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Gemini3ProHigh => "Gemini 3 Pro (High)",
            Self::Gemini3ProLow => "Gemini 3 Pro (Low)",
            Self::Gemini25Flash => "Gemini 2.5 Flash",
            Self::Sonnet45 => "Claude Sonnet 4.5",
            Self::Sonnet45Thinking => "Claude Sonnet 4.5 (Thinking)",
            Self::Opus45Thinking => "Claude Opus 4.5 (Thinking)",
            Self::GptOss120bMedium => "GPT-OSS 120B (Medium)",
        }
    }

    /// Returns the fixed position of this model in breakdowns.
    pub fn sort_order(&self) -> u32 {
        match self {
            Self::Gemini3ProHigh => 0,
            Self::Gemini3ProLow => 1,
            Self::Gemini25Flash => 2,
            Self::Sonnet45 => 3,
            Self::Sonnet45Thinking => 4,
            Self::Opus45Thinking => 5,
            Self::GptOss120bMedium => 6,
        }
    }

    /// Returns the display colour as a hex string.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Gemini3ProHigh => "#4285F4",
            Self::Gemini3ProLow => "#8AB4F8",
            Self::Gemini25Flash => "#34A853",
            Self::Sonnet45 => "#D97757",
            Self::Sonnet45Thinking => "#E8A87C",
            Self::Opus45Thinking => "#B5533C",
            Self::GptOss120bMedium => "#10A37F",
        }
    }

    /// Parses a model from its raw identifier.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.id() == id)
    }

    /// Finds a model by its display name.
    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.display_name() == name)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Resolves a raw model identifier to the display name statistics are keyed by.
///
/// Unknown identifiers are returned unchanged; a missing identifier maps to
/// [`UNKNOWN_MODEL_NAME`].
pub fn resolve_display_name(raw_id: Option<&str>) -> String {
    match raw_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => Model::from_id(id)
            .map(|m| m.display_name().to_string())
            .unwrap_or_else(|| id.to_string()),
        None => UNKNOWN_MODEL_NAME.to_string(),
    }
}

/// Sort order for a display name (catalogued models first).
pub fn sort_order_for(display_name: &str) -> u32 {
    Model::from_display_name(display_name)
        .map(|m| m.sort_order())
        .unwrap_or(UNKNOWN_MODEL_ORDER)
}

/// Display colour for a display name.
pub fn color_for(display_name: &str) -> &'static str {
    Model::from_display_name(display_name)
        .map(|m| m.color())
        .unwrap_or(DEFAULT_MODEL_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_parsing() {
        let model: Model = serde_json::from_str("\"MODEL_CLAUDE_4_5_SONNET\"").unwrap();
        assert_eq!(model, Model::Sonnet45);
        assert_eq!(model.display_name(), "Claude Sonnet 4.5");
    }

    #[test]
    fn test_model_from_id() {
        assert_eq!(Model::from_id("MODEL_GOOGLE_GEMINI_2_5_FLASH"), Some(Model::Gemini25Flash));
        assert_eq!(Model::from_id("MODEL_SOMETHING_NEW"), None);
    }

    #[test]
    fn test_catalog_is_consistent() {
        for (index, model) in Model::ALL.iter().enumerate() {
            assert_eq!(model.sort_order() as usize, index);
            assert_eq!(Model::from_id(model.id()), Some(*model));
            assert_eq!(Model::from_display_name(model.display_name()), Some(*model));
        }
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_raw_id() {
        assert_eq!(resolve_display_name(Some("MODEL_SOMETHING_NEW")), "MODEL_SOMETHING_NEW");
        assert_eq!(sort_order_for("MODEL_SOMETHING_NEW"), UNKNOWN_MODEL_ORDER);
        assert_eq!(color_for("MODEL_SOMETHING_NEW"), DEFAULT_MODEL_COLOR);
    }

    #[test]
    fn test_resolve_missing_id() {
        assert_eq!(resolve_display_name(None), UNKNOWN_MODEL_NAME);
        assert_eq!(resolve_display_name(Some("  ")), UNKNOWN_MODEL_NAME);
    }

    #[test]
    fn test_resolve_known_id() {
        assert_eq!(
            resolve_display_name(Some("MODEL_CLAUDE_4_5_OPUS_THINKING")),
            "Claude Opus 4.5 (Thinking)"
        );
        assert_eq!(sort_order_for("Claude Opus 4.5 (Thinking)"), 5);
        assert_eq!(color_for("Gemini 3 Pro (High)"), "#4285F4");
    }
}
