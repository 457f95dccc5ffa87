//! Backend sessions (conversation trajectories) and their summaries.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a backend session.
///
/// The backend calls these "cascades"; the identifier is an opaque string
/// (usually a UUID) and is never validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session Summary
// ============================================================================

/// Snapshot of one backend session from a list call.
///
/// `last_modified` is kept as the ISO-8601 string the backend sent. All
/// "most recent" decisions compare these strings lexicographically, which
/// orders correctly for the backend's fixed UTC `Z` format.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub summary: String,
    pub last_modified: String,
    pub step_count: u64,
}

impl SessionSummary {
    pub fn new(
        session_id: impl Into<SessionId>,
        summary: impl Into<String>,
        last_modified: impl Into<String>,
        step_count: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            summary: summary.into(),
            last_modified: last_modified.into(),
            step_count,
        }
    }
}

/// Returns the most recently modified session, if any.
///
/// Ties keep the first session in input order.
pub fn most_recent(sessions: &[SessionSummary]) -> Option<&SessionSummary> {
    sessions.iter().fold(None, |best: Option<&SessionSummary>, s| match best {
        Some(b) if b.last_modified >= s.last_modified => Some(b),
        _ => Some(s),
    })
}

/// Returns the latest `last_modified` string across sessions, if any.
pub fn latest_modified(sessions: &[SessionSummary]) -> Option<&str> {
    most_recent(sessions).map(|s| s.last_modified.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_short() {
        let id = SessionId::new("8e11bfb5-7dc2-432b-9206-928fa5c35731");
        assert_eq!(id.short(), "8e11bfb5");
    }

    #[test]
    fn test_session_id_short_short_id() {
        let id = SessionId::new("abc");
        assert_eq!(id.short(), "abc");
    }

    #[test]
    fn test_most_recent_picks_latest_timestamp() {
        let sessions = vec![
            SessionSummary::new("a", "first", "2026-02-03T09:00:00Z", 3),
            SessionSummary::new("b", "second", "2026-02-04T10:00:00Z", 5),
            SessionSummary::new("c", "third", "2026-01-30T23:59:59Z", 1),
        ];
        let best = most_recent(&sessions).unwrap();
        assert_eq!(best.session_id.as_str(), "b");
        assert_eq!(latest_modified(&sessions), Some("2026-02-04T10:00:00Z"));
    }

    #[test]
    fn test_most_recent_tie_keeps_first() {
        let sessions = vec![
            SessionSummary::new("a", "", "2026-02-04T10:00:00Z", 1),
            SessionSummary::new("b", "", "2026-02-04T10:00:00Z", 1),
        ];
        assert_eq!(most_recent(&sessions).unwrap().session_id.as_str(), "a");
    }

    #[test]
    fn test_most_recent_empty() {
        assert!(most_recent(&[]).is_none());
        assert!(latest_modified(&[]).is_none());
    }
}
