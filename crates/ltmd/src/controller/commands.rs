//! Controller commands, results and errors.
//!
//! - `ControllerCommand`: requests sent to the actor
//! - `ServiceError`: failures surfaced to callers
//! - `SessionReport`: the result of refreshing the active session

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use ltm_core::{AggregatedStats, DailyModelStats, SessionId, SessionSummary};

use crate::cache::RefreshKind;
use crate::discovery::ConnectionHandle;
use crate::transport::TransportError;

// ============================================================================
// Controller Commands
// ============================================================================

/// Commands processed sequentially by the controller actor.
#[derive(Debug)]
pub enum ControllerCommand {
    /// Returns the current connection, discovering one if needed.
    Discover {
        respond_to: oneshot::Sender<Result<ConnectionHandle, ServiceError>>,
    },

    /// Lists the backend's sessions, newest first.
    ListSessions {
        respond_to: oneshot::Sender<Result<Vec<SessionSummary>, ServiceError>>,
    },

    /// Refreshes one session through the delta cache.
    RefreshSession {
        session_id: SessionId,
        force: bool,
        respond_to: oneshot::Sender<Result<AggregatedStats, ServiceError>>,
    },

    /// Refreshes the most recently modified session.
    ///
    /// Answers `None` when the backend has no sessions.
    RefreshActive {
        force: bool,
        respond_to: oneshot::Sender<Result<Option<SessionReport>, ServiceError>>,
    },

    /// Builds the per-day report over the trailing `day_window` days.
    DailyReport {
        day_window: u32,
        respond_to: oneshot::Sender<Result<Vec<DailyModelStats>, ServiceError>>,
    },
}

// ============================================================================
// Results
// ============================================================================

/// Statistics of the active session and how they were obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub summary: SessionSummary,
    pub stats: AggregatedStats,
    pub refresh: RefreshKind,
    pub request_count: u32,
}

// ============================================================================
// Service Errors
// ============================================================================

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No reachable backend was found.
    #[error("language server backend not found")]
    BackendNotFound,

    /// A backend request failed; the connection has been dropped.
    #[error("backend request failed: {0}")]
    Transport(#[from] TransportError),

    /// The backend does not know the session.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The controller has shut down.
    #[error("controller channel closed")]
    ChannelClosed,
}
