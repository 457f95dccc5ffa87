//! Client interface for the controller actor.
//!
//! `ControllerHandle` is cheap to clone; the poll task, the CLI and tests
//! all talk to the same actor through it.

use tokio::sync::{mpsc, oneshot};

use ltm_core::{AggregatedStats, DailyModelStats, SessionId, SessionSummary};

use crate::discovery::ConnectionHandle;

use super::commands::{ControllerCommand, ServiceError, SessionReport};

/// Handle for sending commands to the controller actor.
#[derive(Clone)]
pub struct ControllerHandle {
    sender: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    pub fn new(sender: mpsc::Sender<ControllerCommand>) -> Self {
        Self { sender }
    }

    /// Sends a command built around a fresh response channel.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> ControllerCommand,
    ) -> Result<T, ServiceError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;

        rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    /// Returns the backend endpoint, discovering it if not yet connected.
    ///
    /// # Errors
    ///
    /// - `ServiceError::BackendNotFound` if no backend could be verified
    /// - `ServiceError::ChannelClosed` if the actor has shut down
    pub async fn discover(&self) -> Result<ConnectionHandle, ServiceError> {
        self.request(|respond_to| ControllerCommand::Discover { respond_to })
            .await
    }

    /// Lists the backend's sessions, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ServiceError> {
        self.request(|respond_to| ControllerCommand::ListSessions { respond_to })
            .await
    }

    /// Returns up-to-date statistics for a session.
    ///
    /// Unchanged sessions are answered from the cache without any request;
    /// `force` always fetches past the cached offsets.
    ///
    /// # Errors
    ///
    /// - `ServiceError::SessionNotFound` if the backend does not list it
    /// - `ServiceError::Transport` if a request failed (cache untouched)
    pub async fn refresh_session(
        &self,
        session_id: SessionId,
        force: bool,
    ) -> Result<AggregatedStats, ServiceError> {
        self.request(|respond_to| ControllerCommand::RefreshSession {
            session_id,
            force,
            respond_to,
        })
        .await
    }

    /// Refreshes the most recently modified session, if there is one.
    pub async fn refresh_active(&self, force: bool) -> Result<Option<SessionReport>, ServiceError> {
        self.request(|respond_to| ControllerCommand::RefreshActive { force, respond_to })
            .await
    }

    /// Per-day usage over the trailing `day_window` days, clamped to
    /// `1..=MAX_DAY_COUNT`.
    pub async fn daily_report(&self, day_window: u32) -> Result<Vec<DailyModelStats>, ServiceError> {
        self.request(|respond_to| ControllerCommand::DailyReport {
            day_window,
            respond_to,
        })
        .await
    }
}
