//! Controller actor - owns the connection, the transport and the cache.
//!
//! Commands are handled one at a time, so the check-fetch-merge-store cycle
//! of the delta cache never interleaves, whatever triggered the refresh.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures (caller gone) are ignored

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ltm_core::{
    aggregate_by_day, filter_by_modified_date, most_recent, AggregatedStats, DailyModelStats,
    SessionId, SessionSummary, MAX_DAY_COUNT,
};

use crate::cache::DeltaCache;
use crate::discovery::{BackendLocator, ConnectionHandle};
use crate::fetcher::fetch_from;
use crate::transport::{Transport, TransportError, TransportFactory};

use super::commands::{ControllerCommand, ServiceError, SessionReport};

/// A verified endpoint and the transport bound to it.
struct Connection {
    handle: ConnectionHandle,
    transport: Arc<dyn Transport>,
}

/// The controller actor.
pub struct ControllerActor {
    receiver: mpsc::Receiver<ControllerCommand>,
    locator: Arc<dyn BackendLocator>,
    factory: Arc<dyn TransportFactory>,
    connection: Option<Connection>,
    cache: DeltaCache,
}

impl ControllerActor {
    pub fn new(
        receiver: mpsc::Receiver<ControllerCommand>,
        locator: Arc<dyn BackendLocator>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            receiver,
            locator,
            factory,
            connection: None,
            cache: DeltaCache::new(),
        }
    }

    /// Runs until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Controller actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!(
            connected = self.connection.is_some(),
            "Controller actor stopped"
        );
    }

    async fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::Discover { respond_to } => {
                let result = self.handle_discover().await;
                let _ = respond_to.send(result);
            }
            ControllerCommand::ListSessions { respond_to } => {
                let result = self.handle_list_sessions().await;
                let _ = respond_to.send(result);
            }
            ControllerCommand::RefreshSession {
                session_id,
                force,
                respond_to,
            } => {
                let result = self.handle_refresh_session(session_id, force).await;
                let _ = respond_to.send(result);
            }
            ControllerCommand::RefreshActive { force, respond_to } => {
                let result = self.handle_refresh_active(force).await;
                let _ = respond_to.send(result);
            }
            ControllerCommand::DailyReport {
                day_window,
                respond_to,
            } => {
                let result = self.handle_daily_report(day_window).await;
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    async fn connect(&mut self) -> Result<&Connection, ServiceError> {
        if self.connection.is_none() {
            let handle = self
                .locator
                .locate()
                .await
                .ok_or(ServiceError::BackendNotFound)?;
            let transport = self.factory.connect(&handle)?;
            info!(port = handle.port, "Connected to backend");
            self.connection = Some(Connection { handle, transport });
        }
        self.connection.as_ref().ok_or(ServiceError::BackendNotFound)
    }

    async fn transport(&mut self) -> Result<Arc<dyn Transport>, ServiceError> {
        Ok(Arc::clone(&self.connect().await?.transport))
    }

    /// Drops the connection after a failed request.
    fn lost(&mut self, err: TransportError) -> ServiceError {
        if let Some(connection) = self.connection.take() {
            warn!(port = connection.handle.port, error = %err, "Backend request failed, dropping connection");
        }
        ServiceError::Transport(err)
    }

    async fn sessions(&mut self) -> Result<(Arc<dyn Transport>, Vec<SessionSummary>), ServiceError> {
        let transport = self.transport().await?;
        let sessions = transport.list_sessions().await.map_err(|e| self.lost(e))?;
        Ok((transport, sessions))
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    async fn handle_discover(&mut self) -> Result<ConnectionHandle, ServiceError> {
        Ok(self.connect().await?.handle.clone())
    }

    async fn handle_list_sessions(&mut self) -> Result<Vec<SessionSummary>, ServiceError> {
        Ok(self.sessions().await?.1)
    }

    async fn handle_refresh_session(
        &mut self,
        session_id: SessionId,
        force: bool,
    ) -> Result<AggregatedStats, ServiceError> {
        let (transport, sessions) = self.sessions().await?;
        let summary = sessions
            .into_iter()
            .find(|s| s.session_id == session_id)
            .ok_or(ServiceError::SessionNotFound(session_id))?;
        Ok(self.refresh(transport.as_ref(), &summary, force).await?.stats)
    }

    async fn handle_refresh_active(
        &mut self,
        force: bool,
    ) -> Result<Option<SessionReport>, ServiceError> {
        let (transport, sessions) = self.sessions().await?;
        let Some(summary) = most_recent(&sessions).cloned() else {
            debug!("Backend has no sessions");
            return Ok(None);
        };
        self.refresh(transport.as_ref(), &summary, force).await.map(Some)
    }

    async fn refresh(
        &mut self,
        transport: &dyn Transport,
        summary: &SessionSummary,
        force: bool,
    ) -> Result<SessionReport, ServiceError> {
        let outcome = self
            .cache
            .refresh(transport, summary, force)
            .await
            .map_err(|e| self.lost(e))?;
        debug!(
            session_id = %summary.session_id,
            kind = ?outcome.kind,
            requests = outcome.request_count,
            "Session refreshed"
        );
        Ok(SessionReport {
            summary: summary.clone(),
            stats: outcome.stats,
            refresh: outcome.kind,
            request_count: outcome.request_count,
        })
    }

    /// Full fetch of every session modified in the window.
    ///
    /// History is read from offset zero and never touches the delta cache.
    async fn handle_daily_report(
        &mut self,
        day_window: u32,
    ) -> Result<Vec<DailyModelStats>, ServiceError> {
        let day_window = day_window.clamp(1, MAX_DAY_COUNT);
        let (transport, sessions) = self.sessions().await?;
        let recent = filter_by_modified_date(&sessions, day_window);
        debug!(
            sessions = sessions.len(),
            in_window = recent.len(),
            day_window,
            "Building daily report"
        );

        let mut metadata = Vec::new();
        let mut steps = Vec::new();
        for summary in &recent {
            let batch = fetch_from(transport.as_ref(), &summary.session_id, 0, 0)
                .await
                .map_err(|e| self.lost(e))?;
            if batch.truncated {
                warn!(
                    session_id = %summary.session_id,
                    next_metadata_offset = batch.next_metadata_offset,
                    next_step_offset = batch.next_step_offset,
                    "Session history exceeds the page cap, daily report is partial"
                );
            }
            metadata.extend(batch.metadata);
            steps.extend(batch.steps);
        }

        Ok(aggregate_by_day(&metadata, &steps, day_window))
    }
}
