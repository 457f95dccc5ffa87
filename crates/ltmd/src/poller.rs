//! Periodic refresh of the active session.
//!
//! The poll task only sends commands to the controller; all state lives in
//! the actor. A failed tick is logged and retried on the next one.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{ControllerHandle, ServiceError};

/// Spawns the poll task.
///
/// The first refresh runs immediately. The task stops when `cancel_token`
/// is cancelled or the controller has shut down.
pub fn spawn_poll_task(
    controller: ControllerHandle,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = poll_interval.as_secs(), "Poll task started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Poll task shutting down");
                    break;
                }

                _ = tick.tick() => {
                    if !poll_once(&controller).await {
                        break;
                    }
                }
            }
        }

        debug!("Poll task completed");
    })
}

/// Runs one refresh; returns false once the controller is gone.
async fn poll_once(controller: &ControllerHandle) -> bool {
    match controller.refresh_active(false).await {
        Ok(Some(report)) => {
            let stats = &report.stats;
            info!(
                session_id = %report.summary.session_id.short(),
                refresh = ?report.refresh,
                requests = report.request_count,
                calls = stats.total_calls,
                input = %stats.total_input,
                output = %stats.total_output,
                cache_read = %stats.total_cache_read,
                context = %stats.last_context_size,
                "Session usage"
            );
            true
        }
        Ok(None) => {
            debug!("No sessions to refresh");
            true
        }
        Err(ServiceError::ChannelClosed) => {
            warn!("Controller stopped, ending poll task");
            false
        }
        Err(e) => {
            warn!(error = %e, "Refresh failed, retrying next tick");
            true
        }
    }
}
