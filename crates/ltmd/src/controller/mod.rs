//! Refresh controller using the Actor pattern.
//!
//! Every refresh trigger (poll timer, CLI command, manual refresh) goes
//! through one actor that owns the backend connection and the delta cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ControllerCommand  ┌─────────────────┐     ┌───────────┐
//! │ poll task    │────────────────────▶│ ControllerActor │────▶│ Transport │
//! │ CLI / tests  │   (mpsc channel)    │  DeltaCache     │     └───────────┘
//! └──────────────┘◀────────────────────│  Connection     │
//!                    oneshot replies   └────────┬────────┘
//!                                               │ on demand
//!                                               ▼
//!                                       BackendLocator
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel closure maps to `ServiceError::ChannelClosed`

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::discovery::BackendLocator;
use crate::transport::TransportFactory;

mod actor;
mod commands;
mod handle;

pub use actor::ControllerActor;
pub use commands::{ControllerCommand, ServiceError, SessionReport};
pub use handle::ControllerHandle;

/// Command channel buffer size.
const COMMAND_BUFFER: usize = 32;

/// Spawns the controller actor and returns a handle to it.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ltmd::controller::spawn_controller;
/// use ltmd::discovery::DiscoveryEngine;
/// use ltmd::transport::HttpTransportFactory;
///
/// #[tokio::main]
/// async fn main() {
///     let Some(engine) = DiscoveryEngine::for_current_os().await else { return };
///     let controller = spawn_controller(Arc::new(engine), Arc::new(HttpTransportFactory));
///     let report = controller.refresh_active(false).await;
/// }
/// ```
pub fn spawn_controller(
    locator: Arc<dyn BackendLocator>,
    factory: Arc<dyn TransportFactory>,
) -> ControllerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = ControllerActor::new(cmd_rx, locator, factory);
    tokio::spawn(actor.run());

    ControllerHandle::new(cmd_tx)
}
