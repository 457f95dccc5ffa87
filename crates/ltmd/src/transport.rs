//! Request layer over a verified backend endpoint.
//!
//! [`Transport::call`] is the only primitive; the typed wrappers decode its
//! JSON into `ltm_core` records. Failures propagate untouched: retrying is
//! left to the next poll or user action.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Every reqwest failure maps to a [`TransportError`] variant

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use ltm_core::{MetadataRecord, SessionId, SessionSummary, StepRecord};
use ltm_protocol::method::{
    base_url, empty_body, CSRF_HEADER, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER,
};
use ltm_protocol::{parse_metadata_page, parse_steps_page, Method, PageRequest, RawSessionList};

use crate::discovery::ConnectionHandle;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for one data request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum spacing between consecutive requests on one transport.
pub const CALL_SPACING: Duration = Duration::from_millis(50);

// ============================================================================
// Errors
// ============================================================================

/// A single request failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{method} timed out")]
    Timeout { method: &'static str },

    #[error("could not connect to backend on port {port}: {message}")]
    Connect { port: u16, message: String },

    #[error("{method} returned HTTP {status}")]
    Status { method: &'static str, status: u16 },

    #[error("invalid {method} response: {message}")]
    Decode {
        method: &'static str,
        message: String,
    },

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    fn from_reqwest(method: Method, port: u16, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                method: method.name(),
            }
        } else if err.is_connect() {
            Self::Connect {
                port,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::Decode {
                method: method.name(),
                message: err.to_string(),
            }
        } else {
            Self::Request(err.to_string())
        }
    }

    fn decode(method: Method, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            method: method.name(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Issues backend calls over an established connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts `payload` to `method` and returns the decoded JSON body.
    async fn call(&self, method: Method, payload: Value) -> Result<Value, TransportError>;

    /// All sessions known to the backend, newest first.
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, TransportError> {
        let method = Method::GetAllSessions;
        let body = self.call(method, empty_body()).await?;
        let list = RawSessionList::from_value(body).map_err(|e| TransportError::decode(method, e))?;
        Ok(list.to_summaries())
    }

    /// One page of metadata records starting at `offset`.
    async fn metadata_page(
        &self,
        session_id: &SessionId,
        offset: usize,
    ) -> Result<Vec<MetadataRecord>, TransportError> {
        let method = Method::GetMetadataPage;
        let body = self
            .call(method, PageRequest::new(session_id, offset).to_value())
            .await?;
        parse_metadata_page(body).map_err(|e| TransportError::decode(method, e))
    }

    /// One page of steps starting at `offset`.
    async fn steps_page(
        &self,
        session_id: &SessionId,
        offset: usize,
    ) -> Result<Vec<StepRecord>, TransportError> {
        let method = Method::GetStepsPage;
        let body = self
            .call(method, PageRequest::new(session_id, offset).to_value())
            .await?;
        parse_steps_page(body).map_err(|e| TransportError::decode(method, e))
    }
}

/// Builds the HTTP client used for loopback calls.
///
/// The backend serves a self-signed certificate on 127.0.0.1, so
/// certificate validation is off and proxies are bypassed.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::Request(e.to_string()))
}

/// Posts one authenticated request and returns the raw response.
pub(crate) async fn post(
    client: &reqwest::Client,
    handle: &ConnectionHandle,
    method: Method,
    payload: &Value,
) -> Result<reqwest::Response, TransportError> {
    let url = format!("{}{}", base_url(handle.port), method.path());
    trace!(url = %url, "POST");

    let response = client
        .post(&url)
        .header(CSRF_HEADER, &handle.credential)
        .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
        .json(payload)
        .send()
        .await
        .map_err(|e| TransportError::from_reqwest(method, handle.port, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            method: method.name(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

/// HTTPS transport bound to one verified endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    handle: ConnectionHandle,
    spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl HttpTransport {
    pub fn new(handle: ConnectionHandle) -> Result<Self, TransportError> {
        Ok(Self::with_client(build_client(REQUEST_TIMEOUT)?, handle, CALL_SPACING))
    }

    pub fn with_client(client: reqwest::Client, handle: ConnectionHandle, spacing: Duration) -> Self {
        Self {
            client,
            handle,
            spacing,
            last_call: Mutex::new(None),
        }
    }

    /// Waits until `spacing` has passed since the previous call.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.spacing;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: Method, payload: Value) -> Result<Value, TransportError> {
        self.pace().await;
        let response = post(&self.client, &self.handle, method, &payload).await?;
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::from_reqwest(method, self.handle.port, e))?;
        debug!(method = method.name(), port = self.handle.port, "Backend call completed");
        Ok(body)
    }
}

/// Creates transports for newly discovered endpoints.
pub trait TransportFactory: Send + Sync {
    fn connect(
        &self,
        handle: &ConnectionHandle,
    ) -> Result<std::sync::Arc<dyn Transport>, TransportError>;
}

/// Factory producing [`HttpTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn connect(
        &self,
        handle: &ConnectionHandle,
    ) -> Result<std::sync::Arc<dyn Transport>, TransportError> {
        Ok(std::sync::Arc::new(HttpTransport::new(handle.clone())?))
    }
}
