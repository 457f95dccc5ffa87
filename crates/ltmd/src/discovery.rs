//! Backend discovery - finds a running language server and its credential.
//!
//! The backend listens on a random loopback port and requires a per-process
//! credential, both visible only on its command line. Discovery:
//!
//! 1. Lists processes named like the backend executable (with retries).
//! 2. Resolves each candidate's listening ports, falling back to the port
//!    named on its command line.
//! 3. Verifies candidates with an authenticated probe.
//! 4. When several verify, keeps the one whose newest session is latest.
//! 5. When none verify, tries keyword enumeration, then logs a diagnostic
//!    process snapshot.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - [`DiscoveryEngine::scan`] never returns an error; failures are logged
//!   and reported as `None`

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ltm_core::session::latest_modified;
use ltm_protocol::method::empty_body;
use ltm_protocol::{Method, CREDENTIAL_FLAG, PORT_FLAG};

use crate::command::{CommandRunner, ShellCommand, SystemCommandRunner};
use crate::platform::{self, PlatformStrategy, ProcessCandidate};
use crate::transport::{build_client, post, HttpTransport, Transport, PROBE_TIMEOUT};

// ============================================================================
// Constants
// ============================================================================

/// Default number of enumeration attempts per scan.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay between enumeration attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Keyword used for the secondary enumeration and the diagnostic snapshot.
pub const PROCESS_KEYWORD: &str = "language_server";

// ============================================================================
// Connection Handle
// ============================================================================

/// A verified, reachable backend endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub port: u16,
    pub credential: String,
}

impl ConnectionHandle {
    pub fn new(port: u16, credential: impl Into<String>) -> Self {
        Self {
            port,
            credential: credential.into(),
        }
    }
}

// Keep the credential out of logs.
impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("port", &self.port)
            .field("credential", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Endpoint Probe
// ============================================================================

/// Network checks discovery performs against a candidate endpoint.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    /// Returns true when `port` answers an authenticated probe successfully.
    async fn probe(&self, port: u16, credential: &str) -> bool;

    /// Returns the newest session `last_modified` the endpoint reports.
    async fn latest_session(&self, handle: &ConnectionHandle) -> Option<String>;
}

/// Probe over HTTPS with a short timeout.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Option<Self> {
        match build_client(PROBE_TIMEOUT) {
            Ok(client) => Some(Self { client }),
            Err(e) => {
                warn!(error = %e, "Failed to build probe client");
                None
            }
        }
    }
}

#[async_trait]
impl EndpointProbe for HttpProbe {
    async fn probe(&self, port: u16, credential: &str) -> bool {
        let handle = ConnectionHandle::new(port, credential);
        match post(&self.client, &handle, Method::Probe, &empty_body()).await {
            Ok(_) => true,
            Err(e) => {
                debug!(port, error = %e, "Probe failed");
                false
            }
        }
    }

    async fn latest_session(&self, handle: &ConnectionHandle) -> Option<String> {
        let transport =
            HttpTransport::with_client(self.client.clone(), handle.clone(), Duration::ZERO);
        match transport.list_sessions().await {
            Ok(sessions) => latest_modified(&sessions).map(str::to_string),
            Err(e) => {
                debug!(port = handle.port, error = %e, "Session listing failed during tie-break");
                None
            }
        }
    }
}

/// Returns the first port in `ports` that passes the probe.
pub async fn verify(probe: &dyn EndpointProbe, ports: &[u16], credential: &str) -> Option<u16> {
    for &port in ports {
        if probe.probe(port, credential).await {
            return Some(port);
        }
    }
    None
}

// ============================================================================
// Backend Locator
// ============================================================================

/// Something that can find a backend endpoint.
#[async_trait]
pub trait BackendLocator: Send + Sync {
    async fn locate(&self) -> Option<ConnectionHandle>;
}

// ============================================================================
// Discovery Engine
// ============================================================================

/// Finds and verifies a running backend.
pub struct DiscoveryEngine {
    strategy: Box<dyn PlatformStrategy>,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn EndpointProbe>,
    target: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl DiscoveryEngine {
    pub fn new(
        strategy: Box<dyn PlatformStrategy>,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn EndpointProbe>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            strategy,
            runner,
            probe,
            target: target.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Builds an engine for the running host.
    ///
    /// Returns `None` on unsupported platforms or when no HTTP client can
    /// be built.
    pub async fn for_current_os() -> Option<Self> {
        let Some(target) = platform::current_target_name() else {
            warn!(
                os = std::env::consts::OS,
                arch = std::env::consts::ARCH,
                "Unsupported platform for backend discovery"
            );
            return None;
        };
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new());
        let strategy = platform::for_current_os(runner.as_ref()).await;
        let probe: Arc<dyn EndpointProbe> = Arc::new(HttpProbe::new()?);
        Some(Self::new(strategy, runner, probe, target))
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Scans for a backend, trying enumeration up to `max_attempts` times.
    pub async fn scan(&self, max_attempts: u32) -> Option<ConnectionHandle> {
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let command = self.strategy.process_list_command(&self.target);
            let candidates = match self.run(&command).await {
                Some(output) => self.strategy.parse_process_list(&output, &self.target),
                None => Vec::new(),
            };

            if candidates.is_empty() {
                debug!(attempt, target = %self.target, "No backend processes found");
            } else {
                debug!(attempt, count = candidates.len(), "Found backend candidates");
                let verified = self.verify_candidates(&candidates).await;
                if let Some(handle) = self.select(verified).await {
                    info!(port = handle.port, attempt, "Backend discovered");
                    return Some(handle);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        if let Some(handle) = self.keyword_scan().await {
            info!(port = handle.port, "Backend discovered via keyword search");
            return Some(handle);
        }

        let snapshot = diagnostic_snapshot().await;
        log_diagnostics(&self.target, &snapshot);
        None
    }

    async fn keyword_scan(&self) -> Option<ConnectionHandle> {
        let command = self.strategy.keyword_list_command(PROCESS_KEYWORD)?;
        let output = self.run(&command).await?;
        let candidates = self.strategy.parse_keyword_list(&output, PROCESS_KEYWORD);
        debug!(count = candidates.len(), "Keyword search candidates");
        let verified = self.verify_candidates(&candidates).await;
        self.select(verified).await
    }

    /// Verifies candidates in enumeration order.
    async fn verify_candidates(&self, candidates: &[ProcessCandidate]) -> Vec<ConnectionHandle> {
        let mut verified = Vec::new();
        for candidate in candidates {
            let Some(credential) = candidate.credential.as_deref() else {
                debug!(pid = candidate.pid, "Candidate has no credential, skipping");
                continue;
            };

            let ports = self.candidate_ports(candidate).await;
            if ports.is_empty() {
                debug!(pid = candidate.pid, "Candidate has no ports, skipping");
                continue;
            }

            match verify(self.probe.as_ref(), &ports, credential).await {
                Some(port) => {
                    debug!(pid = candidate.pid, port, "Candidate verified");
                    verified.push(ConnectionHandle::new(port, credential));
                }
                None => debug!(pid = candidate.pid, ?ports, "No port answered the probe"),
            }
        }
        verified
    }

    /// Listening ports of a candidate, or its command-line port.
    async fn candidate_ports(&self, candidate: &ProcessCandidate) -> Vec<u16> {
        let command = self.strategy.port_list_command(candidate.pid);
        let listed = match self.run(&command).await {
            Some(output) => self.strategy.parse_port_list(&output, candidate.pid),
            None => Vec::new(),
        };
        if listed.is_empty() {
            candidate.port.into_iter().collect()
        } else {
            listed
        }
    }

    /// Picks among verified endpoints; the latest session wins.
    async fn select(&self, verified: Vec<ConnectionHandle>) -> Option<ConnectionHandle> {
        if verified.len() <= 1 {
            return verified.into_iter().next();
        }

        let mut best: Option<(ConnectionHandle, Option<String>)> = None;
        for handle in verified {
            let latest = self.probe.latest_session(&handle).await;
            debug!(port = handle.port, latest = ?latest, "Tie-break candidate");
            let better = match &best {
                None => true,
                Some((_, best_latest)) => latest > *best_latest,
            };
            if better {
                best = Some((handle, latest));
            }
        }
        best.map(|(handle, _)| handle)
    }

    async fn run(&self, command: &ShellCommand) -> Option<String> {
        match self.runner.run(command).await {
            Ok(output) => Some(output),
            Err(e) => {
                debug!(command = %command.program, error = %e, "Enumeration command failed");
                None
            }
        }
    }
}

#[async_trait]
impl BackendLocator for DiscoveryEngine {
    async fn locate(&self) -> Option<ConnectionHandle> {
        self.scan(self.max_attempts).await
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// A process seen by the diagnostic snapshot.
///
/// Only flag presence is recorded; credential values never leave the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticProcess {
    pub pid: u32,
    pub name: String,
    pub has_port_flag: bool,
    pub has_credential_flag: bool,
}

/// Lists every process whose name contains [`PROCESS_KEYWORD`].
pub async fn diagnostic_snapshot() -> Vec<DiagnosticProcess> {
    match tokio::task::spawn_blocking(scan_processes).await {
        Ok(processes) => processes,
        Err(e) => {
            warn!(error = %e, "Diagnostic scan task panicked");
            Vec::new()
        }
    }
}

fn scan_processes() -> Vec<DiagnosticProcess> {
    let mut system = sysinfo::System::new();
    system.refresh_all();

    let mut found: Vec<DiagnosticProcess> = system
        .processes()
        .iter()
        .filter_map(|(pid, process)| {
            let name = process.name().to_string_lossy().into_owned();
            if !name.contains(PROCESS_KEYWORD) {
                return None;
            }
            let args: Vec<String> = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect();
            let has_flag = |flag: &str| args.iter().any(|a| a.starts_with(flag));
            Some(DiagnosticProcess {
                pid: pid.as_u32(),
                name,
                has_port_flag: has_flag(PORT_FLAG),
                has_credential_flag: has_flag(CREDENTIAL_FLAG),
            })
        })
        .collect();
    found.sort_by_key(|p| p.pid);
    found
}

fn log_diagnostics(target: &str, snapshot: &[DiagnosticProcess]) {
    if snapshot.is_empty() {
        warn!(target_name = target, "Backend not found: no language server processes running");
        return;
    }
    warn!(
        target_name = target,
        count = snapshot.len(),
        "Backend not found, but related processes are running"
    );
    for process in snapshot {
        warn!(
            pid = process.pid,
            name = %process.name,
            has_port_flag = process.has_port_flag,
            has_credential_flag = process.has_credential_flag,
            "Unverified language server process"
        );
    }
}
