//! Integration tests for backend discovery.
//!
//! Process listings and probes are faked, so these tests exercise the whole
//! scan pipeline (enumeration, port resolution, verification, tie-break,
//! keyword fallback) without touching the host.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ltmd::command::{CommandError, CommandRunner, ShellCommand};
use ltmd::discovery::{BackendLocator, ConnectionHandle, DiscoveryEngine, EndpointProbe};
use ltmd::platform::{PlatformStrategy, SocketTool, UnixStrategy, WindowsStrategy};

const TARGET: &str = "language_server_linux_x64";

// ============================================================================
// Test Helpers
// ============================================================================

/// Answers commands from scripted outputs keyed by their command line.
///
/// Each key holds a queue; the last output repeats once the queue drains.
#[derive(Default)]
struct ScriptedRunner {
    outputs: Mutex<HashMap<String, VecDeque<String>>>,
    runs: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn on(self, command: ShellCommand, outputs: &[&str]) -> Self {
        self.outputs.lock().unwrap().insert(
            command.to_string(),
            outputs.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    fn runs_of(&self, command: &ShellCommand) -> usize {
        let key = command.to_string();
        self.runs.lock().unwrap().iter().filter(|r| **r == key).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &ShellCommand) -> Result<String, CommandError> {
        let key = command.to_string();
        self.runs.lock().unwrap().push(key.clone());
        let mut outputs = self.outputs.lock().unwrap();
        let queue = outputs.get_mut(&key).ok_or_else(|| CommandError::Failed {
            program: command.program.clone(),
            code: Some(1),
            stderr: "not scripted".to_string(),
        })?;
        let output = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Ok(output)
    }

    async fn is_available(&self, _program: &str) -> bool {
        true
    }
}

/// Verifies a fixed set of ports and reports a latest session per port.
#[derive(Default)]
struct FakeProbe {
    live: HashMap<u16, Option<&'static str>>,
    probes: AtomicU32,
    tie_breaks: AtomicU32,
}

impl FakeProbe {
    fn live(mut self, port: u16, latest: Option<&'static str>) -> Self {
        self.live.insert(port, latest);
        self
    }
}

#[async_trait]
impl EndpointProbe for FakeProbe {
    async fn probe(&self, port: u16, credential: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !credential.is_empty() && self.live.contains_key(&port)
    }

    async fn latest_session(&self, handle: &ConnectionHandle) -> Option<String> {
        self.tie_breaks.fetch_add(1, Ordering::SeqCst);
        self.live
            .get(&handle.port)
            .copied()
            .flatten()
            .map(str::to_string)
    }
}

fn linux() -> UnixStrategy {
    UnixStrategy::new(SocketTool::Lsof, false)
}

fn engine(
    strategy: Box<dyn PlatformStrategy>,
    runner: Arc<ScriptedRunner>,
    probe: Arc<FakeProbe>,
) -> DiscoveryEngine {
    DiscoveryEngine::new(strategy, runner, probe, TARGET).with_retry_delay(Duration::ZERO)
}

fn ps_line(pid: u32, port: u16, token: &str) -> String {
    format!("{pid} /opt/bin/{TARGET} --extension_server_port {port} --csrf_token {token}")
}

fn lsof_line(pid: u32, port: u16) -> String {
    format!("language_ {pid} me 12u IPv4 0x1 0t0 TCP 127.0.0.1:{port} (LISTEN)")
}

// ============================================================================
// Selection Tests
// ============================================================================

#[tokio::test]
async fn test_latest_session_wins_between_two_backends() {
    let strategy = linux();
    // Q is enumerated first, P has the newer session.
    let ps = format!("{}\n{}\n", ps_line(200, 2000, "tok-q"), ps_line(100, 1000, "tok-p"));
    let runner = Arc::new(
        ScriptedRunner::default()
            .on(strategy.process_list_command(TARGET), &[&ps])
            .on(strategy.port_list_command(200), &[&lsof_line(200, 2000)])
            .on(strategy.port_list_command(100), &[&lsof_line(100, 1000)]),
    );
    let probe = Arc::new(
        FakeProbe::default()
            .live(1000, Some("2026-02-04T10:00:00Z"))
            .live(2000, Some("2026-02-03T09:00:00Z")),
    );

    let found = engine(Box::new(strategy), runner, probe.clone())
        .scan(3)
        .await
        .expect("a backend should be selected");

    assert_eq!(found, ConnectionHandle::new(1000, "tok-p"));
    assert_eq!(probe.tie_breaks.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_tie_keeps_enumeration_order() {
    let strategy = linux();
    let ps = format!("{}\n{}\n", ps_line(1, 1111, "a"), ps_line(2, 2222, "b"));
    let runner = Arc::new(
        ScriptedRunner::default()
            .on(strategy.process_list_command(TARGET), &[&ps])
            .on(strategy.port_list_command(1), &[&lsof_line(1, 1111)])
            .on(strategy.port_list_command(2), &[&lsof_line(2, 2222)]),
    );
    let probe = Arc::new(
        FakeProbe::default()
            .live(1111, Some("2026-02-04T10:00:00Z"))
            .live(2222, Some("2026-02-04T10:00:00Z")),
    );

    let found = engine(Box::new(strategy), runner, probe).scan(1).await.unwrap();
    assert_eq!(found.port, 1111);
}

#[tokio::test]
async fn test_single_backend_skips_tie_break() {
    let strategy = linux();
    let runner = Arc::new(
        ScriptedRunner::default()
            .on(strategy.process_list_command(TARGET), &[&ps_line(7, 4242, "tok")])
            .on(strategy.port_list_command(7), &[&lsof_line(7, 4242)]),
    );
    let probe = Arc::new(FakeProbe::default().live(4242, None));

    let found = engine(Box::new(strategy), runner, probe.clone()).scan(1).await;
    assert_eq!(found, Some(ConnectionHandle::new(4242, "tok")));
    assert_eq!(probe.tie_breaks.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Port Resolution Tests
// ============================================================================

#[tokio::test]
async fn test_falls_back_to_command_line_port() {
    let strategy = linux();
    let runner = Arc::new(
        ScriptedRunner::default()
            .on(strategy.process_list_command(TARGET), &[&ps_line(7, 4242, "tok")])
            .on(strategy.port_list_command(7), &[""]),
    );
    let probe = Arc::new(FakeProbe::default().live(4242, None));

    let found = engine(Box::new(strategy), runner, probe).scan(1).await;
    assert_eq!(found.map(|h| h.port), Some(4242));
}

#[tokio::test]
async fn test_first_listening_port_that_verifies_wins() {
    let strategy = linux();
    let lsof = format!("{}\n{}\n", lsof_line(7, 5000), lsof_line(7, 5001));
    let runner = Arc::new(
        ScriptedRunner::default()
            .on(strategy.process_list_command(TARGET), &[&ps_line(7, 4242, "tok")])
            .on(strategy.port_list_command(7), &[&lsof]),
    );
    // The command-line port is not the API port.
    let probe = Arc::new(FakeProbe::default().live(5001, None));

    let found = engine(Box::new(strategy), runner, probe).scan(1).await;
    assert_eq!(found.map(|h| h.port), Some(5001));
}

#[tokio::test]
async fn test_candidate_without_credential_is_skipped() {
    let strategy = linux();
    let ps = format!("7 /opt/bin/{TARGET} --extension_server_port 4242\n");
    let runner = Arc::new(
        ScriptedRunner::default()
            .on(strategy.process_list_command(TARGET), &[&ps])
            .on(strategy.port_list_command(7), &[&lsof_line(7, 4242)]),
    );
    let probe = Arc::new(FakeProbe::default().live(4242, None));

    let found = engine(Box::new(strategy), runner, probe.clone()).scan(1).await;
    assert!(found.is_none());
    assert_eq!(probe.probes.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Retry and Fallback Tests
// ============================================================================

#[tokio::test]
async fn test_retries_until_process_appears() {
    let strategy = linux();
    let list = strategy.process_list_command(TARGET);
    let runner = Arc::new(
        ScriptedRunner::default()
            .on(list.clone(), &["  PID ARGS\n", "  PID ARGS\n", &ps_line(7, 4242, "tok")])
            .on(strategy.port_list_command(7), &[&lsof_line(7, 4242)]),
    );
    let probe = Arc::new(FakeProbe::default().live(4242, None));

    let found = engine(Box::new(strategy), runner.clone(), probe).scan(3).await;
    assert!(found.is_some());
    assert_eq!(runner.runs_of(&list), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let strategy = linux();
    let list = strategy.process_list_command(TARGET);
    let runner = Arc::new(ScriptedRunner::default().on(list.clone(), &[""]));
    let probe = Arc::new(FakeProbe::default());

    let found = engine(Box::new(strategy), runner.clone(), probe).scan(2).await;
    assert!(found.is_none());
    assert_eq!(runner.runs_of(&list), 2);
}

#[tokio::test]
async fn test_failing_commands_report_not_found() {
    let runner = Arc::new(ScriptedRunner::default());
    let probe = Arc::new(FakeProbe::default().live(4242, None));

    let found = engine(Box::new(linux()), runner, probe).scan(2).await;
    assert!(found.is_none());
}

#[tokio::test]
async fn test_windows_keyword_fallback() {
    let strategy = WindowsStrategy;
    let by_name = strategy.process_list_command(TARGET);
    let by_keyword = strategy.keyword_list_command("language_server").unwrap();
    let keyword_json = r#"{"ProcessId":31,"CommandLine":"C:\\app\\ls.exe --extension_server_port 6100 --csrf_token kw"}"#;
    let runner = Arc::new(
        ScriptedRunner::default()
            .on(by_name.clone(), &[""])
            .on(by_keyword.clone(), &[keyword_json])
            .on(strategy.port_list_command(31), &[""]),
    );
    let probe = Arc::new(FakeProbe::default().live(6100, None));

    let found = engine(Box::new(strategy), runner.clone(), probe).scan(2).await;
    assert_eq!(found, Some(ConnectionHandle::new(6100, "kw")));
    assert_eq!(runner.runs_of(&by_name), 2);
    assert_eq!(runner.runs_of(&by_keyword), 1);
}

#[tokio::test]
async fn test_locator_uses_configured_attempts() {
    let strategy = linux();
    let list = strategy.process_list_command(TARGET);
    let runner = Arc::new(ScriptedRunner::default().on(list.clone(), &[""]));
    let probe = Arc::new(FakeProbe::default());

    let locator = engine(Box::new(strategy), runner.clone(), probe).with_max_attempts(4);
    assert!(locator.locate().await.is_none());
    assert_eq!(runner.runs_of(&list), 4);
}
