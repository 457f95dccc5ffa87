//! Per-OS process and port enumeration.
//!
//! A [`PlatformStrategy`] only builds command lines and parses their text
//! output; running the commands is the job of a [`CommandRunner`]. Parsers
//! never fail: empty or garbled output yields an empty result.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Token access goes through iterators and `get()`, never `[i]`

use std::collections::BTreeSet;

use ltm_protocol::{CREDENTIAL_FLAG, PORT_FLAG};

use crate::command::{CommandRunner, ShellCommand};

mod unix;
mod windows;

pub use unix::{SocketTool, UnixStrategy};
pub use windows::WindowsStrategy;

/// A backend process found in a process listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCandidate {
    pub pid: u32,
    /// Port named on the command line, if any.
    pub port: Option<u16>,
    /// Credential named on the command line, if any.
    pub credential: Option<String>,
}

impl ProcessCandidate {
    /// Builds a candidate from a raw argument string.
    pub fn from_args(pid: u32, args: &str) -> Self {
        Self {
            pid,
            port: extract_flag(args, PORT_FLAG).and_then(|p| p.parse().ok()),
            credential: extract_flag(args, CREDENTIAL_FLAG),
        }
    }
}

/// Command generation and output parsing for one OS family.
pub trait PlatformStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Command listing processes whose name matches `target`.
    fn process_list_command(&self, target: &str) -> ShellCommand;

    fn parse_process_list(&self, output: &str, target: &str) -> Vec<ProcessCandidate>;

    /// Command listing the TCP ports `pid` is listening on.
    fn port_list_command(&self, pid: u32) -> ShellCommand;

    /// Listening ports owned by `pid`, ascending and deduplicated.
    fn parse_port_list(&self, output: &str, pid: u32) -> Vec<u16>;

    /// Secondary enumeration by command-line keyword, where supported.
    fn keyword_list_command(&self, _keyword: &str) -> Option<ShellCommand> {
        None
    }

    fn parse_keyword_list(&self, output: &str, keyword: &str) -> Vec<ProcessCandidate> {
        self.parse_process_list(output, keyword)
    }
}

/// Returns the backend executable name for an OS/architecture pair.
///
/// `os` and `arch` use the values of `std::env::consts`.
pub fn target_process_name(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("windows", _) => Some("language_server_windows_x64.exe"),
        ("macos", "aarch64") => Some("language_server_macos_arm"),
        ("macos", _) => Some("language_server_macos"),
        ("linux", "aarch64") => Some("language_server_linux_arm"),
        ("linux", _) => Some("language_server_linux_x64"),
        _ => None,
    }
}

/// Backend executable name for the running host.
pub fn current_target_name() -> Option<&'static str> {
    target_process_name(std::env::consts::OS, std::env::consts::ARCH)
}

/// Selects the strategy for the running host.
///
/// On Unix this probes for the available socket utility.
pub async fn for_current_os(runner: &dyn CommandRunner) -> Box<dyn PlatformStrategy> {
    if cfg!(windows) {
        Box::new(WindowsStrategy)
    } else {
        Box::new(UnixStrategy::detect(runner, cfg!(target_os = "macos")).await)
    }
}

/// Extracts the value of `flag` from an argument string.
///
/// Accepts both `--flag value` and `--flag=value`. Surrounding quotes on
/// the value are stripped.
pub fn extract_flag(args: &str, flag: &str) -> Option<String> {
    let mut tokens = args.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == flag {
            return tokens.next().and_then(clean_value);
        }
        if let Some(value) = token
            .strip_prefix(flag)
            .and_then(|rest| rest.strip_prefix('='))
        {
            return clean_value(value);
        }
    }
    None
}

fn clean_value(value: &str) -> Option<String> {
    let value = value.trim_matches(|c| c == '"' || c == '\'');
    if value.is_empty() || value.starts_with("--") {
        None
    } else {
        Some(value.to_string())
    }
}

/// Splits `host:port`, `[v6]:port` or BSD-style `host.port` addresses.
pub(crate) fn split_address(address: &str) -> Option<(&str, u16)> {
    let by_colon = address
        .rsplit_once(':')
        .and_then(|(host, port)| port.parse().ok().map(|p| (host, p)));
    by_colon.or_else(|| {
        address
            .rsplit_once('.')
            .and_then(|(host, port)| port.parse().ok().map(|p| (host, p)))
    })
}

/// True for loopback and wildcard bind addresses.
pub(crate) fn is_local_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    matches!(
        host,
        "127.0.0.1" | "localhost" | "::1" | "*" | "0.0.0.0" | "::" | "" | "::ffff:127.0.0.1"
    ) || host.starts_with("127.")
}

/// Collects local ports from address strings, sorted and deduplicated.
pub(crate) fn local_ports<'a>(addresses: impl IntoIterator<Item = &'a str>) -> Vec<u16> {
    addresses
        .into_iter()
        .filter_map(split_address)
        .filter(|(host, port)| *port != 0 && is_local_host(host))
        .map(|(_, port)| port)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
