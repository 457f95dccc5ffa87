//! Linux and macOS enumeration via `ps` plus a socket utility.

use tracing::debug;

use crate::command::{CommandRunner, ShellCommand};

use super::{local_ports, PlatformStrategy, ProcessCandidate};

/// Socket listing utility used to resolve ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketTool {
    Lsof,
    Ss,
    Netstat,
}

impl SocketTool {
    pub fn program(&self) -> &'static str {
        match self {
            Self::Lsof => "lsof",
            Self::Ss => "ss",
            Self::Netstat => "netstat",
        }
    }

    /// Probe order for the host family.
    pub fn probe_order(is_macos: bool) -> &'static [SocketTool] {
        if is_macos {
            &[Self::Lsof, Self::Netstat]
        } else {
            &[Self::Lsof, Self::Ss, Self::Netstat]
        }
    }
}

/// Strategy shared by Linux and macOS.
#[derive(Debug, Clone)]
pub struct UnixStrategy {
    socket_tool: SocketTool,
    is_macos: bool,
}

impl UnixStrategy {
    pub fn new(socket_tool: SocketTool, is_macos: bool) -> Self {
        Self {
            socket_tool,
            is_macos,
        }
    }

    /// Picks the first socket utility present on the host.
    ///
    /// Falls back to `lsof` when none is found; port lookups then come back
    /// empty and discovery uses the command-line port.
    pub async fn detect(runner: &dyn CommandRunner, is_macos: bool) -> Self {
        for tool in SocketTool::probe_order(is_macos) {
            if runner.is_available(tool.program()).await {
                debug!(tool = tool.program(), "Selected socket utility");
                return Self::new(*tool, is_macos);
            }
        }
        debug!("No socket utility found, defaulting to lsof");
        Self::new(SocketTool::Lsof, is_macos)
    }
}

impl PlatformStrategy for UnixStrategy {
    fn name(&self) -> &'static str {
        if self.is_macos {
            "macos"
        } else {
            "linux"
        }
    }

    fn process_list_command(&self, _target: &str) -> ShellCommand {
        ShellCommand::new("ps", ["-ww", "-eo", "pid,args"])
    }

    fn parse_process_list(&self, output: &str, target: &str) -> Vec<ProcessCandidate> {
        output
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                let (pid, args) = line.split_once(char::is_whitespace)?;
                let pid: u32 = pid.parse().ok()?;
                if !executable_matches(args, target) {
                    return None;
                }
                Some(ProcessCandidate::from_args(pid, args))
            })
            .collect()
    }

    fn port_list_command(&self, pid: u32) -> ShellCommand {
        match self.socket_tool {
            SocketTool::Lsof => ShellCommand::new(
                "lsof",
                [
                    "-nP".to_string(),
                    "-a".to_string(),
                    "-iTCP".to_string(),
                    "-sTCP:LISTEN".to_string(),
                    "-p".to_string(),
                    pid.to_string(),
                ],
            ),
            SocketTool::Ss => ShellCommand::new("ss", ["-tlnp"]),
            SocketTool::Netstat if self.is_macos => {
                ShellCommand::new("netstat", ["-anv", "-p", "tcp"])
            }
            SocketTool::Netstat => ShellCommand::new("netstat", ["-tlnp"]),
        }
    }

    fn parse_port_list(&self, output: &str, pid: u32) -> Vec<u16> {
        match self.socket_tool {
            SocketTool::Lsof => parse_lsof(output, pid),
            SocketTool::Ss => parse_ss(output, pid),
            SocketTool::Netstat => parse_netstat(output, pid),
        }
    }
}

/// True when the first argument (the executable) ends with `target`.
///
/// Matching on the executable keeps `grep language_server` style lines out.
fn executable_matches(args: &str, target: &str) -> bool {
    args.split_whitespace()
        .next()
        .map(|exe| exe.rsplit('/').next().unwrap_or(exe))
        .is_some_and(|exe| exe.contains(target))
}

/// `lsof -nP -a -iTCP -sTCP:LISTEN -p <pid>`
///
/// ```text
/// COMMAND     PID USER   FD   TYPE DEVICE SIZE/OFF NODE NAME
/// language_ 4242 me    12u  IPv4 0x1234      0t0  TCP 127.0.0.1:42100 (LISTEN)
/// ```
pub fn parse_lsof(output: &str, pid: u32) -> Vec<u16> {
    let pid = pid.to_string();
    local_ports(output.lines().filter_map(|line| {
        let mut tokens = line.split_whitespace();
        let _command = tokens.next()?;
        if tokens.next()? != pid {
            return None;
        }
        let rest: Vec<&str> = tokens.collect();
        let listen_at = rest.iter().position(|t| *t == "(LISTEN)")?;
        rest.get(listen_at.checked_sub(1)?).copied()
    }))
}

/// `ss -tlnp`
///
/// ```text
/// State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process
/// LISTEN 0      4096       127.0.0.1:42100      0.0.0.0:*    users:(("language_server",pid=4242,fd=12))
/// ```
pub fn parse_ss(output: &str, pid: u32) -> Vec<u16> {
    let marker = format!("pid={pid},");
    local_ports(
        output
            .lines()
            .filter(|line| line.contains(&marker))
            .filter_map(|line| {
                let mut tokens = line.split_whitespace();
                if tokens.next()? != "LISTEN" {
                    return None;
                }
                tokens.nth(2)
            }),
    )
}

/// `netstat -tlnp` (Linux) or `netstat -anv -p tcp` (macOS).
///
/// ```text
/// tcp   0  0 127.0.0.1:42100  0.0.0.0:*  LISTEN  4242/language_serv
/// tcp4  0  0 127.0.0.1.42100  *.*        LISTEN  131072 131072  4242  0
/// ```
pub fn parse_netstat(output: &str, pid: u32) -> Vec<u16> {
    let pid_str = pid.to_string();
    let pid_prefix = format!("{pid}/");
    local_ports(output.lines().filter_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let listen_at = tokens.iter().position(|t| *t == "LISTEN")?;
        let owned = tokens
            .iter()
            .skip(listen_at + 1)
            .any(|t| *t == pid_str || t.starts_with(&pid_prefix));
        if !owned {
            return None;
        }
        tokens.get(3).copied()
    }))
}
