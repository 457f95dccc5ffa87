//! Windows enumeration via PowerShell CIM queries and `netstat -ano`.

use serde_json::Value;

use ltm_protocol::coerce_u64;

use crate::command::ShellCommand;

use super::{local_ports, PlatformStrategy, ProcessCandidate};

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsStrategy;

fn powershell(script: String) -> ShellCommand {
    ShellCommand::new(
        "powershell",
        ["-NoProfile".to_string(), "-NonInteractive".to_string(), "-Command".to_string(), script],
    )
}

/// Strips characters that would break out of a single-quoted literal.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect()
}

/// Parses `ConvertTo-Json` output: one object, or an array of them.
fn parse_cim_json(output: &str) -> Vec<ProcessCandidate> {
    let value: Value = match serde_json::from_str(output.trim()) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => vec![Value::Object(map)],
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| {
            let pid = u32::try_from(coerce_u64(item.get("ProcessId")?)).ok()?;
            if pid == 0 {
                return None;
            }
            let args = item.get("CommandLine").and_then(Value::as_str).unwrap_or("");
            Some(ProcessCandidate::from_args(pid, args))
        })
        .collect()
}

impl PlatformStrategy for WindowsStrategy {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn process_list_command(&self, target: &str) -> ShellCommand {
        powershell(format!(
            "Get-CimInstance Win32_Process -Filter \"name='{}'\" | \
             Select-Object ProcessId,CommandLine | ConvertTo-Json -Compress",
            sanitize(target)
        ))
    }

    fn parse_process_list(&self, output: &str, _target: &str) -> Vec<ProcessCandidate> {
        parse_cim_json(output)
    }

    fn port_list_command(&self, _pid: u32) -> ShellCommand {
        ShellCommand::new("netstat", ["-ano", "-p", "TCP"])
    }

    /// ```text
    ///   Proto  Local Address          Foreign Address        State           PID
    ///   TCP    127.0.0.1:42100        0.0.0.0:0              LISTENING       4242
    /// ```
    fn parse_port_list(&self, output: &str, pid: u32) -> Vec<u16> {
        let pid = pid.to_string();
        local_ports(output.lines().filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let listening = tokens.get(3).is_some_and(|s| *s == "LISTENING");
            let owned = tokens.last().is_some_and(|last| *last == pid);
            if listening && owned {
                tokens.get(1).copied()
            } else {
                None
            }
        }))
    }

    fn keyword_list_command(&self, keyword: &str) -> Option<ShellCommand> {
        Some(powershell(format!(
            "Get-CimInstance Win32_Process | \
             Where-Object {{ $_.CommandLine -like '*{}*' }} | \
             Select-Object ProcessId,CommandLine | ConvertTo-Json -Compress",
            sanitize(keyword)
        )))
    }

    fn parse_keyword_list(&self, output: &str, _keyword: &str) -> Vec<ProcessCandidate> {
        parse_cim_json(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_object() {
        let output = r#"{"ProcessId":4242,"CommandLine":"C:\\ls.exe --extension_server_port 42100 --csrf_token tok"}"#;
        let candidates = WindowsStrategy.parse_process_list(output, "x");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pid, 4242);
        assert_eq!(candidates[0].port, Some(42100));
        assert_eq!(candidates[0].credential.as_deref(), Some("tok"));
    }

    #[test]
    fn test_parse_array_and_null_command_line() {
        let output = r#"[{"ProcessId":1,"CommandLine":null},{"ProcessId":"2","CommandLine":"--csrf_token=a"}]"#;
        let candidates = WindowsStrategy.parse_process_list(output, "x");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].credential, None);
        assert_eq!(candidates[1].pid, 2);
        assert_eq!(candidates[1].credential.as_deref(), Some("a"));
    }

    #[test]
    fn test_parse_empty_or_garbage() {
        assert!(WindowsStrategy.parse_process_list("", "x").is_empty());
        assert!(WindowsStrategy.parse_process_list("Access denied", "x").is_empty());
        assert!(WindowsStrategy.parse_process_list("42", "x").is_empty());
    }

    #[test]
    fn test_parse_netstat() {
        let output = "
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    127.0.0.1:42101        0.0.0.0:0              LISTENING       4242
  TCP    0.0.0.0:42100          0.0.0.0:0              LISTENING       4242
  TCP    127.0.0.1:42101        127.0.0.1:50000        ESTABLISHED     4242
  TCP    127.0.0.1:9000         0.0.0.0:0              LISTENING       14242
";
        assert_eq!(WindowsStrategy.parse_port_list(output, 4242), vec![42100, 42101]);
    }

    #[test]
    fn test_keyword_command_is_sanitized() {
        let cmd = WindowsStrategy.keyword_list_command("lang'; rm").unwrap();
        let script = cmd.args.last().unwrap();
        assert!(script.contains("*langrm*"));
    }
}
