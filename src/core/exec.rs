//! Capability-scoped subprocess execution with a hard timeout.
//!
//! Every call to the infrastructure tool or cloud CLI goes through
//! [`execute`]. Output is drained on background threads so a chatty child
//! cannot block on a full pipe while we poll for exit.

use crate::core::error::GateError;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Ceiling for short read-only queries (session lookups, state pulls, show).
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalCapability {
    SessionQuery,
    StateRead,
    PlanExec,
    PlanRender,
}

impl ExternalCapability {
    pub fn as_str(self) -> &'static str {
        match self {
            ExternalCapability::SessionQuery => "session_query",
            ExternalCapability::StateRead => "state_read",
            ExternalCapability::PlanExec => "plan_exec",
            ExternalCapability::PlanRender => "plan_render",
        }
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = source {
            let _ = r.read_to_end(&mut buf);
        }
        buf
    })
}

pub fn execute(
    capability: ExternalCapability,
    command: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<Output, GateError> {
    let rendered = format!("{} {}", command, args.join(" "));
    tracing::debug!(capability = capability.as_str(), command = %rendered, cwd = %cwd.display(), "spawning");

    let start = Instant::now();
    let mut child = Command::new(command)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GateError::ToolInvocation(format!("cannot start `{}`: {}", command, e)))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(command = %rendered, secs = timeout.as_secs(), "subprocess timed out");
            return Err(GateError::Timeout {
                command: rendered,
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(Duration::from_millis(100));
    };

    let output = Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    };
    tracing::debug!(
        capability = capability.as_str(),
        exit_code = ?output.status.code(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "subprocess finished"
    );
    Ok(output)
}

/// Run and require success, returning stdout exactly as produced.
pub fn execute_raw(
    capability: ExternalCapability,
    command: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<String, GateError> {
    let output = execute(capability, command, args, cwd, timeout)?;
    if !output.status.success() {
        return Err(GateError::ToolInvocation(format!(
            "`{} {}` exited with {}: {}",
            command,
            args.join(" "),
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run and require success, returning trimmed stdout.
pub fn execute_checked(
    capability: ExternalCapability,
    command: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<String, GateError> {
    execute_raw(capability, command, args, cwd, timeout).map(|out| out.trim().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_of_successful_command() {
        let out = execute_checked(
            ExternalCapability::SessionQuery,
            "sh",
            &["-c", "echo proj-a"],
            Path::new("."),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out, "proj-a");
    }

    #[test]
    fn raw_capture_keeps_surrounding_whitespace() {
        let out = execute_raw(
            ExternalCapability::StateRead,
            "sh",
            &["-c", "printf '  {\"version\": 4}\\n\\n'"],
            Path::new("."),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out, "  {\"version\": 4}\n\n");
    }

    #[test]
    fn non_zero_exit_is_tool_invocation_error() {
        let err = execute_checked(
            ExternalCapability::PlanExec,
            "sh",
            &["-c", "echo nope >&2; exit 4"],
            Path::new("."),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, GateError::ToolInvocation(ref m) if m.contains("nope")));
    }

    #[test]
    fn hanging_command_times_out() {
        let start = Instant::now();
        let err = execute(
            ExternalCapability::PlanExec,
            "sh",
            &["-c", "sleep 30"],
            Path::new("."),
            Duration::from_millis(300),
        )
        .unwrap_err();
        assert!(matches!(err, GateError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_binary_is_tool_invocation_error() {
        let err = execute(
            ExternalCapability::SessionQuery,
            "definitely-not-a-real-binary-xyz",
            &[],
            Path::new("."),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, GateError::ToolInvocation(_)));
    }
}
