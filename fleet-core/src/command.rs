// Standard library
use std::ffi::OsStr;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

// External crates
use crate::error::{FleetError, Result};
use duct::{cmd, Expression};
use tracing::{debug, info};
use which::which;

/// How many trailing output lines to keep in a failure message.
const ERROR_CONTEXT_LINES: usize = 50;

fn render_command<A: AsRef<OsStr>>(command: &str, args: &[A]) -> String {
    let mut rendered = command.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.as_ref().to_string_lossy());
    }
    rendered
}

/// Run a command to completion and return its combined stdout/stderr.
///
/// A non-zero exit is an error carrying the tail of the output. With a
/// timeout the child is killed once it expires and `FleetError::Timeout`
/// is returned.
pub fn run_command<A: AsRef<OsStr>>(
    command: &str,
    args: &[A],
    timeout_secs: Option<u64>,
) -> Result<String> {
    let full_command = render_command(command, args);
    execute(cmd(command, args), full_command, timeout_secs)
}

/// Like [`run_command`], but the child's stdin is read from `stdin_path`.
pub fn run_command_with_stdin<A: AsRef<OsStr>>(
    command: &str,
    args: &[A],
    stdin_path: &Path,
    timeout_secs: Option<u64>,
) -> Result<String> {
    let full_command = format!(
        "{} < {}",
        render_command(command, args),
        stdin_path.display()
    );
    execute(
        cmd(command, args).stdin_path(stdin_path),
        full_command,
        timeout_secs,
    )
}

/// Run a command line through `sh -c`. Used for operator-supplied hook templates.
pub fn run_shell(command_line: &str, timeout_secs: Option<u64>) -> Result<String> {
    execute(
        cmd("sh", ["-c", command_line]),
        command_line.to_string(),
        timeout_secs,
    )
}

fn execute(expression: Expression, full_command: String, timeout_secs: Option<u64>) -> Result<String> {
    debug!(command = %full_command, "running external command");

    let handle = expression
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .start()
        .map_err(|e| FleetError::Command(format!("Failed to start '{}': {}", full_command, e)))?;

    let start = Instant::now();
    let output = loop {
        if let Some(secs) = timeout_secs {
            if start.elapsed() >= Duration::from_secs(secs) {
                let _ = handle.kill();
                return Err(FleetError::Timeout {
                    command: full_command,
                    secs,
                });
            }
        }

        match handle.try_wait() {
            Ok(Some(output)) => break output,
            Ok(None) => thread::sleep(Duration::from_millis(100)),
            Err(e) => {
                return Err(FleetError::Command(format!(
                    "Error waiting for '{}': {}",
                    full_command, e
                )));
            }
        }
    };

    let text = String::from_utf8_lossy(&output.stdout).into_owned();

    if !output.status.success() {
        let lines: Vec<&str> = text.lines().collect();
        let tail = &lines[lines.len().saturating_sub(ERROR_CONTEXT_LINES)..];
        return Err(FleetError::Command(format!(
            "exit code {:?}: {}\n\nOutput (last {} lines):\n{}",
            output.status.code(),
            full_command,
            ERROR_CONTEXT_LINES,
            tail.join("\n")
        )));
    }

    for line in text.lines() {
        info!("{}", line);
    }

    Ok(text)
}

/// Checks if a command-line tool is available in the system's PATH.
pub fn is_tool_installed(tool_name: &str) -> bool {
    which(tool_name).is_ok()
}

/// Fail early with a `Dependency` error when a required tool is missing.
pub fn require_tool(tool_name: &str) -> Result<()> {
    if is_tool_installed(tool_name) {
        Ok(())
    } else {
        Err(FleetError::Dependency(tool_name.to_string()))
    }
}
