use std::io::ErrorKind;
use std::process::Command;
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout.lines().map(str::to_string).collect()
    }

    pub fn describe_status(&self) -> String {
        match self.status_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs a host command and captures its output. A non-zero exit is not an
/// error here; callers inspect `success()` when they care.
pub fn run_command_capture(cmd: &str, args: &[&str]) -> Result<CommandOutput> {
    debug!(target: "vdctl", "run_command_capture: executing {} {:?}", cmd, args);
    let start_time = Instant::now();

    let output = Command::new(cmd).args(args).output().map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            // A bare name was looked up on PATH; anything with a separator
            // was attempted as a literal path.
            let searched = if cmd.contains('/') {
                vec![cmd.to_string()]
            } else {
                vec!["PATH".to_string()]
            };
            Error::ToolNotFound {
                tool: cmd.to_string(),
                searched,
            }
        } else {
            Error::Io(err)
        }
    })?;

    let elapsed = start_time.elapsed();
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    debug!(target: "vdctl", "run_command_capture: {} {:?} completed in {:?} with status {}", cmd, args, elapsed, output.status);
    trace!(target: "vdctl", "run_command_capture: {} {:?} stdout: {}", cmd, args, stdout.trim());
    if !stderr.is_empty() {
        trace!(target: "vdctl", "run_command_capture: {} {:?} stderr: {}", cmd, args, stderr.trim());
    }

    Ok(CommandOutput {
        status_code: output.status.code(),
        stdout,
        stderr,
    })
}

/// Like `run_command_capture`, but a non-zero exit becomes an error.
pub fn run_command_checked(cmd: &str, args: &[&str]) -> Result<CommandOutput> {
    let output = run_command_capture(cmd, args)?;
    if !output.success() {
        error!(target: "vdctl", "run_command_checked: {} {:?} failed with {}", cmd, args, output.describe_status());
        return Err(Error::command_failed(
            format!("{} {}", cmd, args.join(" ")),
            output.describe_status(),
            output.stderr.trim(),
        ));
    }
    Ok(output)
}
