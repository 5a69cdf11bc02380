//! External tool invocation
//!
//! `ssh`, `scp`, `mender-artifact` and the service CLIs are all driven as
//! child processes. Output is captured in full; whether a non-zero exit is an
//! error is left to the caller.

use std::ffi::OsStr;
use std::process::ExitStatus;

use tokio::process::Command;
use tracing::debug;

use crate::errors::{Error, Result};

/// Captured result of one child process
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Command line as run, for diagnostics
    pub command: String,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Turn a non-zero exit into [`Error::Command`]
    pub fn check(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::Command {
                command: self.command,
                status: self.status.to_string(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Run `program` with `args` to completion, capturing stdout and stderr.
///
/// Failing to spawn (e.g. the tool is not installed) is an error; a non-zero
/// exit is not.
pub async fn run_command<I, S>(program: &str, args: I) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    let command = std::iter::once(program.to_string())
        .chain(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ");

    debug!(%command, "running command");
    let output = Command::new(program).args(&args).kill_on_drop(true).output().await?;

    let result = CommandOutput {
        command,
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(command = %result.command, status = %result.status, "command finished");
    Ok(result)
}
