//! Bounded execution of external tools (`docker`, `nvidia-smi`, `pg_isready`).

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::collector::CollectError;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// First line of stderr, for log and error messages.
    pub fn stderr_summary(&self) -> &str {
        self.stderr.lines().next().unwrap_or("").trim()
    }
}

/// Run `program` with `args`, killing it if it outlives `timeout`.
///
/// A missing binary or a spawn failure is reported as
/// [`CollectErrorKind::Unavailable`](crate::collector::CollectErrorKind::Unavailable),
/// an overrun as `Timeout`. A non-zero exit status is returned as output and
/// left for the caller to interpret.
pub(crate) async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, CollectError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => Err(CollectError::timeout(format!(
            "'{program}' did not finish within {}ms",
            timeout.as_millis()
        ))),
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
            Err(CollectError::unavailable(format!("'{program}' not found")))
        }
        Ok(Err(e)) => Err(CollectError::unavailable(format!(
            "failed to run '{program}': {e}"
        ))),
        Ok(Ok(output)) => Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        }),
    }
}
