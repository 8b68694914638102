use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

pub type RunnerHandle = Arc<dyn CommandRunner + Send + Sync>;

/// Captured result of an external program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}
impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code for reporting, with `-1` standing in for "killed by signal".
    pub fn code_or_signal(&self) -> i32 {
        self.code.unwrap_or(-1)
    }
}

/// Runs external programs.
///
/// A non-zero exit status is *not* an error at this level: callers decide
/// what the status means. Only failing to start the program is.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs programs as child processes of this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let path = which::which(program).or_raise(|| ErrorKind::CommandNotFound(program.to_string()))?;
        tracing::trace!(program = %path.display(), ?args, "running external command");
        let output = Command::new(&path)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .or_raise(|| ErrorKind::Spawn(program.to_string()))?;
        let output = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !output.success() {
            tracing::debug!(program, code = output.code_or_signal(), stderr = %output.stderr.trim(), "external command failed");
        }
        Ok(output)
    }
}
