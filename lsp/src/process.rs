//! Process supervisor: spawns the language server and reaps it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::error::LaunchError;

/// A freshly spawned server with its pipes split off.
pub struct Spawned {
    pub process: ServerProcess,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Spawn `command args...` with piped stdio.
///
/// The executable is resolved through `PATH` first so a missing server is
/// reported as [`LaunchError::NotFound`] rather than a generic spawn error.
/// Stderr is drained to the log at debug level.
pub fn spawn(command: &str, args: &[String], cwd: Option<&Path>) -> Result<Spawned, LaunchError> {
    let resolved = which::which(command).map_err(|source| LaunchError::NotFound {
        command: command.to_string(),
        source,
    })?;

    let mut cmd = Command::new(&resolved);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        path: resolved.clone(),
        source,
    })?;

    let stdin = child.stdin.take().ok_or(LaunchError::MissingPipe("stdin"))?;
    let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(stderr, command.to_string()));
    }

    tracing::info!(server = %resolved.display(), pid = child.id(), "LSP server started");
    Ok(Spawned {
        process: ServerProcess {
            name: command.to_string(),
            child,
        },
        stdin,
        stdout,
    })
}

async fn drain_stderr(stderr: ChildStderr, server: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(server = %server, "stderr: {line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %server, "stderr read failed: {e}");
                break;
            }
        }
    }
}

/// Handle to the running child.
pub struct ServerProcess {
    name: String,
    child: Child,
}

impl ServerProcess {
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the child has not exited yet.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait up to `grace` for the child to exit on its own, then kill it.
    /// The child is always reaped before this returns.
    ///
    /// Expects stdin to be closed already, so a well-behaved server sees EOF.
    pub async fn stop(mut self, grace: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!(server = %self.name, %status, "LSP server already exited");
            return;
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.name, %status, "LSP server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.name, "waiting for LSP server failed: {e}");
            }
            Err(_) => {
                tracing::warn!(server = %self.name, "LSP server did not exit in {grace:?}, killing");
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(server = %self.name, "failed to kill LSP server: {e}");
                }
            }
        }
    }
}
