use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SandboxConfig;
use crate::function::RuntimeFamily;
use crate::messages::WorkerStatus;
use crate::worker::harness;

/// What a sandbox run produced. Never an error: spawn failures, crashes and
/// timeouts are all outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutcome {
    pub status: WorkerStatus,
    /// Trimmed stdout on success, otherwise the error text
    pub output: String,
    /// Captured stderr
    pub logs: String,
}

impl SandboxOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: WorkerStatus::Error,
            output: message.into(),
            logs: String::new(),
        }
    }
}

/// Runs user code against one input event.
///
/// Implementations decide the isolation strategy; callers only see the
/// outcome.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, code: &str, input: &Value) -> SandboxOutcome;
}

/// Runs the harness as a child interpreter in a throwaway directory,
/// killed when the wall-clock bound is exceeded.
///
/// This is a process isolation boundary, not a security boundary: the child
/// shares the host's network, filesystem and user.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    family: RuntimeFamily,
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(family: RuntimeFamily, config: SandboxConfig) -> Self {
        Self { family, config }
    }

    fn workspace(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("faas-run-");
        match &self.config.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

fn collect<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                tracing::debug!(error = %e, "Pipe read ended early");
            }
        }
        buf
    })
}

async fn drain(handle: &mut JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.await.unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// SIGKILL every process left in the run's process group. Background
/// processes started by user code inherit the group and the output pipes.
#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else { return };
    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid, error = %e, "Failed to kill sandbox process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(&self, code: &str, input: &Value) -> SandboxOutcome {
        // Removed on drop, whichever way this function returns
        let workspace = match self.workspace() {
            Ok(dir) => dir,
            Err(e) => return SandboxOutcome::error(format!("failed to create workspace: {}", e)),
        };

        let entry = workspace.path().join(harness::entry_file(self.family));
        if let Err(e) = tokio::fs::write(&entry, harness::render(self.family, code)).await {
            return SandboxOutcome::error(format!("failed to write harness: {}", e));
        }

        let payload = match serde_json::to_vec(input) {
            Ok(p) => p,
            Err(e) => return SandboxOutcome::error(format!("failed to encode input: {}", e)),
        };

        let interpreter = self.config.interpreter(self.family);
        let mut command = Command::new(interpreter);
        command
            .arg(&entry)
            .current_dir(workspace.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(interpreter, error = %e, "Failed to spawn sandbox process");
                return SandboxOutcome::error(format!("failed to start {}: {}", interpreter, e));
            }
        };
        // Group id equals the leader's pid; read it before wait() reaps the child
        let pgid = child.id();
        let deadline = Instant::now() + self.config.timeout;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // The child may exit without reading its input
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            });
        }
        let mut stdout = collect(child.stdout.take());
        let mut stderr = collect(child.stderr.take());

        let outcome = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => {
                kill_group(pgid);
                // Pipes held by an escaped descendant still count against the deadline
                let drained = tokio::time::timeout_at(deadline, async {
                    (drain(&mut stdout).await, drain(&mut stderr).await)
                })
                .await;
                match drained {
                    Ok((out, logs)) => exited(status, out, logs),
                    Err(_) => self.timed_out(),
                }
            }
            Ok(Err(e)) => {
                kill_group(pgid);
                SandboxOutcome::error(format!("failed to wait for process: {}", e))
            }
            Err(_) => {
                kill_group(pgid);
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed out process");
                }
                self.timed_out()
            }
        };
        stdout.abort();
        stderr.abort();
        outcome
    }
}

impl ProcessSandbox {
    fn timed_out(&self) -> SandboxOutcome {
        SandboxOutcome {
            status: WorkerStatus::Timeout,
            output: format!("execution timed out after {:?}", self.config.timeout),
            logs: String::new(),
        }
    }
}

fn exited(status: ExitStatus, out: String, logs: String) -> SandboxOutcome {
    if status.success() {
        return SandboxOutcome {
            status: WorkerStatus::Success,
            output: out.trim().to_string(),
            logs,
        };
    }
    let message = if logs.trim().is_empty() {
        format!("process exited with {}", status)
    } else {
        logs.trim().to_string()
    };
    SandboxOutcome {
        status: WorkerStatus::Error,
        output: message,
        logs,
    }
}
