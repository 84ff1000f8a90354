//! Live process handles
//!
//! A spawned process is watched by a background task that captures its output
//! and emits exactly one terminal event: `Exited` or `Errored`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::debug;

use crate::error::OrchestratorError;

/// How long output readers may linger after the process is gone
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Terminal notification of a live process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    Errored {
        error: OrchestratorError,
        stdout: String,
        stderr: String,
    },
}

/// Control side of a live process
///
/// Dropping every clone of the handle kills the process.
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    kill_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
}

impl ProcessHandle {
    /// Whether the process has terminated
    #[cfg(test)]
    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Request termination without waiting for it
    pub fn signal_kill(&self) {
        // No receiver left means the watcher already finished
        let _ = self.kill_tx.send(true);
    }

    /// Terminate the process and wait until it is gone.
    ///
    /// Killing an already dead process succeeds immediately.
    pub async fn kill(&self) {
        self.signal_kill();
        let mut done_rx = self.done_rx.clone();
        let _ = done_rx.wait_for(|done| *done).await;
    }
}

/// A freshly started process: its handle and its terminal event stream
#[derive(Debug)]
pub struct LaunchedProcess {
    pub handle: ProcessHandle,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// Build a command that runs `line` through the platform shell
pub fn shell_command(line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(line);
        command
    }
    #[cfg(not(windows))]
    {
        let mut command = Command::new("sh");
        command.arg("-c").arg(line);
        command
    }
}

/// Spawn `command` and start watching it.
///
/// `scratch_dir` is removed once the process has exited.
pub fn spawn(
    mut command: Command,
    launcher: &str,
    scratch_dir: Option<TempDir>,
) -> Result<LaunchedProcess, OrchestratorError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| OrchestratorError::launch(launcher, e))?;
    let pid = child.id();
    debug!(launcher, ?pid, "process spawned");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (kill_tx, mut kill_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);
    let label = launcher.to_string();

    tokio::spawn(async move {
        let stdout_task = tokio::spawn(read_output(stdout));
        let stderr_task = tokio::spawn(read_output(stderr));

        let status = tokio::select! {
            status = child.wait() => status,
            // Resolves on an explicit kill or when every handle is dropped
            _ = async { let _ = kill_rx.wait_for(|kill| *kill).await; } => {
                debug!(launcher = %label, ?pid, "killing process");
                let _ = child.start_kill();
                child.wait().await
            }
        };

        let stdout = collect_output(stdout_task).await;
        let stderr = collect_output(stderr_task).await;
        if let Some(dir) = scratch_dir {
            if let Err(e) = dir.close() {
                debug!(launcher = %label, error = %e, "could not remove scratch directory");
            }
        }

        let event = match status {
            Ok(status) => ProcessEvent::Exited {
                code: status.code(),
                stdout,
                stderr,
            },
            Err(e) => ProcessEvent::Errored {
                error: OrchestratorError::process(format!("{label}: {e}")),
                stdout,
                stderr,
            },
        };

        let _ = events_tx.send(event);
        let _ = done_tx.send(true);
    });

    Ok(LaunchedProcess {
        handle: ProcessHandle {
            kill_tx: Arc::new(kill_tx),
            done_rx,
        },
        events: events_rx,
    })
}

async fn read_output<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect_output(mut task: tokio::task::JoinHandle<String>) -> String {
    match timeout(OUTPUT_GRACE, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            // A grandchild still holds the pipe
            task.abort();
            String::new()
        }
    }
}

/// Test double whose terminal events are sent by hand
#[cfg(test)]
pub struct ManualProcess {
    pub events: mpsc::UnboundedSender<ProcessEvent>,
    pub kill_rx: watch::Receiver<bool>,
    pub done_tx: watch::Sender<bool>,
}

#[cfg(test)]
impl ManualProcess {
    pub fn launch() -> (LaunchedProcess, ManualProcess) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let launched = LaunchedProcess {
            handle: ProcessHandle {
                kill_tx: Arc::new(kill_tx),
                done_rx,
            },
            events: events_rx,
        };
        (
            launched,
            ManualProcess {
                events: events_tx,
                kill_rx,
                done_tx,
            },
        )
    }

    pub fn kill_requested(&self) -> bool {
        *self.kill_rx.borrow()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_exit_event_carries_code_and_output() {
        let command = shell_command("echo out; echo err >&2; exit 3");
        let mut launched = spawn(command, "sh", None).unwrap();

        let event = launched.events.recv().await.unwrap();
        assert_eq!(
            event,
            ProcessEvent::Exited {
                code: Some(3),
                stdout: "out\n".to_string(),
                stderr: "err\n".to_string(),
            }
        );
        assert!(launched.events.recv().await.is_none());
        assert!(launched.handle.is_done());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let command = Command::new("/nonexistent/testfleet-binary");
        let err = spawn(command, "Ghost", None).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Launch { ref launcher, .. } if launcher == "Ghost"
        ));
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let mut launched = spawn(shell_command("sleep 30"), "sleeper", None).unwrap();
        let start = Instant::now();

        launched.handle.kill().await;
        launched.handle.kill().await;
        assert!(start.elapsed() < Duration::from_secs(10));

        match launched.events.recv().await.unwrap() {
            ProcessEvent::Exited { code, .. } => assert_eq!(code, None),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scratch_dir_removed_after_exit() {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().to_path_buf();
        let command = shell_command(&format!("test -d '{}'", path.display()));

        let mut launched = spawn(command, "sh", Some(scratch)).unwrap();
        match launched.events.recv().await.unwrap() {
            ProcessEvent::Exited { code, .. } => assert_eq!(code, Some(0)),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_dropping_handle_kills_process() {
        let launched = spawn(shell_command("sleep 30"), "sleeper", None).unwrap();
        let LaunchedProcess { handle, mut events } = launched;
        drop(handle);

        let event = timeout(Duration::from_secs(10), events.recv()).await.unwrap();
        assert!(matches!(event, Some(ProcessEvent::Exited { code: None, .. })));
    }
}
