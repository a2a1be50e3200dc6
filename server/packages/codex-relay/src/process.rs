use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::launch::LaunchSpec;

/// Characters of stderr forwarded to the client when the session ends.
pub const STDERR_TAIL_CHARS: usize = 2000;
const STDERR_TAIL_BYTES: usize = STDERR_TAIL_CHARS * 4;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn subprocess `{command}`: {error}")]
    Spawn {
        command: String,
        #[source]
        error: io::Error,
    },
    #[error("failed to capture subprocess stdin")]
    MissingStdin,
    #[error("failed to capture subprocess stdout")]
    MissingStdout,
    #[error("failed to capture subprocess stderr")]
    MissingStderr,
}

impl LaunchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { error, .. } if error.kind() == io::ErrorKind::NotFound)
    }
}

/// A running agent owned by exactly one request.
///
/// Stderr is collected in the background from spawn onwards so the child can
/// never stall on a full stderr pipe. Only the last [`STDERR_TAIL_CHARS`]
/// characters are kept.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    line_buf: Vec<u8>,
    stderr_tail: Arc<Mutex<Vec<u8>>>,
    stderr_task: JoinHandle<()>,
    spawned_at: Instant,
}

impl AgentProcess {
    pub fn spawn(launch: &LaunchSpec, working_dir: &Path) -> Result<Self, LaunchError> {
        let spawn_start = Instant::now();

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &launch.env {
            command.env(key, value);
        }

        tracing::info!(
            command = %launch.display(),
            cwd = %working_dir.display(),
            "spawning agent process"
        );

        let mut child = command.spawn().map_err(|err| {
            tracing::error!(
                program = ?launch.program,
                args = ?launch.args,
                error = %err,
                "failed to spawn agent process"
            );
            LaunchError::Spawn {
                command: launch.display(),
                error: err,
            }
        })?;

        let pid = child.id().unwrap_or(0);
        tracing::info!(
            pid = pid,
            elapsed_ms = spawn_start.elapsed().as_millis() as u64,
            "agent process spawned"
        );

        let stdin = child.stdin.take().ok_or(LaunchError::MissingStdin)?;
        let stdout = child.stdout.take().ok_or(LaunchError::MissingStdout)?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingStderr)?;

        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        let stderr_task = tokio::spawn(collect_stderr(stderr, stderr_tail.clone(), pid));

        Ok(Self {
            child,
            pid,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            line_buf: Vec::new(),
            stderr_tail,
            stderr_task,
            spawned_at: spawn_start,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Writes the prompt in one write and closes stdin. Runs in the background
    /// so a child that writes before reading cannot deadlock the session.
    /// Failures are logged and otherwise ignored.
    pub fn send_prompt(&mut self, prompt: String) {
        let Some(mut stdin) = self.stdin.take() else {
            return;
        };
        let pid = self.pid;

        tokio::spawn(async move {
            let bytes = prompt.into_bytes();
            if let Err(err) = stdin.write_all(&bytes).await {
                tracing::warn!(pid = pid, error = %err, "stdin: prompt write failed");
                return;
            }
            if let Err(err) = stdin.shutdown().await {
                tracing::warn!(pid = pid, error = %err, "stdin: close failed");
                return;
            }
            tracing::debug!(pid = pid, bytes = bytes.len(), "stdin: prompt written and closed");
        });
    }

    /// Reads the next stdout line, lossily decoded. Returns `None` at end of output.
    ///
    /// Cancel safe: a partially read line stays buffered for the next call.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.stdout.read_until(b'\n', &mut self.line_buf).await?;
        if read == 0 && self.line_buf.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.line_buf).into_owned();
        self.line_buf.clear();
        Ok(Some(line))
    }

    /// Stops the agent and returns its stderr tail.
    ///
    /// The child gets `grace` to exit on its own before it is killed. Pass
    /// `Duration::ZERO` to kill it at once.
    pub async fn shutdown(mut self, grace: Duration) -> String {
        drop(self.stdin.take());

        let waited = tokio::time::timeout(grace, self.child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                tracing::warn!(pid = self.pid, error = %err, "failed to wait for agent process");
                None
            }
            Err(_) => self.kill().await,
        };

        match status {
            Some(status) => tracing::info!(
                pid = self.pid,
                success = status.success(),
                code = status.code(),
                age_ms = self.spawned_at.elapsed().as_millis() as u64,
                "agent process exited"
            ),
            None => tracing::warn!(
                pid = self.pid,
                age_ms = self.spawned_at.elapsed().as_millis() as u64,
                "agent process exit status unavailable"
            ),
        }

        if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut self.stderr_task)
            .await
            .is_err()
        {
            // A grandchild can hold the pipe open after the agent is gone.
            self.stderr_task.abort();
        }

        let bytes = self.stderr_tail.lock().await.clone();
        let text = String::from_utf8_lossy(&bytes);
        last_chars(&text, STDERR_TAIL_CHARS).to_string()
    }

    async fn kill(&mut self) -> Option<ExitStatus> {
        tracing::info!(pid = self.pid, "terminating agent process");
        if let Err(err) = self.child.kill().await {
            tracing::warn!(pid = self.pid, error = %err, "failed to kill agent process");
        }
        self.child.try_wait().ok().flatten()
    }
}

async fn collect_stderr(mut stderr: ChildStderr, tail: Arc<Mutex<Vec<u8>>>, pid: u32) {
    let mut chunk = [0u8; 4096];
    let mut total: u64 = 0;
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => {
                total += read as u64;
                let mut guard = tail.lock().await;
                guard.extend_from_slice(&chunk[..read]);
                if guard.len() > STDERR_TAIL_BYTES {
                    let excess = guard.len() - STDERR_TAIL_BYTES;
                    guard.drain(..excess);
                }
            }
            Err(err) => {
                tracing::debug!(pid = pid, error = %err, "agent stderr: read failed");
                break;
            }
        }
    }
    tracing::debug!(pid = pid, total_bytes = total, "agent stderr: stream ended");
}

fn last_chars(text: &str, max: usize) -> &str {
    if max == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
