//! Subprocess runner with stdin, timeout and cancellation.
//!
//! Every external tool the pipeline calls (ffmpeg, ffprobe, yt-dlp and the AI
//! CLIs) goes through [`ProcessSpec::run`]. The child is killed when the
//! timeout elapses or the cancellation signal fires.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Description of one external process invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout as UTF-8, `None` if it is not valid UTF-8.
    pub fn stdout_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.stdout).ok()
    }
}

enum Outcome {
    Exited(std::process::ExitStatus),
    TimedOut(Duration),
    Cancelled,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Bytes written to the child's stdin, which is then closed.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn get_stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run the process to completion.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`ProcessOutput::exit_code`]. Timeout and cancellation kill the child
    /// and return [`MediaError::Timeout`] / [`MediaError::Cancelled`].
    pub async fn run(&self, mut cancel: Option<watch::Receiver<bool>>) -> MediaResult<ProcessOutput> {
        if let Some(rx) = cancel.as_ref() {
            if *rx.borrow() {
                return Err(MediaError::Cancelled);
            }
        }

        let started = Instant::now();
        debug!(program = %self.program, args = ?self.args, "Spawning process");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::tool_not_found(&self.program)
            } else {
                MediaError::Io(e)
            }
        })?;

        if let (Some(input), Some(mut pipe)) = (self.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    debug!(error = %e, "Child closed stdin early");
                }
            });
        }

        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status?),
            _ = sleep_or_pending(self.timeout) => Outcome::TimedOut(self.timeout.unwrap_or_default()),
            _ = wait_for_cancel(cancel.as_mut()) => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Exited(status) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                let output = ProcessOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    elapsed: started.elapsed(),
                };
                debug!(
                    program = %self.program,
                    exit_code = ?output.exit_code,
                    elapsed_ms = output.elapsed.as_millis() as u64,
                    "Process exited"
                );
                Ok(output)
            }
            Outcome::TimedOut(limit) => {
                warn!(program = %self.program, timeout_secs = limit.as_secs(), "Process timed out, killing");
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Err(MediaError::Timeout(limit.as_secs()))
            }
            Outcome::Cancelled => {
                info!(program = %self.program, "Process cancelled, killing");
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Err(MediaError::Cancelled)
            }
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "Failed to read child output");
        }
    }
    buf
}

async fn sleep_or_pending(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

/// Resolve once the cancellation signal is raised.
///
/// Never resolves when there is no receiver or the sender was dropped
/// without cancelling.
pub async fn wait_for_cancel(rx: Option<&mut watch::Receiver<bool>>) {
    let Some(rx) = rx else {
        return std::future::pending::<()>().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending::<()>().await;
        }
    }
}
