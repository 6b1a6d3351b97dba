//! External program execution behind an injectable runner.
//!
//! Every program the agent drives (`ssh`, `rsync`, `tar`, `zip`, `aws`, the
//! configured shell) goes through [`CommandRunner`]. Production code uses
//! [`ProcessCommandRunner`]; tests substitute the scripted runner from
//! [`crate::test_support`].

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// A single program invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandRequest {
    /// Program name or path.
    pub program: String,
    /// Arguments passed verbatim to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables layered over the agent's own environment.
    pub env: Vec<(String, String)>,
    /// Working directory for the child process.
    pub cwd: Option<Utf8PathBuf>,
    /// Upper bound on the child's run time. The child is killed when exceeded.
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    /// Starts a request for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, A>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds several environment variables for the child.
    #[must_use]
    pub fn envs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(pairs.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    /// Bounds the run time of the child.
    #[must_use]
    pub const fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Returns a shell-like rendering used in assertions and diagnostics.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the child was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Returns `true` when the command finished in time with exit code zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !self.timed_out && matches!(self.code, Some(0))
    }

    /// Human readable exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised when a command cannot be run at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when waiting on a spawned command fails.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Command being awaited.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Future returned by [`CommandRunner::run`].
pub type CommandFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs the request, capturing stdout and stderr.
    ///
    /// A non-zero exit or a timeout is reported through [`CommandOutput`];
    /// only failures to start or supervise the child are errors.
    fn run<'a>(&'a self, request: &'a CommandRequest) -> CommandFuture<'a>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, request: &'a CommandRequest) -> CommandFuture<'a> {
        Box::pin(async move {
            let mut command = Command::new(&request.program);
            command
                .args(&request.args)
                .envs(request.env.iter().map(|(key, value)| (key, value)))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            #[cfg(unix)]
            command.process_group(0);
            if let Some(cwd) = &request.cwd {
                command.current_dir(cwd);
            }

            let mut child = command.spawn().map_err(|err| CommandError::Spawn {
                program: request.program.clone(),
                message: err.to_string(),
            })?;
            let stdout = PipeBuffer::default();
            let stderr = PipeBuffer::default();
            let mut readers = [
                tokio::spawn(drain(child.stdout.take(), stdout.clone())),
                tokio::spawn(drain(child.stderr.take(), stderr.clone())),
            ];

            let (status, timed_out) = match request.timeout {
                Some(limit) => match timeout(limit, child.wait()).await {
                    Ok(status) => (status, false),
                    Err(_elapsed) => {
                        kill_process_group(&child);
                        child.start_kill().ok();
                        (child.wait().await, true)
                    }
                },
                None => (child.wait().await, false),
            };

            let drained = timeout(DRAIN_GRACE, async {
                for reader in &mut readers {
                    reader.await.ok();
                }
            })
            .await;
            if drained.is_err() {
                tracing::debug!(
                    program = %request.program,
                    "output pipes still open after exit, keeping partial output"
                );
                for reader in &readers {
                    reader.abort();
                }
            }

            let exit = status.map_err(|err| CommandError::Wait {
                program: request.program.clone(),
                message: err.to_string(),
            })?;

            Ok(CommandOutput {
                code: if timed_out { None } else { exit.code() },
                stdout: stdout.contents(),
                stderr: stderr.contents(),
                timed_out,
            })
        })
    }
}

/// How long pipes may stay open once the child has exited or been killed.
/// Descendants that escaped the process group can hold them indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Output collected so far from one pipe.
#[derive(Clone, Debug, Default)]
struct PipeBuffer(Arc<Mutex<Vec<u8>>>);

impl PipeBuffer {
    fn extend(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, sink: PipeBuffer) {
    let Some(mut reader) = pipe else {
        return;
    };
    let mut chunk = [0_u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(read) => sink.extend(chunk.get(..read).unwrap_or_default()),
        }
    }
}

/// Kills every process in the child's group, so commands started by a shell
/// die with it.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Some(pgid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The child was spawned as the leader
    // of its own group and has not been reaped, so `pgid` names that group.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
const fn kill_process_group(_child: &Child) {}

#[cfg(test)]
mod tests;
