//! Timeout-bounded remote commands with structured logging.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::SessionManager;
use crate::events::{ERR_REMOTE_FAILURE, ERR_REMOTE_TIMEOUT, EventLog, MSG_REMOTE_SUCCESS};
use crate::process::{CommandOutput, CommandRequest, CommandRunner};

/// One remote command and where it runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandContext {
    /// Remote login name.
    pub user: String,
    /// Server, optionally with a `:port` suffix.
    pub host: String,
    /// Command executed verbatim.
    pub command: String,
    /// Display form used in logs when the raw command carries secrets.
    pub sanitized: Option<String>,
}

impl CommandContext {
    /// Creates a context whose command is safe to log as-is.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        host: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            command: command.into(),
            sanitized: None,
        }
    }

    /// Sets the display form used in logs.
    #[must_use]
    pub fn with_sanitized(mut self, display: impl Into<String>) -> Self {
        self.sanitized = Some(display.into());
        self
    }

    /// Command as it may appear in logs.
    #[must_use]
    pub fn display(&self) -> &str {
        self.sanitized.as_deref().unwrap_or(&self.command)
    }
}

/// Event messages and verbosity for one remote command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunMessages {
    /// Record a success event even when the command succeeds quietly.
    pub always_log: bool,
    /// Message used when the command times out.
    pub timeout: &'static str,
    /// Message used when the command fails.
    pub failure: &'static str,
    /// Message used when the command succeeds and `always_log` is set.
    pub success: &'static str,
}

impl Default for RunMessages {
    fn default() -> Self {
        Self {
            always_log: false,
            timeout: ERR_REMOTE_TIMEOUT,
            failure: ERR_REMOTE_FAILURE,
            success: MSG_REMOTE_SUCCESS,
        }
    }
}

impl RunMessages {
    /// Messages that always log successful runs.
    #[must_use]
    pub fn logged() -> Self {
        Self {
            always_log: true,
            ..Self::default()
        }
    }

    /// Replaces the failure message.
    #[must_use]
    pub const fn with_failure(mut self, message: &'static str) -> Self {
        self.failure = message;
        self
    }
}

/// Runs commands over sessions from a [`SessionManager`].
pub struct RemoteCommandExecutor {
    sessions: Arc<SessionManager>,
    runner: Arc<dyn CommandRunner>,
    events: Arc<dyn EventLog>,
    timeout: Duration,
}

impl RemoteCommandExecutor {
    /// Creates an executor bounding each command by `timeout`.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        runner: Arc<dyn CommandRunner>,
        events: Arc<dyn EventLog>,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            runner,
            events,
            timeout,
        }
    }

    /// Session registry used by this executor.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Runs `context.command` with `env` exported. Returns whether it
    /// succeeded; every failure is already recorded on the event log.
    pub async fn run(
        &self,
        context: &CommandContext,
        env: &BTreeMap<String, String>,
        messages: &RunMessages,
    ) -> bool {
        let Some(session) = self.sessions.session(&context.user, &context.host).await else {
            return false;
        };

        let remote_command = with_exports(env, &context.command);
        let request = CommandRequest::new(&self.sessions.settings().ssh_bin)
            .args(session.ssh_args(&remote_command))
            .timeout(self.timeout);
        tracing::debug!(
            server = %context.host,
            command = context.display(),
            "running remote command"
        );

        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(err) => {
                self.events.failure(
                    messages.failure,
                    json!({
                        "command": context.display(),
                        "output": "",
                        "errorOutput": err.to_string(),
                        "exitCode": null,
                    }),
                );
                return false;
            }
        };

        if output.timed_out {
            self.events
                .failure(messages.timeout, failure_context(context, &output));
            return false;
        }
        if !output.is_success() {
            self.events
                .failure(messages.failure, failure_context(context, &output));
            return false;
        }
        if messages.always_log {
            self.events.success(
                messages.success,
                json!({"command": context.display(), "output": output.stdout}),
            );
        }
        true
    }
}

fn failure_context(context: &CommandContext, output: &CommandOutput) -> serde_json::Value {
    json!({
        "command": context.display(),
        "output": output.stdout,
        "errorOutput": output.stderr,
        "exitCode": output.code,
    })
}

/// Prefixes `command` with `export` statements for `env`.
pub(super) fn with_exports(env: &BTreeMap<String, String>, command: &str) -> String {
    if env.is_empty() {
        return command.to_owned();
    }
    let exports: Vec<String> = env
        .iter()
        .map(|(key, value)| {
            format!(
                "{key}={}",
                shell_escape::unix::escape(value.as_str().into())
            )
        })
        .collect();
    format!("export {}; {command}", exports.join(" "))
}
