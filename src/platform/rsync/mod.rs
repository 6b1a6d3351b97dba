//! Rsync-over-SSH platform.
//!
//! Target parameters: `servers` (comma-separated `host[:port]` list),
//! `remote_user`, `remote_path` (a path template), and optional `src`.
//! For every server the pipeline checks the remote path is writable, runs
//! `before_deploy` hooks, mirrors the source tree with `rsync --delete`,
//! and finally runs `after_deploy` hooks. Each step finishes on all
//! servers before the next one starts.

use std::sync::Arc;

use camino::Utf8PathBuf;
use serde_json::json;

use super::{Invocation, Pipeline, PipelineFuture, Services, source_exists};
use crate::events::{ERR_MISSING_PARAMETER, ERR_RSYNC, ERR_RSYNC_TIMEOUT, ERR_SERVER_NOT_READY};
use crate::process::CommandRequest;
use crate::ssh::{CommandContext, RunMessages};
use crate::template::TemplateContext;

/// Resolved parameters for one rsync deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
struct RsyncTarget {
    user: String,
    servers: Vec<String>,
    path: String,
    source: Utf8PathBuf,
}

/// Deploys a release to plain servers over SSH.
pub struct RsyncPipeline {
    services: Arc<Services>,
}

impl RsyncPipeline {
    /// Creates the pipeline.
    #[must_use]
    pub const fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn run(&self, invocation: Invocation<'_>) -> bool {
        let Some(target) = self.configure(invocation) else {
            return false;
        };
        if !source_exists(self.services.events.as_ref(), &target.source) {
            return false;
        }

        invocation.io.section("Checking servers");
        if !self.check_servers(&target, invocation).await {
            return false;
        }
        if !self
            .run_hooks(&target, invocation, &invocation.config.before_deploy, "before_deploy")
            .await
        {
            return false;
        }

        invocation.io.section("Transferring files");
        for server in &target.servers {
            if !self.transfer(&target, server, invocation).await {
                return false;
            }
        }

        self.run_hooks(&target, invocation, &invocation.config.after_deploy, "after_deploy")
            .await
    }

    fn configure(&self, invocation: Invocation<'_>) -> Option<RsyncTarget> {
        let (_, target) = self.services.release(invocation.job)?;
        let servers_value = self.services.require(target, "servers")?;
        let user = self.services.require(target, "remote_user")?;
        let path_template = self.services.require(target, "remote_path")?;

        let servers: Vec<String> = servers_value
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        if servers.is_empty() {
            self.services.events.failure(
                ERR_MISSING_PARAMETER,
                json!({"target": target.id, "parameter": "servers"}),
            );
            return None;
        }

        let templates = TemplateContext::from_job(invocation.job, self.services.clock.as_ref());
        Some(RsyncTarget {
            user,
            servers,
            path: templates.render(&path_template),
            source: invocation.source(Some(target)),
        })
    }

    async fn check_servers(&self, target: &RsyncTarget, invocation: Invocation<'_>) -> bool {
        let path = shell_escape::unix::escape(target.path.as_str().into());
        let command = format!("mkdir -p {path} && test -w {path}");
        let messages = RunMessages::default().with_failure(ERR_SERVER_NOT_READY);
        for server in &target.servers {
            let context = CommandContext::new(&target.user, server, command.as_str());
            if !self
                .services
                .executor
                .run(&context, &invocation.properties.env, &messages)
                .await
            {
                return false;
            }
            invocation.io.line(&format!("{server}: {} is writable", target.path));
        }
        true
    }

    async fn run_hooks(
        &self,
        target: &RsyncTarget,
        invocation: Invocation<'_>,
        commands: &[String],
        stage: &str,
    ) -> bool {
        if commands.is_empty() {
            return true;
        }
        invocation.io.section(&format!("Running {stage} commands"));
        let path = shell_escape::unix::escape(target.path.as_str().into());
        let messages = RunMessages::logged();
        for server in &target.servers {
            for command in commands {
                let context =
                    CommandContext::new(&target.user, server, format!("cd {path} && {command}"))
                        .with_sanitized(command.as_str());
                invocation.io.line(&format!("{server}$ {command}"));
                if !self
                    .services
                    .executor
                    .run(&context, &invocation.properties.env, &messages)
                    .await
                {
                    return false;
                }
            }
        }
        true
    }

    async fn transfer(
        &self,
        target: &RsyncTarget,
        server: &str,
        invocation: Invocation<'_>,
    ) -> bool {
        let Some(session) = self
            .services
            .executor
            .sessions()
            .session(&target.user, server)
            .await
        else {
            return false;
        };

        let tools = &self.services.tools;
        let request = CommandRequest::new(&tools.rsync_bin)
            .args(["-rlDz", "--delete"])
            .args(
                invocation
                    .config
                    .rsync_exclude
                    .iter()
                    .map(|pattern| format!("--exclude={pattern}")),
            )
            .arg("-e")
            .arg(session.remote_shell())
            .arg(format!("{}/", target.source))
            .arg(format!(
                "{}:{}/",
                session.destination(),
                target.path.trim_end_matches('/')
            ))
            .timeout(tools.transfer_timeout);
        let command = request.command_string();
        tracing::info!(server, path = %target.path, "starting rsync transfer");

        let output = match self.services.runner.run(&request).await {
            Ok(output) => output,
            Err(err) => {
                self.services.events.failure(
                    ERR_RSYNC,
                    json!({
                        "server": server,
                        "command": command,
                        "output": "",
                        "errorOutput": err.to_string(),
                        "exitCode": null,
                    }),
                );
                return false;
            }
        };
        if output.is_success() {
            invocation
                .io
                .line(&format!("{server}: files synchronised to {}", target.path));
            return true;
        }

        let message = if output.timed_out {
            ERR_RSYNC_TIMEOUT
        } else {
            ERR_RSYNC
        };
        self.services.events.failure(
            message,
            json!({
                "server": server,
                "command": command,
                "output": output.stdout,
                "errorOutput": output.stderr,
                "exitCode": output.code,
            }),
        );
        false
    }
}

impl Pipeline for RsyncPipeline {
    fn invoke<'a>(&'a self, invocation: Invocation<'a>) -> PipelineFuture<'a> {
        Box::pin(self.run(invocation))
    }
}
