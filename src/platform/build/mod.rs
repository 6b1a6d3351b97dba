//! Local build platform.
//!
//! Runs the job's build commands in the workspace, then packages the
//! distributable tree into `<artifact root>/<build id>.tar.gz` for later
//! releases to unpack.

use std::sync::Arc;

use serde_json::json;

use super::steps::Compressor;
use super::{Invocation, Pipeline, PipelineFuture, Services, source_exists};
use crate::events::{ERR_BUILD_COMMAND, ERR_BUILD_REQUIRED, ERR_BUILD_TIMEOUT};
use crate::model::Job;
use crate::process::CommandRequest;
use crate::workspace::artifact_path;

/// Builds and packages source in the job workspace.
pub struct BuildPipeline {
    services: Arc<Services>,
    compressor: Compressor,
}

impl BuildPipeline {
    /// Creates the pipeline.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        let compressor = Compressor::new(
            Arc::clone(&services.runner),
            Arc::clone(&services.events),
            services.tools.tar_bin.clone(),
            services.tools.zip_bin.clone(),
        );
        Self {
            services,
            compressor,
        }
    }

    async fn run(&self, invocation: Invocation<'_>) -> bool {
        let Job::Build(build) = invocation.job else {
            self.services
                .events
                .failure(ERR_BUILD_REQUIRED, json!({"job": invocation.job.id()}));
            return false;
        };

        if !invocation.config.build.is_empty() {
            invocation.io.section("Running build commands");
        }
        for command in &invocation.config.build {
            if !self.run_command(invocation, command).await {
                return false;
            }
        }

        invocation.io.section("Packaging build");
        let source = invocation.source(None);
        if !source_exists(self.services.events.as_ref(), &source) {
            return false;
        }
        let destination = artifact_path(&invocation.properties.artifact_root, &build.id);
        if !self.compressor.compress(&source, &destination).await {
            return false;
        }
        invocation
            .io
            .line(&format!("Build artifact written to {destination}"));
        true
    }

    async fn run_command(&self, invocation: Invocation<'_>, command: &str) -> bool {
        let tools = &self.services.tools;
        let request = CommandRequest::new(&tools.shell_bin)
            .arg("-c")
            .arg(command)
            .envs(&invocation.properties.env)
            .current_dir(invocation.properties.workspace.clone())
            .timeout(tools.build_timeout);
        invocation.io.line(&format!("$ {command}"));

        let output = match self.services.runner.run(&request).await {
            Ok(output) => output,
            Err(err) => {
                self.services.events.failure(
                    ERR_BUILD_COMMAND,
                    json!({
                        "command": command,
                        "output": "",
                        "errorOutput": err.to_string(),
                        "exitCode": null,
                    }),
                );
                return false;
            }
        };
        if !output.stdout.is_empty() {
            invocation.io.line(output.stdout.trim_end());
        }
        if output.is_success() {
            return true;
        }

        let message = if output.timed_out {
            ERR_BUILD_TIMEOUT
        } else {
            ERR_BUILD_COMMAND
        };
        self.services.events.failure(
            message,
            json!({
                "command": command,
                "output": output.stdout,
                "errorOutput": output.stderr,
                "exitCode": output.code,
            }),
        );
        false
    }
}

impl Pipeline for BuildPipeline {
    fn invoke<'a>(&'a self, invocation: Invocation<'a>) -> PipelineFuture<'a> {
        Box::pin(self.run(invocation))
    }
}
