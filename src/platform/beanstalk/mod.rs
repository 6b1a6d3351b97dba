//! AWS Elastic Beanstalk platform.
//!
//! Target parameters: `application`, `environment`, `bucket`, optional
//! `path` (bundle key template), `version` (version label template),
//! `region` and `src`.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::json;

use super::steps::{ArtifactUploader, Compressor, OverwritePolicy};
use super::{Invocation, Pipeline, PipelineFuture, Services, artifact_metadata, source_exists};
use crate::cloud::{CloudClients, CloudError, EnvironmentStatus};
use crate::events::{
    ERR_DEPLOY_FAILED, ERR_UNHEALTHY, ERR_WAIT_TIMEOUT, MSG_DEPLOY_STARTED, MSG_DEPLOY_SUCCESS,
};
use crate::model::Release;
use crate::template::TemplateContext;
use crate::waiter::{WaitError, Waiter};

/// Default key template for source bundles.
pub const DEFAULT_BUNDLE_PATH: &str = "$APPID/$APP-$JOBID.zip";
/// Default application version label template.
pub const DEFAULT_VERSION_LABEL: &str = "$APP-$JOBID";

const READY: &str = "Ready";
const GREEN: &str = "Green";
/// Health colours that still accept a deployment.
const DEPLOYABLE_HEALTH: [&str; 3] = [GREEN, "Yellow", "Grey"];

struct BeanstalkTarget {
    application: String,
    environment: String,
    bucket: String,
    key: String,
    version: String,
    source: Utf8PathBuf,
    clients: CloudClients,
}

/// Deploys a release as a new Beanstalk application version.
pub struct BeanstalkPipeline {
    services: Arc<Services>,
    compressor: Compressor,
    uploader: ArtifactUploader,
    verifier: Waiter,
}

impl BeanstalkPipeline {
    /// Creates the pipeline. The environment is polled every twenty seconds
    /// for up to ninety attempts.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        let compressor = Compressor::new(
            Arc::clone(&services.runner),
            Arc::clone(&services.events),
            services.tools.tar_bin.clone(),
            services.tools.zip_bin.clone(),
        );
        let uploader = ArtifactUploader::new(Arc::clone(&services.events), OverwritePolicy::Allow);
        Self {
            services,
            compressor,
            uploader,
            verifier: Waiter::new(Duration::from_secs(20), 90).with_progress_every(9),
        }
    }

    /// Replaces the environment polling policy.
    #[must_use]
    pub const fn with_verifier(mut self, verifier: Waiter) -> Self {
        self.verifier = verifier;
        self
    }

    async fn run(&self, invocation: Invocation<'_>) -> bool {
        let Some((release, target)) = self.configure(invocation).await else {
            return false;
        };
        if !self.check_health(invocation, &target).await {
            return false;
        }
        if !source_exists(self.services.events.as_ref(), &target.source) {
            return false;
        }

        invocation.io.section("Packaging bundle");
        let Some(bundle) = self
            .compressor
            .compress_to_scratch(&target.source, &target.key)
            .await
        else {
            return false;
        };
        invocation.io.section("Uploading bundle");
        if !self
            .uploader
            .upload(
                target.clients.s3.as_ref(),
                bundle.path(),
                &target.bucket,
                &target.key,
                &artifact_metadata(release),
            )
            .await
        {
            return false;
        }

        invocation.io.section("Deploying");
        if !self.deploy(release, &target).await {
            return false;
        }
        invocation.io.line(&format!(
            "Deploying version {} to {}",
            target.version, target.environment
        ));
        self.verify(invocation, &target).await
    }

    async fn configure<'a>(
        &self,
        invocation: Invocation<'a>,
    ) -> Option<(&'a Release, BeanstalkTarget)> {
        let (release, target) = self.services.release(invocation.job)?;
        let application = self.services.require(target, "application")?;
        let environment = self.services.require(target, "environment")?;
        let bucket = self.services.require(target, "bucket")?;
        let clients = self.services.clients(target).await?;

        let templates = TemplateContext::from_job(invocation.job, self.services.clock.as_ref());
        let key = templates
            .render(target.parameter("path").unwrap_or(DEFAULT_BUNDLE_PATH))
            .trim_start_matches('/')
            .to_owned();
        let version =
            templates.render(target.parameter("version").unwrap_or(DEFAULT_VERSION_LABEL));
        Some((
            release,
            BeanstalkTarget {
                application,
                environment,
                bucket,
                key,
                version,
                source: invocation.source(Some(target)),
                clients,
            },
        ))
    }

    async fn check_health(&self, invocation: Invocation<'_>, target: &BeanstalkTarget) -> bool {
        invocation.io.section("Checking environment health");
        let current = match target
            .clients
            .beanstalk
            .environment_status(&target.application, &target.environment)
            .await
        {
            Ok(current) => current,
            Err(err) => {
                self.services.cloud_failure("environment_status", &err);
                return false;
            }
        };
        if current.status != READY || !DEPLOYABLE_HEALTH.contains(&current.health.as_str()) {
            self.services.events.failure(
                ERR_UNHEALTHY,
                json!({
                    "environment": target.environment,
                    "status": current.status,
                    "health": current.health,
                }),
            );
            return false;
        }
        invocation.io.line(&format!(
            "Environment {} is {} ({})",
            target.environment, current.status, current.health
        ));
        true
    }

    async fn deploy(&self, release: &Release, target: &BeanstalkTarget) -> bool {
        let api = target.clients.beanstalk.as_ref();
        let description = format!("Release {} of build {}", release.id, release.build_id);
        if let Err(err) = api
            .create_application_version(
                &target.application,
                &target.version,
                &description,
                &target.bucket,
                &target.key,
            )
            .await
        {
            self.services
                .cloud_failure("create_application_version", &err);
            return false;
        }
        if let Err(err) = api
            .update_environment(&target.application, &target.environment, &target.version)
            .await
        {
            self.services.cloud_failure("update_environment", &err);
            return false;
        }
        self.services.events.info(
            MSG_DEPLOY_STARTED,
            json!({
                "application": target.application,
                "environment": target.environment,
                "version": target.version,
            }),
        );
        true
    }

    async fn verify(&self, invocation: Invocation<'_>, target: &BeanstalkTarget) -> bool {
        let api = target.clients.beanstalk.as_ref();
        let application = target.application.as_str();
        let environment = target.environment.as_str();
        let io = invocation.io;
        let waiter = &self.verifier;
        let outcome = self
            .verifier
            .wait(move |attempt| async move {
                let current = api.environment_status(application, environment).await?;
                if waiter.reports_progress(attempt) {
                    io.line(&format!(
                        "Environment {environment} is {} ({})",
                        current.status, current.health
                    ));
                }
                Ok::<_, CloudError>((current.status == READY).then_some(current))
            })
            .await;

        match outcome {
            Ok(EnvironmentStatus { status, health }) if health == GREEN => {
                self.services.events.success(
                    MSG_DEPLOY_SUCCESS,
                    json!({"environment": environment, "status": status, "health": health}),
                );
                true
            }
            Ok(EnvironmentStatus { status, health }) => {
                self.services.events.failure(
                    ERR_DEPLOY_FAILED,
                    json!({"environment": environment, "status": status, "health": health}),
                );
                false
            }
            Err(WaitError::Timeout { attempts }) => {
                self.services.events.failure(
                    ERR_WAIT_TIMEOUT,
                    json!({"environment": environment, "attempts": attempts}),
                );
                false
            }
            Err(WaitError::Check(err)) => {
                self.services.cloud_failure("environment_status", &err);
                false
            }
        }
    }
}

impl Pipeline for BeanstalkPipeline {
    fn invoke<'a>(&'a self, invocation: Invocation<'a>) -> PipelineFuture<'a> {
        Box::pin(self.run(invocation))
    }
}

#[cfg(test)]
mod tests;
