//! AWS CodeDeploy platform.
//!
//! Target parameters: `application`, `group`, `bucket`, optional
//! `configuration`, `path` (key template), `region` and `src`. The bundle is
//! uploaded under a key that must not exist yet, so a release can never
//! silently replace another release's bundle.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::json;

use super::steps::{ArtifactUploader, Compressor, OverwritePolicy};
use super::{Invocation, Pipeline, PipelineFuture, Services, artifact_metadata, source_exists};
use crate::cloud::{BundleType, CloudClients, CloudError, DeploymentRequest};
use crate::events::{
    ERR_DEPLOY_FAILED, ERR_UNHEALTHY, ERR_WAIT_TIMEOUT, MSG_DEPLOY_STARTED, MSG_DEPLOY_SUCCESS,
};
use crate::model::Release;
use crate::template::TemplateContext;
use crate::waiter::{WaitError, Waiter};

/// Default key template for deployment bundles.
pub const DEFAULT_BUNDLE_PATH: &str = "$APPID/$APP-$JOBID.tar.gz";

/// Last-deployment statuses that allow a new deployment. `None` means the
/// group has never deployed.
const DEPLOYABLE_GROUP_STATUSES: [&str; 4] = ["None", "Succeeded", "Failed", "Stopped"];
/// Statuses after which a deployment no longer changes.
const TERMINAL_STATUSES: [&str; 4] = ["Succeeded", "Failed", "Stopped", "Ready"];
/// Terminal statuses counted as success.
const SUCCESS_STATUSES: [&str; 2] = ["Succeeded", "Ready"];

struct CodeDeployTarget {
    application: String,
    group: String,
    configuration: Option<String>,
    bucket: String,
    key: String,
    source: Utf8PathBuf,
    clients: CloudClients,
}

/// Deploys a release through a CodeDeploy deployment group.
pub struct CodeDeployPipeline {
    services: Arc<Services>,
    compressor: Compressor,
    uploader: ArtifactUploader,
    verifier: Waiter,
}

impl CodeDeployPipeline {
    /// Creates the pipeline. Deployments are polled every twenty seconds
    /// for up to ninety attempts, with progress shown every ninth check.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        let compressor = Compressor::new(
            Arc::clone(&services.runner),
            Arc::clone(&services.events),
            services.tools.tar_bin.clone(),
            services.tools.zip_bin.clone(),
        );
        let uploader =
            ArtifactUploader::new(Arc::clone(&services.events), OverwritePolicy::Refuse);
        Self {
            services,
            compressor,
            uploader,
            verifier: Waiter::new(Duration::from_secs(20), 90).with_progress_every(9),
        }
    }

    /// Replaces the deployment polling policy.
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
        let Some(deployment_id) = self.deploy(release, &target).await else {
            return false;
        };
        invocation
            .io
            .line(&format!("Started deployment {deployment_id}"));
        self.verify(invocation, &target, &deployment_id).await
    }

    async fn configure<'a>(
        &self,
        invocation: Invocation<'a>,
    ) -> Option<(&'a Release, CodeDeployTarget)> {
        let (release, target) = self.services.release(invocation.job)?;
        let application = self.services.require(target, "application")?;
        let group = self.services.require(target, "group")?;
        let bucket = self.services.require(target, "bucket")?;
        let clients = self.services.clients(target).await?;

        let templates = TemplateContext::from_job(invocation.job, self.services.clock.as_ref());
        let key = templates
            .render(target.parameter("path").unwrap_or(DEFAULT_BUNDLE_PATH))
            .trim_start_matches('/')
            .to_owned();
        Some((
            release,
            CodeDeployTarget {
                application,
                group,
                configuration: target.parameter("configuration").map(ToOwned::to_owned),
                bucket,
                key,
                source: invocation.source(Some(target)),
                clients,
            },
        ))
    }

    async fn check_health(&self, invocation: Invocation<'_>, target: &CodeDeployTarget) -> bool {
        invocation.io.section("Checking deployment group");
        let status = match target
            .clients
            .codedeploy
            .deployment_group_status(&target.application, &target.group)
            .await
        {
            Ok(status) => status.unwrap_or_else(|| String::from("None")),
            Err(err) => {
                self.services.cloud_failure("deployment_group_status", &err);
                return false;
            }
        };
        if !DEPLOYABLE_GROUP_STATUSES.contains(&status.as_str()) {
            self.services.events.failure(
                ERR_UNHEALTHY,
                json!({
                    "application": target.application,
                    "group": target.group,
                    "status": status,
                }),
            );
            return false;
        }
        invocation
            .io
            .line(&format!("Last deployment status: {status}"));
        true
    }

    async fn deploy(&self, release: &Release, target: &CodeDeployTarget) -> Option<String> {
        let request = DeploymentRequest {
            application: target.application.clone(),
            group: target.group.clone(),
            configuration: target.configuration.clone(),
            bucket: target.bucket.clone(),
            key: target.key.clone(),
            bundle_type: BundleType::detect(&target.key),
            description: format!("Release {} of build {}", release.id, release.build_id),
        };
        match target.clients.codedeploy.create_deployment(&request).await {
            Ok(deployment_id) => {
                self.services.events.info(
                    MSG_DEPLOY_STARTED,
                    json!({
                        "deploymentId": deployment_id,
                        "application": target.application,
                        "group": target.group,
                        "bundleType": request.bundle_type.as_str(),
                    }),
                );
                Some(deployment_id)
            }
            Err(err) => {
                self.services.cloud_failure("create_deployment", &err);
                None
            }
        }
    }

    async fn verify(
        &self,
        invocation: Invocation<'_>,
        target: &CodeDeployTarget,
        deployment_id: &str,
    ) -> bool {
        let api = target.clients.codedeploy.as_ref();
        let io = invocation.io;
        let waiter = &self.verifier;
        let outcome = self
            .verifier
            .wait(move |attempt| async move {
                let status = api.deployment_status(deployment_id).await?;
                if waiter.reports_progress(attempt) {
                    io.line(&format!("Deployment {deployment_id} is {status}"));
                }
                Ok::<_, CloudError>(TERMINAL_STATUSES.contains(&status.as_str()).then_some(status))
            })
            .await;

        match outcome {
            Ok(status) if SUCCESS_STATUSES.contains(&status.as_str()) => {
                self.services.events.success(
                    MSG_DEPLOY_SUCCESS,
                    json!({"deploymentId": deployment_id, "status": status}),
                );
                true
            }
            Ok(status) => {
                self.services.events.failure(
                    ERR_DEPLOY_FAILED,
                    json!({"deploymentId": deployment_id, "status": status}),
                );
                false
            }
            Err(WaitError::Timeout { attempts }) => {
                self.services.events.failure(
                    ERR_WAIT_TIMEOUT,
                    json!({"deploymentId": deployment_id, "attempts": attempts}),
                );
                false
            }
            Err(WaitError::Check(err)) => {
                self.services.cloud_failure("deployment_status", &err);
                false
            }
        }
    }
}

impl Pipeline for CodeDeployPipeline {
    fn invoke<'a>(&'a self, invocation: Invocation<'a>) -> PipelineFuture<'a> {
        Box::pin(self.run(invocation))
    }
}

#[cfg(test)]
mod tests;
