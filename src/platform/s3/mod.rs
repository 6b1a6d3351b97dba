//! Amazon S3 platform.
//!
//! Target parameters: `bucket`, optional `region`, `strategy` (`artifact`
//! or `sync`), `path` (object key or key prefix template), `src`, and
//! `remove_extra`. The artifact strategy packages the source into one
//! object and waits for it to become visible; the sync strategy mirrors the
//! source tree file by file.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::json;

use super::steps::{ArtifactUploader, Compressor, OverwritePolicy, SyncUploader};
use super::{
    Invocation, Pipeline, PipelineFuture, Services, artifact_metadata, source_exists,
};
use crate::cloud::S3Api;
use crate::events::{ERR_INVALID_PARAMETER, ERR_WAIT_TIMEOUT};
use crate::model::Release;
use crate::template::TemplateContext;
use crate::waiter::{WaitError, Waiter};

/// Default key template for the artifact strategy.
pub const DEFAULT_ARTIFACT_PATH: &str = "$APP/$JOBID.tar.gz";

/// How the source reaches the bucket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum S3Strategy {
    /// One packaged object.
    Artifact,
    /// Incremental file-by-file mirror.
    Sync,
}

impl S3Strategy {
    fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::to_ascii_lowercase).as_deref() {
            None | Some("artifact") => Some(Self::Artifact),
            Some("sync") => Some(Self::Sync),
            Some(_) => None,
        }
    }
}

struct S3Target {
    bucket: String,
    strategy: S3Strategy,
    path: String,
    source: Utf8PathBuf,
    remove_extra: bool,
    s3: Arc<dyn S3Api>,
}

/// Uploads a release to a bucket.
pub struct S3Pipeline {
    services: Arc<Services>,
    compressor: Compressor,
    uploader: ArtifactUploader,
    sync: SyncUploader,
    verifier: Waiter,
}

impl S3Pipeline {
    /// Creates the pipeline, polling for the uploaded object every ten
    /// seconds for up to thirty attempts.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        let compressor = Compressor::new(
            Arc::clone(&services.runner),
            Arc::clone(&services.events),
            services.tools.tar_bin.clone(),
            services.tools.zip_bin.clone(),
        );
        let uploader = ArtifactUploader::new(Arc::clone(&services.events), OverwritePolicy::Allow);
        let sync = SyncUploader::new(Arc::clone(&services.events));
        Self {
            services,
            compressor,
            uploader,
            sync,
            verifier: Waiter::new(Duration::from_secs(10), 30),
        }
    }

    /// Replaces the upload verification policy.
    #[must_use]
    pub const fn with_verifier(mut self, verifier: Waiter) -> Self {
        self.verifier = verifier;
        self
    }

    async fn run(&self, invocation: Invocation<'_>) -> bool {
        let Some((release, target)) = self.configure(invocation).await else {
            return false;
        };
        if !source_exists(self.services.events.as_ref(), &target.source) {
            return false;
        }
        match target.strategy {
            S3Strategy::Artifact => self.deploy_artifact(invocation, release, &target).await,
            S3Strategy::Sync => {
                invocation.io.section("Synchronising files");
                let synced = self
                    .sync
                    .sync(
                        target.s3.as_ref(),
                        &target.source,
                        &target.bucket,
                        &target.path,
                        target.remove_extra,
                    )
                    .await;
                if synced {
                    invocation
                        .io
                        .line(&format!("Synchronised to s3://{}/{}", target.bucket, target.path));
                }
                synced
            }
        }
    }

    async fn configure<'a>(&self, invocation: Invocation<'a>) -> Option<(&'a Release, S3Target)> {
        let (release, target) = self.services.release(invocation.job)?;
        let bucket = self.services.require(target, "bucket")?;
        let Some(strategy) = S3Strategy::parse(target.parameter("strategy")) else {
            self.services.events.failure(
                ERR_INVALID_PARAMETER,
                json!({
                    "target": target.id,
                    "parameter": "strategy",
                    "value": target.parameter("strategy"),
                }),
            );
            return None;
        };
        let clients = self.services.clients(target).await?;

        let default_path = match strategy {
            S3Strategy::Artifact => DEFAULT_ARTIFACT_PATH,
            S3Strategy::Sync => "",
        };
        let templates = TemplateContext::from_job(invocation.job, self.services.clock.as_ref());
        let path = templates
            .render(target.parameter("path").unwrap_or(default_path))
            .trim_start_matches('/')
            .to_owned();
        tracing::info!(target_id = %target.id, %bucket, ?strategy, %path, "s3 target configured");

        Some((
            release,
            S3Target {
                bucket,
                strategy,
                path,
                source: invocation.source(Some(target)),
                remove_extra: target.flag("remove_extra"),
                s3: clients.s3,
            },
        ))
    }

    async fn deploy_artifact(
        &self,
        invocation: Invocation<'_>,
        release: &Release,
        target: &S3Target,
    ) -> bool {
        invocation.io.section("Packaging artifact");
        let Some(artifact) = self
            .compressor
            .compress_to_scratch(&target.source, &target.path)
            .await
        else {
            return false;
        };

        invocation.io.section("Uploading artifact");
        if !self
            .uploader
            .upload(
                target.s3.as_ref(),
                artifact.path(),
                &target.bucket,
                &target.path,
                &artifact_metadata(release),
            )
            .await
        {
            return false;
        }

        invocation.io.section("Verifying upload");
        let s3 = target.s3.as_ref();
        let bucket = target.bucket.as_str();
        let key = target.path.as_str();
        let visible = self
            .verifier
            .wait(move |_| async move {
                s3.object_exists(bucket, key)
                    .await
                    .map(|exists| exists.then_some(()))
            })
            .await;
        match visible {
            Ok(()) => {
                invocation
                    .io
                    .line(&format!("Uploaded to s3://{bucket}/{key}"));
                true
            }
            Err(WaitError::Timeout { attempts }) => {
                self.services.events.failure(
                    ERR_WAIT_TIMEOUT,
                    json!({"bucket": bucket, "key": key, "attempts": attempts}),
                );
                false
            }
            Err(WaitError::Check(err)) => {
                self.services.cloud_failure("object_exists", &err);
                false
            }
        }
    }
}

impl Pipeline for S3Pipeline {
    fn invoke<'a>(&'a self, invocation: Invocation<'a>) -> PipelineFuture<'a> {
        Box::pin(self.run(invocation))
    }
}
