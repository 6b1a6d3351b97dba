//! Deployment platforms and the dispatcher that selects them.
//!
//! Each platform is a [`Pipeline`]: a fixed, fail-fast sequence of steps
//! (configure, gate, package, upload, deploy, verify). Steps record their
//! own failures on the event log and report `false`; the pipeline stops at
//! the first one. Platforms are chosen from a closed [`PlatformKind`] enum,
//! so an unknown type tag is the only dispatch failure.

mod beanstalk;
mod build;
mod codedeploy;
mod elb;
mod rsync;
mod s3;
pub mod steps;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;

use crate::clock::Clock;
use crate::cloud::{CloudClientFactory, CloudClients, CloudError};
use crate::events::{
    ERR_CLOUD_AUTH, ERR_CLOUD_CALL, ERR_INVALID_PLATFORM, ERR_MISSING_PARAMETER,
    ERR_RELEASE_REQUIRED, EventLog, Stage,
};
use crate::io::Io;
use crate::model::{Job, JobConfig, Release, Target, TargetKind};
use crate::process::CommandRunner;
use crate::ssh::RemoteCommandExecutor;

pub use beanstalk::BeanstalkPipeline;
pub use build::BuildPipeline;
pub use codedeploy::CodeDeployPipeline;
pub use elb::ElbPipeline;
pub use rsync::RsyncPipeline;
pub use s3::S3Pipeline;

/// Region used when a target does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Platform type tag for local builds.
pub const LOCAL_PLATFORM: &str = "local";

/// Every platform the dispatcher knows.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PlatformKind {
    /// Local build.
    Local,
    /// A deployment target platform.
    Target(TargetKind),
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().eq_ignore_ascii_case(LOCAL_PLATFORM) {
            return Ok(Self::Local);
        }
        value.parse().map(Self::Target)
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str(LOCAL_PLATFORM),
            Self::Target(kind) => kind.fmt(f),
        }
    }
}

/// Per-run inputs prepared by the runner.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Properties {
    /// Job workspace: checked-out source for builds, unpacked artifact for
    /// releases.
    pub workspace: Utf8PathBuf,
    /// Directory holding build artifacts.
    pub artifact_root: Utf8PathBuf,
    /// Environment exported to local and remote commands.
    pub env: BTreeMap<String, String>,
}

/// Everything one pipeline run needs.
#[derive(Clone, Copy)]
pub struct Invocation<'a> {
    /// Job being run.
    pub job: &'a Job,
    /// Operator-facing output.
    pub io: &'a dyn Io,
    /// Parsed job configuration.
    pub config: &'a JobConfig,
    /// Workspace and environment.
    pub properties: &'a Properties,
}

impl Invocation<'_> {
    /// Directory or file, relative to the workspace, that a platform ships.
    ///
    /// A target `src` parameter wins over the job's `dist` setting.
    #[must_use]
    pub fn source(&self, target: Option<&Target>) -> Utf8PathBuf {
        let relative = target
            .and_then(|target| target.parameter("src"))
            .or_else(|| self.config.dist.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty() && *value != ".");
        relative.map_or_else(
            || self.properties.workspace.clone(),
            |path| self.properties.workspace.join(path.trim_start_matches('/')),
        )
    }
}

/// Programs and budgets used by local steps.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tools {
    /// `rsync` executable.
    pub rsync_bin: String,
    /// `tar` executable.
    pub tar_bin: String,
    /// `zip` executable.
    pub zip_bin: String,
    /// Shell for build commands.
    pub shell_bin: String,
    /// Budget for each build command.
    pub build_timeout: Duration,
    /// Budget for each rsync transfer.
    pub transfer_timeout: Duration,
}

/// Shared collaborators injected into every pipeline.
#[derive(Clone)]
pub struct Services {
    /// Runs local programs.
    pub runner: Arc<dyn CommandRunner>,
    /// Audit events.
    pub events: Arc<dyn EventLog>,
    /// Source of "now" for path templates.
    pub clock: Arc<dyn Clock>,
    /// Resolves cloud clients.
    pub cloud: Arc<dyn CloudClientFactory>,
    /// Runs commands over SSH.
    pub executor: Arc<RemoteCommandExecutor>,
    /// Local programs.
    pub tools: Tools,
}

impl Services {
    /// Records a missing parameter and returns `None`, or the value.
    fn require(&self, target: &Target, key: &str) -> Option<String> {
        let value = target.parameter(key).map(ToOwned::to_owned);
        if value.is_none() {
            self.events.failure(
                ERR_MISSING_PARAMETER,
                json!({"target": target.id, "parameter": key}),
            );
        }
        value
    }

    /// Returns the release and its target, or records why the job cannot
    /// run on a deployment platform.
    fn release<'a>(&self, job: &'a Job) -> Option<(&'a Release, &'a Target)> {
        let Some(release) = job.as_release() else {
            self.events
                .failure(ERR_RELEASE_REQUIRED, json!({"job": job.id()}));
            return None;
        };
        let Some(target) = release.target.as_ref() else {
            self.events.failure(
                ERR_MISSING_PARAMETER,
                json!({"job": job.id(), "parameter": "target"}),
            );
            return None;
        };
        Some((release, target))
    }

    /// Resolves cloud clients for the target's region and credential.
    async fn clients(&self, target: &Target) -> Option<CloudClients> {
        let region = target.parameter("region").unwrap_or(DEFAULT_REGION);
        match self.cloud.clients(region, target.credential.as_ref()).await {
            Ok(clients) => Some(clients),
            Err(err) => {
                self.events.failure(
                    ERR_CLOUD_AUTH,
                    json!({"target": target.id, "region": region, "error": err.to_string()}),
                );
                None
            }
        }
    }

    /// Records a failed cloud call.
    fn cloud_failure(&self, operation: &str, err: &CloudError) {
        self.events.failure(
            ERR_CLOUD_CALL,
            json!({"operation": operation, "error": err.to_string()}),
        );
    }
}

/// Future returned by [`Pipeline::invoke`].
pub type PipelineFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// One platform's ordered, fail-fast step sequence.
pub trait Pipeline: Send + Sync {
    /// Runs every step in order and returns whether all succeeded. Failures
    /// are recorded on the event log before `false` is returned.
    fn invoke<'a>(&'a self, invocation: Invocation<'a>) -> PipelineFuture<'a>;
}

/// One pipeline per platform.
pub struct Platforms {
    /// Local builds.
    pub build: BuildPipeline,
    /// Rsync over SSH.
    pub rsync: RsyncPipeline,
    /// S3 upload or sync.
    pub s3: S3Pipeline,
    /// AWS CodeDeploy.
    pub codedeploy: CodeDeployPipeline,
    /// Elastic Beanstalk.
    pub beanstalk: BeanstalkPipeline,
    /// Classic load balancer swap.
    pub elb: ElbPipeline,
}

impl Platforms {
    /// Builds every pipeline with its production polling policy.
    #[must_use]
    pub fn new(services: &Arc<Services>) -> Self {
        Self {
            build: BuildPipeline::new(Arc::clone(services)),
            rsync: RsyncPipeline::new(Arc::clone(services)),
            s3: S3Pipeline::new(Arc::clone(services)),
            codedeploy: CodeDeployPipeline::new(Arc::clone(services)),
            beanstalk: BeanstalkPipeline::new(Arc::clone(services)),
            elb: ElbPipeline::new(Arc::clone(services)),
        }
    }

    /// Pipeline serving `kind`.
    #[must_use]
    pub fn get(&self, kind: PlatformKind) -> &dyn Pipeline {
        match kind {
            PlatformKind::Local => &self.build,
            PlatformKind::Target(TargetKind::Rsync) => &self.rsync,
            PlatformKind::Target(TargetKind::S3) => &self.s3,
            PlatformKind::Target(TargetKind::CodeDeploy) => &self.codedeploy,
            PlatformKind::Target(TargetKind::ElasticBeanstalk) => &self.beanstalk,
            PlatformKind::Target(TargetKind::Elb) => &self.elb,
        }
    }
}

/// Resolves a platform type tag and runs its pipeline.
pub struct Dispatcher {
    platforms: Platforms,
    events: Arc<dyn EventLog>,
}

impl Dispatcher {
    /// Creates a dispatcher over `platforms`.
    #[must_use]
    pub fn new(platforms: Platforms, events: Arc<dyn EventLog>) -> Self {
        Self { platforms, events }
    }

    /// Runs `job` on the platform named `platform`.
    ///
    /// An unknown tag is recorded as [`ERR_INVALID_PLATFORM`] and returns
    /// `false` without touching the job. Otherwise the job moves to the
    /// running stage and the pipeline's result is returned.
    pub async fn invoke(
        &self,
        job: &Job,
        io: &dyn Io,
        platform: &str,
        config: &JobConfig,
        properties: &Properties,
    ) -> bool {
        let Ok(kind) = platform.parse::<PlatformKind>() else {
            self.events
                .failure(ERR_INVALID_PLATFORM, json!({"platform": platform}));
            return false;
        };
        self.events.set_stage(Stage::Running);
        tracing::info!(job_id = job.id(), platform = %kind, "dispatching job");
        self.platforms
            .get(kind)
            .invoke(Invocation {
                job,
                io,
                config,
                properties,
            })
            .await
    }
}

/// Object metadata attached to uploaded release artifacts.
fn artifact_metadata(release: &Release) -> BTreeMap<String, String> {
    BTreeMap::from([
        (String::from("application"), release.application.name.clone()),
        (String::from("build"), release.build_id.clone()),
        (String::from("commit"), release.commit.clone()),
        (String::from("environment"), release.environment.name.clone()),
        (String::from("release"), release.id.clone()),
    ])
}

/// Joins a key prefix and a relative path with exactly one `/`.
fn join_key(prefix: &str, relative: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        relative.to_owned()
    } else {
        format!("{trimmed}/{relative}")
    }
}

/// Whether `path` exists, recording a missing source otherwise.
fn source_exists(events: &dyn EventLog, path: &Utf8Path) -> bool {
    if path.exists() {
        return true;
    }
    events.failure(
        crate::events::ERR_MISSING_SOURCE,
        json!({"path": path.as_str()}),
    );
    false
}

#[cfg(test)]
mod tests;
