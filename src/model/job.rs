//! Build and release jobs.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Target;

/// Lifecycle status of a job.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker.
    #[default]
    Pending,
    /// A runner has started the pipeline.
    Running,
    /// The pipeline finished successfully.
    Success,
    /// The pipeline failed or the job was rejected.
    Failure,
}

impl JobStatus {
    /// Lowercase label matching the persisted form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Whether the job has not reached a terminal status.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinguishes builds from releases.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobKind {
    /// Produces an artifact from source.
    Build,
    /// Deploys a built artifact to a target.
    Release,
}

impl JobKind {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application that owns a job.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct Application {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Environment a job belongs to (for example `staging`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct Environment {
    /// Stable identifier.
    #[serde(default)]
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Per-job command lists parsed from the repository's `.hal.yaml`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    /// Local build commands.
    pub build: Vec<String>,
    /// Remote commands run before the transfer.
    pub before_deploy: Vec<String>,
    /// Remote commands run after the transfer.
    pub after_deploy: Vec<String>,
    /// Paths excluded from rsync transfers.
    pub rsync_exclude: Vec<String>,
    /// Directory or file, relative to the workspace, that forms the artifact.
    pub dist: Option<String>,
    /// Build platform override. Builds default to `local`.
    pub platform: Option<String>,
}

/// A build job.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Build {
    /// Stable identifier.
    pub id: String,
    /// Current status.
    #[serde(default)]
    pub status: JobStatus,
    /// Owning application.
    pub application: Application,
    /// Owning environment.
    pub environment: Environment,
    /// Git reference being built.
    #[serde(default)]
    pub reference: String,
    /// Resolved commit hash.
    #[serde(default)]
    pub commit: String,
    /// Checked-out source tree copied into the build workspace.
    #[serde(default)]
    pub source: Option<String>,
    /// Parsed job configuration.
    #[serde(default)]
    pub config: JobConfig,
}

/// A release job deploying a build to a target.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Release {
    /// Stable identifier.
    pub id: String,
    /// Current status.
    #[serde(default)]
    pub status: JobStatus,
    /// Owning application.
    pub application: Application,
    /// Owning environment.
    pub environment: Environment,
    /// Build whose artifact is deployed.
    pub build_id: String,
    /// Git reference of the build.
    #[serde(default)]
    pub reference: String,
    /// Commit hash of the build.
    #[serde(default)]
    pub commit: String,
    /// Deployment destination. Releases without one are rejected.
    #[serde(default)]
    pub target: Option<Target>,
    /// Parsed job configuration.
    #[serde(default)]
    pub config: JobConfig,
}

/// A build or a release.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Job {
    /// Build job.
    Build(Build),
    /// Release job.
    Release(Release),
}

impl Job {
    /// Job identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Build(build) => &build.id,
            Self::Release(release) => &release.id,
        }
    }

    /// Build or release.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Build(_) => JobKind::Build,
            Self::Release(_) => JobKind::Release,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Build(build) => build.status,
            Self::Release(release) => release.status,
        }
    }

    /// Owning application.
    #[must_use]
    pub const fn application(&self) -> &Application {
        match self {
            Self::Build(build) => &build.application,
            Self::Release(release) => &release.application,
        }
    }

    /// Owning environment.
    #[must_use]
    pub const fn environment(&self) -> &Environment {
        match self {
            Self::Build(build) => &build.environment,
            Self::Release(release) => &release.environment,
        }
    }

    /// Parsed job configuration.
    #[must_use]
    pub const fn config(&self) -> &JobConfig {
        match self {
            Self::Build(build) => &build.config,
            Self::Release(release) => &release.config,
        }
    }

    /// Build that produced (or is producing) the artifact.
    #[must_use]
    pub fn build_id(&self) -> &str {
        match self {
            Self::Build(build) => &build.id,
            Self::Release(release) => &release.build_id,
        }
    }

    /// Release identifier, if this is a release.
    #[must_use]
    pub fn push_id(&self) -> Option<&str> {
        match self {
            Self::Build(_) => None,
            Self::Release(release) => Some(&release.id),
        }
    }

    /// Git reference.
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Build(build) => &build.reference,
            Self::Release(release) => &release.reference,
        }
    }

    /// Commit hash.
    #[must_use]
    pub fn commit(&self) -> &str {
        match self {
            Self::Build(build) => &build.commit,
            Self::Release(release) => &release.commit,
        }
    }

    /// Deployment target of a release.
    #[must_use]
    pub const fn target(&self) -> Option<&Target> {
        match self {
            Self::Build(_) => None,
            Self::Release(release) => release.target.as_ref(),
        }
    }

    /// Returns the release, if this is one.
    #[must_use]
    pub const fn as_release(&self) -> Option<&Release> {
        match self {
            Self::Build(_) => None,
            Self::Release(release) => Some(release),
        }
    }

    /// Environment variables exported to local and remote commands.
    #[must_use]
    pub fn deploy_env(&self) -> std::collections::BTreeMap<String, String> {
        let mut env = std::collections::BTreeMap::new();
        env.insert(String::from("HAL_JOBID"), self.id().to_owned());
        env.insert(String::from("HAL_BUILDID"), self.build_id().to_owned());
        env.insert(
            String::from("HAL_PUSHID"),
            self.push_id().unwrap_or_default().to_owned(),
        );
        env.insert(String::from("HAL_APP"), self.application().name.clone());
        env.insert(String::from("HAL_APPID"), self.application().id.clone());
        env.insert(String::from("HAL_ENV"), self.environment().name.clone());
        env.insert(String::from("HAL_COMMIT"), self.commit().to_owned());
        env.insert(String::from("HAL_REF"), self.reference().to_owned());
        env
    }
}
