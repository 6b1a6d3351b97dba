//! The serialised store layout shared by every store implementation.

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::model::{
    Application, Build, Environment, Job, JobConfig, JobKind, JobStatus, Release, Target,
};

/// Builds, releases, and targets as persisted.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default)]
pub struct StoreDocument {
    /// Build jobs.
    pub builds: Vec<Build>,
    /// Release jobs, referencing targets by id.
    pub releases: Vec<ReleaseRecord>,
    /// Deployment targets.
    pub targets: Vec<Target>,
}

/// A release as persisted, with its target stored by reference.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct ReleaseRecord {
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
    /// Deployment target id.
    #[serde(default)]
    pub target_id: Option<String>,
    /// Parsed job configuration.
    #[serde(default)]
    pub config: JobConfig,
}

impl StoreDocument {
    /// Adds a build.
    pub fn push_build(&mut self, build: Build) {
        self.builds.push(build);
    }

    /// Adds a release, storing its target alongside when the id is new.
    pub fn push_release(&mut self, release: Release) {
        let target_id = release.target.as_ref().map(|target| target.id.clone());
        if let Some(target) = release.target
            && !self.targets.iter().any(|known| known.id == target.id)
        {
            self.targets.push(target);
        }
        self.releases.push(ReleaseRecord {
            id: release.id,
            status: release.status,
            application: release.application,
            environment: release.environment,
            build_id: release.build_id,
            reference: release.reference,
            commit: release.commit,
            target_id,
            config: release.config,
        });
    }

    /// Adds or replaces a target.
    pub fn upsert_target(&mut self, target: Target) {
        if let Some(existing) = self.targets.iter_mut().find(|known| known.id == target.id) {
            *existing = target;
        } else {
            self.targets.push(target);
        }
    }

    fn hydrate(&self, record: &ReleaseRecord) -> Release {
        Release {
            id: record.id.clone(),
            status: record.status,
            application: record.application.clone(),
            environment: record.environment.clone(),
            build_id: record.build_id.clone(),
            reference: record.reference.clone(),
            commit: record.commit.clone(),
            target: record
                .target_id
                .as_deref()
                .and_then(|id| self.target(id).cloned()),
            config: record.config.clone(),
        }
    }

    /// Looks up a job by id.
    #[must_use]
    pub fn job(&self, id: &str) -> Option<Job> {
        if let Some(build) = self.builds.iter().find(|build| build.id == id) {
            return Some(Job::Build(build.clone()));
        }
        self.releases
            .iter()
            .find(|release| release.id == id)
            .map(|record| Job::Release(self.hydrate(record)))
    }

    /// Pending jobs of `kind`.
    #[must_use]
    pub fn pending(&self, kind: JobKind) -> Vec<Job> {
        match kind {
            JobKind::Build => self
                .builds
                .iter()
                .filter(|build| build.status == JobStatus::Pending)
                .cloned()
                .map(Job::Build)
                .collect(),
            JobKind::Release => self
                .releases
                .iter()
                .filter(|release| release.status == JobStatus::Pending)
                .map(|record| Job::Release(self.hydrate(record)))
                .collect(),
        }
    }

    /// Status of job `id`, if it exists.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.builds
            .iter()
            .find(|build| build.id == id)
            .map(|build| build.status)
            .or_else(|| {
                self.releases
                    .iter()
                    .find(|release| release.id == id)
                    .map(|release| release.status)
            })
    }

    /// Updates the status of job `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] for an unknown id.
    pub fn set_status(&mut self, id: &str, status: JobStatus) -> Result<(), StoreError> {
        if let Some(build) = self.builds.iter_mut().find(|build| build.id == id) {
            build.status = status;
            return Ok(());
        }
        if let Some(release) = self.releases.iter_mut().find(|release| release.id == id) {
            release.status = status;
            return Ok(());
        }
        Err(StoreError::JobNotFound { id: id.to_owned() })
    }

    /// Looks up a target.
    #[must_use]
    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|target| target.id == id)
    }

    /// Claims `target_id` for `job_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TargetNotFound`] for an unknown target.
    pub fn claim_target(&mut self, target_id: &str, job_id: &str) -> Result<bool, StoreError> {
        let blocking = self
            .target(target_id)
            .ok_or_else(|| StoreError::TargetNotFound {
                id: target_id.to_owned(),
            })?
            .last_job
            .as_deref()
            .filter(|last| *last != job_id)
            .and_then(|last| self.status(last))
            .is_some_and(JobStatus::is_active);
        if blocking {
            return Ok(false);
        }
        if let Some(target) = self.targets.iter_mut().find(|target| target.id == target_id) {
            target.last_job = Some(job_id.to_owned());
        }
        Ok(true)
    }
}
