//! Single-job execution: the body of `runner:build` and `runner:deploy`.
//!
//! The runner resolves one pending job, marks it running, prepares its
//! workspace, hands it to the [`Dispatcher`], and records the outcome. It
//! runs inside the subprocess the scheduler spawns for each job.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use thiserror::Error;

use crate::events::{ERR_WORKSPACE, EventLog, Stage};
use crate::io::Io;
use crate::model::{Job, JobKind, JobStatus};
use crate::platform::{Dispatcher, LOCAL_PLATFORM, Properties};
use crate::process::CommandRunner;
use crate::ssh::SessionManager;
use crate::store::{JobStore, StoreError};
use crate::workspace::{JobWorkspace, WorkspaceError, artifact_path};

/// Reasons a job cannot be started.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// No job has the requested id.
    #[error("job {id} not found")]
    NotFound {
        /// Requested id.
        id: String,
    },
    /// The job exists but is of the other kind.
    #[error("job {id} is a {actual}, expected a {expected}")]
    WrongKind {
        /// Requested id.
        id: String,
        /// Kind the command runs.
        expected: JobKind,
        /// Kind found in the store.
        actual: JobKind,
    },
    /// The job is not pending.
    #[error("job {id} is {status}, only pending jobs can run")]
    WrongStatus {
        /// Requested id.
        id: String,
        /// Current status.
        status: JobStatus,
    },
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Platform type tag a job runs on: the target type for releases, the
/// configured platform (default `local`) for builds.
#[must_use]
pub fn platform_for(job: &Job) -> String {
    match job {
        Job::Build(build) => build
            .config
            .platform
            .clone()
            .unwrap_or_else(|| LOCAL_PLATFORM.to_owned()),
        Job::Release(release) => release
            .target
            .as_ref()
            .map(|target| target.kind.clone())
            .unwrap_or_default(),
    }
}

/// Paths and programs the runner needs to prepare workspaces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunnerPaths {
    /// Parent of per-job workspaces.
    pub workspace_root: Utf8PathBuf,
    /// Directory holding build artifacts.
    pub artifact_root: Utf8PathBuf,
    /// `tar` executable used to unpack artifacts.
    pub tar_bin: String,
}

/// Runs one job end to end.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    events: Arc<dyn EventLog>,
    sessions: Arc<SessionManager>,
    commands: Arc<dyn CommandRunner>,
    paths: RunnerPaths,
}

impl JobRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Dispatcher,
        events: Arc<dyn EventLog>,
        sessions: Arc<SessionManager>,
        commands: Arc<dyn CommandRunner>,
        paths: RunnerPaths,
    ) -> Self {
        Self {
            store,
            dispatcher,
            events,
            sessions,
            commands,
            paths,
        }
    }

    /// Looks up job `id` and checks it is a pending job of `kind`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] describing why the job cannot run.
    pub fn resolve(&self, id: &str, kind: JobKind) -> Result<Job, ResolveError> {
        let job = self
            .store
            .find_job(id)?
            .ok_or_else(|| ResolveError::NotFound { id: id.to_owned() })?;
        if job.kind() != kind {
            return Err(ResolveError::WrongKind {
                id: id.to_owned(),
                expected: kind,
                actual: job.kind(),
            });
        }
        if job.status() != JobStatus::Pending {
            return Err(ResolveError::WrongStatus {
                id: id.to_owned(),
                status: job.status(),
            });
        }
        Ok(job)
    }

    /// Runs job `id` and records its final status.
    ///
    /// Returns whether the pipeline succeeded. Pipeline failures are
    /// recorded on the event log and reported as `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] when the job cannot be started or its
    /// status cannot be stored.
    pub async fn run(&self, id: &str, kind: JobKind, io: &dyn Io) -> Result<bool, ResolveError> {
        let job = self.resolve(id, kind)?;
        self.store.set_status(id, JobStatus::Running)?;
        self.events.set_stage(Stage::Starting);
        tracing::info!(job_id = id, kind = %kind, "job started");

        let succeeded = self.execute(&job, io).await;

        self.events.set_stage(Stage::Ending);
        self.sessions.disconnect_all();
        let status = if succeeded {
            JobStatus::Success
        } else {
            JobStatus::Failure
        };
        self.store.set_status(id, status)?;
        tracing::info!(job_id = id, %status, "job finished");
        Ok(succeeded)
    }

    async fn execute(&self, job: &Job, io: &dyn Io) -> bool {
        let workspace = match self.prepare(job).await {
            Ok(workspace) => workspace,
            Err(err) => {
                self.events
                    .failure(ERR_WORKSPACE, json!({"job": job.id(), "error": err.to_string()}));
                return false;
            }
        };
        let properties = Properties {
            workspace: workspace.path().to_path_buf(),
            artifact_root: self.paths.artifact_root.clone(),
            env: job.deploy_env(),
        };
        let platform = platform_for(job);
        let succeeded = self
            .dispatcher
            .invoke(job, io, &platform, job.config(), &properties)
            .await;
        if let Err(err) = workspace.close() {
            tracing::warn!(job_id = job.id(), error = %err, "workspace cleanup failed");
        }
        succeeded
    }

    async fn prepare(&self, job: &Job) -> Result<JobWorkspace, WorkspaceError> {
        let workspace = JobWorkspace::create(&self.paths.workspace_root, job.id())?;
        match job {
            Job::Build(build) => {
                if let Some(source) = build.source.as_deref() {
                    workspace.copy_source(Utf8Path::new(source))?;
                }
            }
            Job::Release(release) => {
                let artifact = artifact_path(&self.paths.artifact_root, &release.build_id);
                workspace
                    .unpack(self.commands.as_ref(), &self.paths.tar_bin, &artifact)
                    .await?;
            }
        }
        Ok(workspace)
    }
}

#[cfg(test)]
mod tests;
