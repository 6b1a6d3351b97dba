//! Audit events recorded while a job runs.
//!
//! Pipelines report progress and failures as `(level, message, context)`
//! triples. Messages are fixed strings so operators can search for them;
//! anything variable belongs in the JSON context.

use std::sync::{Mutex, PoisonError};

use serde_json::Value;

/// No SSH credential matches the user and server.
pub const ERR_NO_CREDENTIALS: &str = "Cannot find credentials for SSH server";
/// The matching credential carries no usable private key.
pub const ERR_MISSING_PRIVATE_KEY: &str = "SSH credential is missing a valid private key";
/// Connecting or authenticating to the server failed.
pub const ERR_CONNECT_SERVER: &str = "Failed to connect to remote server";
/// The upload destination already holds an object.
pub const ERR_OBJECT_EXISTS: &str = "Artifact already exists at upload destination";
/// The target names a platform the agent does not support.
pub const ERR_INVALID_PLATFORM: &str = "Invalid deployment platform specified";
/// The platform only deploys releases.
pub const ERR_RELEASE_REQUIRED: &str = "Deployment platform requires a release";
/// A required target parameter is blank or missing.
pub const ERR_MISSING_PARAMETER: &str = "Deployment target is missing a required parameter";
/// A target parameter holds a value the platform does not understand.
pub const ERR_INVALID_PARAMETER: &str = "Deployment target has an invalid parameter";
/// Cloud credentials could not be resolved.
pub const ERR_CLOUD_AUTH: &str = "Failed to authenticate with cloud provider";
/// A pre-deployment health gate rejected the current state.
pub const ERR_UNHEALTHY: &str = "Deployment target is not healthy";
/// A cloud API call failed.
pub const ERR_CLOUD_CALL: &str = "Cloud provider request failed";
/// A remote command exceeded its time budget.
pub const ERR_REMOTE_TIMEOUT: &str = "Remote command timed out";
/// A remote command exited unsuccessfully.
pub const ERR_REMOTE_FAILURE: &str = "Remote command failed";
/// A remote command finished successfully.
pub const MSG_REMOTE_SUCCESS: &str = "Remote command completed";
/// The build platform only runs builds.
pub const ERR_BUILD_REQUIRED: &str = "Build platform requires a build";
/// A local build command exited unsuccessfully.
pub const ERR_BUILD_COMMAND: &str = "Build command failed";
/// A local build command exceeded its time budget.
pub const ERR_BUILD_TIMEOUT: &str = "Build command timed out";
/// Packaging the artifact failed.
pub const ERR_ARCHIVE: &str = "Failed to package deployment artifact";
/// The artifact source is missing from the workspace.
pub const ERR_MISSING_SOURCE: &str = "Deployment source not found in workspace";
/// A server failed its pre-transfer readiness check.
pub const ERR_SERVER_NOT_READY: &str = "Remote server is not ready for deployment";
/// The rsync transfer failed.
pub const ERR_RSYNC: &str = "Failed to transfer files with rsync";
/// The rsync transfer exceeded its time budget.
pub const ERR_RSYNC_TIMEOUT: &str = "File transfer with rsync timed out";
/// The per-job workspace could not be prepared.
pub const ERR_WORKSPACE: &str = "Failed to prepare job workspace";
/// An artifact was uploaded.
pub const MSG_UPLOADED: &str = "Artifact uploaded";
/// A tree was synchronised to object storage.
pub const MSG_SYNCED: &str = "Files synchronised";
/// A platform deployment was started.
pub const MSG_DEPLOY_STARTED: &str = "Deployment started";
/// The platform reported a successful deployment.
pub const MSG_DEPLOY_SUCCESS: &str = "Deployment finished successfully";
/// Waiting for a post-deployment state ran out of attempts.
pub const ERR_WAIT_TIMEOUT: &str = "Timed out waiting for deployment to finish";
/// The deployment finished in a state outside the allow-list.
pub const ERR_DEPLOY_FAILED: &str = "Deployment finished unsuccessfully";

/// Severity of an audit event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventLevel {
    /// Informational progress.
    Info,
    /// A step completed.
    Success,
    /// A step failed.
    Failure,
}

/// Coarse stage of the job, attached to every event.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Stage {
    /// Job resolved but not started.
    #[default]
    Created,
    /// Workspace and inputs are being prepared.
    Starting,
    /// The platform pipeline is executing.
    Running,
    /// Results are being recorded.
    Ending,
}

impl Stage {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Ending => "ending",
        }
    }
}

/// Sink for audit events.
pub trait EventLog: Send + Sync {
    /// Records one event.
    fn record(&self, level: EventLevel, message: &str, context: Value);

    /// Moves the job to `stage`.
    fn set_stage(&self, stage: Stage);

    /// Returns the current stage.
    fn stage(&self) -> Stage;

    /// Records an informational event.
    fn info(&self, message: &str, context: Value) {
        self.record(EventLevel::Info, message, context);
    }

    /// Records a success event.
    fn success(&self, message: &str, context: Value) {
        self.record(EventLevel::Success, message, context);
    }

    /// Records a failure event.
    fn failure(&self, message: &str, context: Value) {
        self.record(EventLevel::Failure, message, context);
    }
}

/// Emits audit events through `tracing`, tagged with the job id.
#[derive(Debug)]
pub struct TracingEventLog {
    job_id: String,
    stage: Mutex<Stage>,
}

impl TracingEventLog {
    /// Creates an event log for `job_id`.
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            stage: Mutex::new(Stage::default()),
        }
    }
}

impl EventLog for TracingEventLog {
    fn record(&self, level: EventLevel, message: &str, context: Value) {
        let stage = self.stage().as_str();
        match level {
            EventLevel::Info => {
                tracing::info!(job_id = %self.job_id, stage, %context, "{message}");
            }
            EventLevel::Success => {
                tracing::info!(
                    job_id = %self.job_id,
                    stage,
                    outcome = "success",
                    %context,
                    "{message}"
                );
            }
            EventLevel::Failure => {
                tracing::error!(
                    job_id = %self.job_id,
                    stage,
                    outcome = "failure",
                    %context,
                    "{message}"
                );
            }
        }
    }

    fn set_stage(&self, stage: Stage) {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner) = stage;
    }

    fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
