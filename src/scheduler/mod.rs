//! Worker scheduler: one subprocess per pending job.
//!
//! A pass has two halves. [`WorkerScheduler::execute`] reads the pending
//! jobs of one kind, claims release targets, and spawns a runner process
//! for each job it accepts. [`WorkerScheduler::wait`] then polls the
//! processes until every one has exited or been killed for running past the
//! job timeout. One job's failure never stops the pass.

mod lock;
mod subprocess;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::time::sleep;

use crate::model::{Job, JobKind, JobStatus};
use crate::store::{JobStore, StoreError};

pub use lock::PassLock;
pub use subprocess::SubprocessSpawner;

/// Runner subcommand for jobs of `kind`.
#[must_use]
pub const fn runner_command(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Build => "runner:build",
        JobKind::Release => "runner:deploy",
    }
}

/// Errors that stop a scheduling pass.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Pending jobs could not be listed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The pass lock file could not be opened or locked.
    #[error("cannot lock {path}: {message}")]
    Lock {
        /// Lock file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        message: String,
    },
}

/// Exit state and captured output of a finished worker.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProcessExit {
    /// Whether the worker exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Handle to a running worker.
pub trait WorkerProcess: Send {
    /// Returns the exit state once the worker has finished.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the process state cannot be read.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Stops the worker and returns whatever output it produced.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the process cannot be stopped.
    fn kill(&mut self) -> io::Result<ProcessExit>;
}

/// Starts worker processes.
pub trait WorkerSpawner: Send + Sync {
    /// Starts the runner for job `job_id` of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the worker cannot be started.
    fn spawn(&self, kind: JobKind, job_id: &str) -> io::Result<Box<dyn WorkerProcess>>;
}

/// A worker tracked by the current pass.
pub struct WorkerProcessRecord {
    /// Job the worker runs.
    pub job_id: String,
    /// Target claimed for the job, when it is a release.
    pub target_id: Option<String>,
    /// When the worker was started.
    pub started: Instant,
    process: Box<dyn WorkerProcess>,
}

/// How a tracked worker ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerResult {
    /// Exit status zero.
    Succeeded,
    /// Non-zero exit, signal, or lost process.
    Failed,
    /// Killed after exceeding the job timeout.
    TimedOut,
}

/// Final state of one worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerOutcome {
    /// Job the worker ran.
    pub job_id: String,
    /// How it ended.
    pub result: WorkerResult,
    /// Exit code and captured output.
    pub exit: ProcessExit,
}

/// What [`WorkerScheduler::execute`] did with the pending jobs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecuteSummary {
    /// Workers started.
    pub spawned: usize,
    /// Releases left pending because their target is busy.
    pub skipped: usize,
    /// Jobs marked failed without a worker.
    pub rejected: usize,
}

enum Scheduled {
    Spawned,
    Skipped,
    Rejected,
}

/// Runs pending jobs of one kind as supervised subprocesses.
pub struct WorkerScheduler {
    store: Arc<dyn JobStore>,
    spawner: Arc<dyn WorkerSpawner>,
    kind: JobKind,
    job_timeout: Duration,
    poll_interval: Duration,
    workers: Vec<WorkerProcessRecord>,
}

impl WorkerScheduler {
    /// Creates a scheduler for jobs of `kind`.
    #[must_use]
    pub const fn new(
        store: Arc<dyn JobStore>,
        spawner: Arc<dyn WorkerSpawner>,
        kind: JobKind,
        job_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            spawner,
            kind,
            job_timeout,
            poll_interval,
            workers: Vec::new(),
        }
    }

    /// Workers still being supervised.
    #[must_use]
    pub fn workers(&self) -> &[WorkerProcessRecord] {
        &self.workers
    }

    /// Runs one full pass: schedule, then wait for every worker.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] when pending jobs cannot be listed.
    pub async fn run(&mut self) -> Result<Vec<WorkerOutcome>, SchedulerError> {
        let summary = self.execute()?;
        tracing::info!(
            kind = %self.kind,
            spawned = summary.spawned,
            skipped = summary.skipped,
            rejected = summary.rejected,
            "scheduling pass started"
        );
        Ok(self.wait().await)
    }

    /// Spawns a worker for every runnable pending job.
    ///
    /// Releases without a target are marked failed. A release whose target
    /// is claimed by another active job is skipped and stays pending.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] when pending jobs cannot be listed.
    /// Store errors for a single job are logged and the job is skipped.
    pub fn execute(&mut self) -> Result<ExecuteSummary, SchedulerError> {
        let jobs = self.store.find_pending(self.kind)?;
        let mut summary = ExecuteSummary::default();
        for job in &jobs {
            match self.schedule(job) {
                Ok(Scheduled::Spawned) => summary.spawned += 1,
                Ok(Scheduled::Skipped) => summary.skipped += 1,
                Ok(Scheduled::Rejected) => summary.rejected += 1,
                Err(err) => {
                    tracing::error!(job_id = job.id(), error = %err, "failed to schedule job");
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }

    fn schedule(&mut self, job: &Job) -> Result<Scheduled, StoreError> {
        let target_id = match job {
            Job::Build(_) => None,
            Job::Release(release) => {
                let Some(target) = release.target.as_ref() else {
                    tracing::warn!(
                        job_id = %release.id,
                        "release has no target, marking it failed"
                    );
                    self.store.set_status(&release.id, JobStatus::Failure)?;
                    return Ok(Scheduled::Rejected);
                };
                if !self.store.claim_target(&target.id, &release.id)? {
                    tracing::info!(
                        job_id = %release.id,
                        target_id = %target.id,
                        "target is busy with another job, skipping"
                    );
                    return Ok(Scheduled::Skipped);
                }
                Some(target.id.clone())
            }
        };

        match self.spawner.spawn(self.kind, job.id()) {
            Ok(process) => {
                tracing::info!(
                    job_id = job.id(),
                    command = runner_command(self.kind),
                    "worker spawned"
                );
                self.workers.push(WorkerProcessRecord {
                    job_id: job.id().to_owned(),
                    target_id,
                    started: Instant::now(),
                    process,
                });
                Ok(Scheduled::Spawned)
            }
            Err(err) => {
                tracing::error!(job_id = job.id(), error = %err, "failed to spawn worker");
                self.store.set_status(job.id(), JobStatus::Failure)?;
                Ok(Scheduled::Rejected)
            }
        }
    }

    /// Polls every worker until none remain, sleeping between rounds.
    pub async fn wait(&mut self) -> Vec<WorkerOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let mut remaining = Vec::with_capacity(self.workers.len());
            for mut worker in std::mem::take(&mut self.workers) {
                match self.poll(&mut worker) {
                    Some(outcome) => outcomes.push(outcome),
                    None => remaining.push(worker),
                }
            }
            self.workers = remaining;
            if self.workers.is_empty() {
                return outcomes;
            }
            sleep(self.poll_interval).await;
        }
    }

    fn poll(&self, worker: &mut WorkerProcessRecord) -> Option<WorkerOutcome> {
        let job_id = worker.job_id.as_str();
        match worker.process.try_wait() {
            Ok(Some(exit)) => {
                let result = if exit.is_success() {
                    tracing::info!(job_id, stdout = %exit.stdout.trim_end(), "job succeeded");
                    WorkerResult::Succeeded
                } else {
                    tracing::error!(
                        job_id,
                        code = ?exit.code,
                        stdout = %exit.stdout.trim_end(),
                        stderr = %exit.stderr.trim_end(),
                        "job failed"
                    );
                    self.fail_if_active(job_id);
                    WorkerResult::Failed
                };
                return Some(WorkerOutcome {
                    job_id: job_id.to_owned(),
                    result,
                    exit,
                });
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(job_id, error = %err, "lost track of worker");
                let exit = worker.process.kill().unwrap_or_default();
                self.fail_if_active(job_id);
                return Some(WorkerOutcome {
                    job_id: job_id.to_owned(),
                    result: WorkerResult::Failed,
                    exit,
                });
            }
        }

        if worker.started.elapsed() < self.job_timeout {
            return None;
        }
        let exit = worker.process.kill().unwrap_or_else(|err| {
            tracing::warn!(job_id, error = %err, "failed to kill timed out worker");
            ProcessExit::default()
        });
        tracing::error!(
            job_id,
            timeout_secs = self.job_timeout.as_secs(),
            stdout = %exit.stdout.trim_end(),
            stderr = %exit.stderr.trim_end(),
            "job timed out"
        );
        self.fail_if_active(job_id);
        Some(WorkerOutcome {
            job_id: job_id.to_owned(),
            result: WorkerResult::TimedOut,
            exit,
        })
    }

    /// Marks a job failed when its worker died before recording a result.
    fn fail_if_active(&self, job_id: &str) {
        let active = match self.store.find_job(job_id) {
            Ok(job) => job.is_some_and(|found| found.status().is_active()),
            Err(err) => {
                tracing::warn!(job_id, error = %err, "failed to read job status");
                return;
            }
        };
        if active && let Err(err) = self.store.set_status(job_id, JobStatus::Failure) {
            tracing::warn!(job_id, error = %err, "failed to mark job failed");
        }
    }
}

#[cfg(test)]
mod tests;
