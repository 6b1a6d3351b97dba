//! Job and target persistence.
//!
//! [`JobStore`] is the agent's view of the job database: look jobs up,
//! move them through their statuses, and claim targets for releases.
//! [`JsonFileStore`] keeps everything in one JSON document on disk;
//! [`MemoryStore`] holds the same document in memory.

mod document;
mod json;
mod memory;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::model::{Job, JobKind, JobStatus, Target};

pub use document::StoreDocument;
pub use json::JsonFileStore;
pub use memory::MemoryStore;

/// Errors raised by job stores.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// The backing file could not be read or written.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The backing file is not a valid store document.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// No job has the given id.
    #[error("job {id} not found")]
    JobNotFound {
        /// Requested job id.
        id: String,
    },
    /// No target has the given id.
    #[error("target {id} not found")]
    TargetNotFound {
        /// Requested target id.
        id: String,
    },
}

/// Persistence operations used by the runner and the scheduler.
pub trait JobStore: Send + Sync {
    /// Looks up a build or release by id. Releases come back with their
    /// target attached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Lists pending jobs of `kind` in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn find_pending(&self, kind: JobKind) -> Result<Vec<Job>, StoreError>;

    /// Updates the status of job `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] for an unknown id, or an I/O
    /// error when the store cannot be written.
    fn set_status(&self, id: &str, status: JobStatus) -> Result<(), StoreError>;

    /// Records `job_id` as the target's current job.
    ///
    /// Returns `false` without changing anything when the target's last job
    /// is a different job that is still pending or running.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TargetNotFound`] for an unknown target, or an
    /// I/O error when the store cannot be written.
    fn claim_target(&self, target_id: &str, job_id: &str) -> Result<bool, StoreError>;

    /// Looks up a target by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn find_target(&self, id: &str) -> Result<Option<Target>, StoreError>;
}
