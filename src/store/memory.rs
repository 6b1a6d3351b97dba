//! In-memory store.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{JobStore, StoreDocument, StoreError};
use crate::model::{Build, Job, JobKind, JobStatus, Release, Target};

/// Store holding its document in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<StoreDocument>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `document`.
    #[must_use]
    pub fn with_document(document: StoreDocument) -> Self {
        Self {
            document: Mutex::new(document),
        }
    }

    /// Adds a build.
    pub fn insert_build(&self, build: Build) {
        self.lock().push_build(build);
    }

    /// Adds a release and its target.
    pub fn insert_release(&self, release: Release) {
        self.lock().push_release(release);
    }

    /// Adds or replaces a target.
    pub fn insert_target(&self, target: Target) {
        self.lock().upsert_target(target);
    }

    /// Current status of job `id`.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<JobStatus> {
        self.lock().status(id)
    }

    /// Copy of the whole document.
    #[must_use]
    pub fn snapshot(&self) -> StoreDocument {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for MemoryStore {
    fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().job(id))
    }

    fn find_pending(&self, kind: JobKind) -> Result<Vec<Job>, StoreError> {
        Ok(self.lock().pending(kind))
    }

    fn set_status(&self, id: &str, status: JobStatus) -> Result<(), StoreError> {
        self.lock().set_status(id, status)
    }

    fn claim_target(&self, target_id: &str, job_id: &str) -> Result<bool, StoreError> {
        self.lock().claim_target(target_id, job_id)
    }

    fn find_target(&self, id: &str) -> Result<Option<Target>, StoreError> {
        Ok(self.lock().target(id).cloned())
    }
}
