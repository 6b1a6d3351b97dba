//! Exclusive lock held for the length of one worker pass.

use std::fs::{File, OpenOptions};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;

use super::SchedulerError;
use crate::model::JobKind;

/// Proof that no other pass over the same job kind is running.
///
/// The lock lives in a hidden file beside the state document and is
/// released when the value is dropped, including when the process dies.
#[derive(Debug)]
pub struct PassLock {
    path: Utf8PathBuf,
    // Held for its flock; released on drop.
    _file: File,
}

impl PassLock {
    /// Lock file guarding passes over `kind` for the store at `state_file`.
    #[must_use]
    pub fn path_for(state_file: &Utf8Path, kind: JobKind) -> Utf8PathBuf {
        let name = state_file.file_name().unwrap_or("hal-agent");
        state_file.with_file_name(format!(".{name}.worker-{kind}.lock"))
    }

    /// Takes the lock at `path` without blocking. Returns `None` while
    /// another pass holds it.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Lock`] when the lock file cannot be
    /// created or locked for a reason other than contention.
    pub fn try_acquire(path: &Utf8Path) -> Result<Option<Self>, SchedulerError> {
        let lock_error = |err: io::Error| SchedulerError::Lock {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(lock_error)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(lock_error)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                path: path.to_path_buf(),
                _file: file,
            })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(lock_error(err)),
        }
    }

    /// Path of the held lock file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}
