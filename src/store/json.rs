//! Store backed by a single JSON file.

use std::fs::{File, OpenOptions};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use fs2::FileExt;

use super::{JobStore, StoreDocument, StoreError};
use crate::model::{Job, JobKind, JobStatus, Target};

/// Reads and rewrites one JSON document per operation.
///
/// Writes go to a sibling temp file that is renamed over the document, so
/// readers in other processes never see a partial file. Every
/// read-modify-write holds an exclusive lock on the sibling
/// `.<name>.lock` file, so writers in any process or thread are serialised.
#[derive(Debug)]
pub struct JsonFileStore {
    path: Utf8PathBuf,
}

impl JsonFileStore {
    /// Creates a store for `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads the whole document. A missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be read or parsed.
    pub fn load(&self) -> Result<StoreDocument, StoreError> {
        let (dir, file_name) = self.open_parent(false)?;
        let Some(dir) = dir else {
            return Ok(StoreDocument::default());
        };
        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(StoreDocument::default());
            }
            Err(err) => return Err(self.io_error(&err)),
        };
        if contents.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    /// Replaces the whole document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the document cannot be written.
    pub fn save(&self, document: &StoreDocument) -> Result<(), StoreError> {
        let (dir, file_name) = self.open_parent(true)?;
        let dir = dir.ok_or_else(|| StoreError::Io {
            path: self.path.clone(),
            message: String::from("parent directory is missing"),
        })?;
        let rendered = serde_json::to_string_pretty(document).map_err(|err| StoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        let temp_name = format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4());
        dir.write(&temp_name, rendered.as_bytes())
            .map_err(|err| self.io_error(&err))?;
        dir.rename(&temp_name, &dir, file_name).map_err(|err| {
            dir.remove_file(&temp_name).ok();
            self.io_error(&err)
        })
    }

    fn update<T>(
        &self,
        change: impl FnOnce(&mut StoreDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _held = self.lock()?;
        let mut document = self.load()?;
        let value = change(&mut document)?;
        self.save(&document)?;
        Ok(value)
    }

    /// Blocks until this process holds the update lock. Dropping the file
    /// releases it.
    fn lock(&self) -> Result<File, StoreError> {
        let (_dir, file_name) = self.open_parent(true)?;
        let lock_path = self.path.with_file_name(format!(".{file_name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|err| StoreError::Io {
                path: lock_path.clone(),
                message: err.to_string(),
            })?;
        file.lock_exclusive().map_err(|err| StoreError::Io {
            path: lock_path,
            message: err.to_string(),
        })?;
        Ok(file)
    }

    fn open_parent(&self, create: bool) -> Result<(Option<Dir>, &str), StoreError> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = self.path.file_name().ok_or_else(|| StoreError::Io {
            path: self.path.clone(),
            message: String::from("store path is missing a filename"),
        })?;
        if create {
            Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
                StoreError::Io {
                    path: parent.to_path_buf(),
                    message: err.to_string(),
                }
            })?;
        }
        match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => Ok((Some(dir), file_name)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok((None, file_name)),
            Err(err) => Err(StoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    fn io_error(&self, err: &io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

impl JobStore for JsonFileStore {
    fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.load()?.job(id))
    }

    fn find_pending(&self, kind: JobKind) -> Result<Vec<Job>, StoreError> {
        Ok(self.load()?.pending(kind))
    }

    fn set_status(&self, id: &str, status: JobStatus) -> Result<(), StoreError> {
        self.update(|document| document.set_status(id, status))
    }

    fn claim_target(&self, target_id: &str, job_id: &str) -> Result<bool, StoreError> {
        self.update(|document| document.claim_target(target_id, job_id))
    }

    fn find_target(&self, id: &str) -> Result<Option<Target>, StoreError> {
        Ok(self.load()?.target(id).cloned())
    }
}
