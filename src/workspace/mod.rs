//! Per-job scratch directories.
//!
//! Every job runs in a fresh directory under the configured workspace root.
//! Builds copy their checked-out source into it; releases unpack the build
//! artifact into it. The directory is removed when the job finishes.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use thiserror::Error;

use crate::process::{CommandRequest, CommandRunner};

/// Location of the artifact produced by build `build_id`.
#[must_use]
pub fn artifact_path(artifact_root: &Utf8Path, build_id: &str) -> Utf8PathBuf {
    artifact_root.join(format!("{build_id}.tar.gz"))
}

/// Errors raised while preparing a workspace.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WorkspaceError {
    /// The scratch directory could not be created.
    #[error("failed to create workspace under {root}: {message}")]
    Create {
        /// Workspace root.
        root: String,
        /// Underlying error.
        message: String,
    },
    /// The build artifact a release needs does not exist.
    #[error("build artifact {path} not found")]
    MissingArtifact {
        /// Expected artifact path.
        path: String,
    },
    /// Unpacking the artifact failed.
    #[error("failed to unpack {path}: {message}")]
    Unpack {
        /// Artifact path.
        path: String,
        /// Error output from `tar`.
        message: String,
    },
    /// Copying the build source failed.
    #[error("failed to copy source {path}: {message}")]
    Copy {
        /// Source directory.
        path: String,
        /// Underlying error.
        message: String,
    },
    /// Removing the scratch directory failed.
    #[error("failed to remove workspace {path}: {message}")]
    Remove {
        /// Workspace path.
        path: String,
        /// Underlying error.
        message: String,
    },
}

/// A scratch directory owned by one job.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
    path: Utf8PathBuf,
}

impl JobWorkspace {
    /// Creates `root/job-<id>-XXXX`, creating `root` first when needed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Create`] when the directory cannot be made
    /// or its path is not UTF-8.
    pub fn create(root: &Utf8Path, job_id: &str) -> Result<Self, WorkspaceError> {
        let create_error = |message: String| WorkspaceError::Create {
            root: root.to_string(),
            message,
        };
        std::fs::create_dir_all(root).map_err(|err| create_error(err.to_string()))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{job_id}-"))
            .tempdir_in(root)
            .map_err(|err| create_error(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|path| create_error(format!("non UTF-8 path {}", path.display())))?;
        Ok(Self { dir, path })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Copies the tree at `source` into the workspace.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Copy`] when any entry cannot be copied.
    pub fn copy_source(&self, source: &Utf8Path) -> Result<(), WorkspaceError> {
        copy_tree(source, &self.path).map_err(|err| WorkspaceError::Copy {
            path: source.to_string(),
            message: err.to_string(),
        })
    }

    /// Extracts the gzipped tarball at `artifact` into the workspace.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::MissingArtifact`] when the file does not
    /// exist, or [`WorkspaceError::Unpack`] when `tar` fails.
    pub async fn unpack(
        &self,
        runner: &dyn CommandRunner,
        tar_bin: &str,
        artifact: &Utf8Path,
    ) -> Result<(), WorkspaceError> {
        if !artifact.is_file() {
            return Err(WorkspaceError::MissingArtifact {
                path: artifact.to_string(),
            });
        }
        let request = CommandRequest::new(tar_bin)
            .arg("-xzf")
            .arg(artifact.as_str())
            .arg("-C")
            .arg(self.path.as_str());
        let unpack_error = |message: String| WorkspaceError::Unpack {
            path: artifact.to_string(),
            message,
        };
        let output = runner
            .run(&request)
            .await
            .map_err(|err| unpack_error(err.to_string()))?;
        if !output.is_success() {
            return Err(unpack_error(format!(
                "{}: {}",
                output.status_text(),
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Removes the directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Remove`] when deletion fails.
    pub fn close(self) -> Result<(), WorkspaceError> {
        let path = self.path.to_string();
        self.dir.close().map_err(|err| WorkspaceError::Remove {
            path,
            message: err.to_string(),
        })
    }
}

fn copy_tree(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    for item in from.read_dir_utf8()? {
        let entry = item?;
        let destination = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            std::fs::create_dir_all(&destination)?;
            copy_tree(entry.path(), &destination)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}
