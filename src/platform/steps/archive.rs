//! Packaging a workspace into one upload artifact.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use tempfile::TempDir;

use crate::events::{ERR_ARCHIVE, EventLog};
use crate::process::{CommandRequest, CommandRunner};

/// Archive format chosen from the destination's extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveFormat {
    /// `.zip`, built with `zip`.
    Zip,
    /// `.tar`, built with `tar`.
    Tar,
    /// `.tar.gz`, `.tgz`, or anything unrecognised, built with `tar -z`.
    TarGz,
}

impl ArchiveFormat {
    /// Picks the format for `destination`.
    #[must_use]
    pub fn from_destination(destination: &Utf8Path) -> Self {
        let name = destination
            .file_name()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.ends_with(".zip") {
            Self::Zip
        } else if name.ends_with(".tar") {
            Self::Tar
        } else {
            Self::TarGz
        }
    }
}

/// Artifact packaged into a private scratch directory. The directory is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct ScratchArtifact {
    _dir: TempDir,
    path: Utf8PathBuf,
}

impl ScratchArtifact {
    /// Packaged file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Produces a single artifact from a file or directory.
pub struct Compressor {
    runner: Arc<dyn CommandRunner>,
    events: Arc<dyn EventLog>,
    tar_bin: String,
    zip_bin: String,
}

impl Compressor {
    /// Creates a compressor using the given programs.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        events: Arc<dyn EventLog>,
        tar_bin: impl Into<String>,
        zip_bin: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            events,
            tar_bin: tar_bin.into(),
            zip_bin: zip_bin.into(),
        }
    }

    /// Packages `source` into `destination`.
    ///
    /// A single file is copied as-is. A directory is archived in the format
    /// implied by `destination`'s extension, with paths relative to the
    /// directory.
    pub async fn compress(&self, source: &Utf8Path, destination: &Utf8Path) -> bool {
        if let Some(parent) = destination.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            self.fail(source, destination, &err.to_string(), None);
            return false;
        }

        if source.is_file() {
            return match tokio::fs::copy(source, destination).await {
                Ok(_) => true,
                Err(err) => {
                    self.fail(source, destination, &err.to_string(), None);
                    false
                }
            };
        }

        let request = match ArchiveFormat::from_destination(destination) {
            ArchiveFormat::Zip => CommandRequest::new(&self.zip_bin)
                .args(["-r", "-q", "-y"])
                .arg(destination.as_str())
                .arg(".")
                .current_dir(source),
            ArchiveFormat::Tar => CommandRequest::new(&self.tar_bin)
                .arg("-cf")
                .arg(destination.as_str())
                .args(["-C", source.as_str(), "."]),
            ArchiveFormat::TarGz => CommandRequest::new(&self.tar_bin)
                .arg("-czf")
                .arg(destination.as_str())
                .args(["-C", source.as_str(), "."]),
        };

        match self.runner.run(&request).await {
            Ok(output) if output.is_success() => {
                tracing::debug!(%source, %destination, "artifact packaged");
                true
            }
            Ok(output) => {
                self.fail(source, destination, &output.stderr, output.code);
                false
            }
            Err(err) => {
                self.fail(source, destination, &err.to_string(), None);
                false
            }
        }
    }

    /// Packages `source` into a scratch file named after the last segment
    /// of the object key it will be uploaded to, so the key's extension
    /// picks the archive format.
    pub async fn compress_to_scratch(
        &self,
        source: &Utf8Path,
        key: &str,
    ) -> Option<ScratchArtifact> {
        let name = key
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("artifact.tar.gz");
        let dir = match tempfile::Builder::new().prefix("hal-agent-artifact-").tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                self.fail(source, Utf8Path::new(name), &err.to_string(), None);
                return None;
            }
        };
        let Some(root) = Utf8Path::from_path(dir.path()) else {
            self.fail(source, Utf8Path::new(name), "scratch path is not UTF-8", None);
            return None;
        };
        let path = root.join(name);
        if !self.compress(source, &path).await {
            return None;
        }
        Some(ScratchArtifact { _dir: dir, path })
    }

    fn fail(&self, source: &Utf8Path, destination: &Utf8Path, error: &str, code: Option<i32>) {
        self.events.failure(
            ERR_ARCHIVE,
            json!({
                "source": source.as_str(),
                "destination": destination.as_str(),
                "errorOutput": error,
                "exitCode": code,
            }),
        );
    }
}
