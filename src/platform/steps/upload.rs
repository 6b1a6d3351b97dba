//! Uploading artifacts and synchronising trees to object storage.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::cloud::{RemoteObject, S3Api};
use crate::events::{
    ERR_CLOUD_CALL, ERR_MISSING_SOURCE, ERR_OBJECT_EXISTS, EventLog, MSG_SYNCED, MSG_UPLOADED,
};
use crate::platform::join_key;

/// Whether an upload may replace an existing object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OverwritePolicy {
    /// Replace existing objects.
    Allow,
    /// Fail when the key already exists, without uploading.
    Refuse,
}

/// Uploads a single artifact with metadata.
pub struct ArtifactUploader {
    events: Arc<dyn EventLog>,
    policy: OverwritePolicy,
}

impl ArtifactUploader {
    /// Creates an uploader with the given overwrite policy.
    #[must_use]
    pub fn new(events: Arc<dyn EventLog>, policy: OverwritePolicy) -> Self {
        Self { events, policy }
    }

    /// Uploads `file` to `bucket/key`.
    pub async fn upload(
        &self,
        s3: &dyn S3Api,
        file: &Utf8Path,
        bucket: &str,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> bool {
        if self.policy == OverwritePolicy::Refuse {
            match s3.object_exists(bucket, key).await {
                Ok(false) => {}
                Ok(true) => {
                    self.events
                        .failure(ERR_OBJECT_EXISTS, json!({"bucket": bucket, "key": key}));
                    return false;
                }
                Err(err) => {
                    self.cloud_failure("object_exists", bucket, key, &err.to_string());
                    return false;
                }
            }
        }

        if let Err(err) = s3.put_object(file, bucket, key, metadata).await {
            self.cloud_failure("put_object", bucket, key, &err.to_string());
            return false;
        }
        self.events.success(
            MSG_UPLOADED,
            json!({"bucket": bucket, "key": key, "metadata": metadata}),
        );
        true
    }

    fn cloud_failure(&self, operation: &str, bucket: &str, key: &str, error: &str) {
        self.events.failure(
            ERR_CLOUD_CALL,
            json!({"operation": operation, "bucket": bucket, "key": key, "error": error}),
        );
    }
}

/// A file found under a sync source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalFile {
    /// Path relative to the source root, `/`-separated.
    pub relative: String,
    /// Absolute path.
    pub path: Utf8PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Transfers needed to make a prefix match a local tree.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncPlan {
    /// Files to upload with their destination keys.
    pub uploads: Vec<(LocalFile, String)>,
    /// Remote keys to delete.
    pub deletions: Vec<String>,
    /// Files already up to date.
    pub unchanged: usize,
}

/// Walks `root` and returns every regular file, sorted by relative path.
///
/// # Errors
///
/// Returns an I/O error when a directory or file cannot be inspected.
pub fn collect_local_files(root: &Utf8Path) -> io::Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for item in dir.read_dir_utf8()? {
            let path = item?.path().to_path_buf();
            let metadata = path.metadata()?;
            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            if !metadata.is_file() {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map(|rel| {
                    rel.components()
                        .map(|component| component.as_str())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_else(|_| path.to_string());
            files.push(LocalFile {
                relative,
                size: metadata.len(),
                modified: DateTime::<Utc>::from(metadata.modified()?),
                path,
            });
        }
    }
    files.sort_by(|left, right| left.relative.cmp(&right.relative));
    Ok(files)
}

/// Compares a local tree with the objects under `prefix`.
///
/// A file is uploaded when its key is missing remotely, its size differs,
/// or it was modified after the remote copy. With `remove_extra`, remote
/// keys under `prefix/` with no local file are deleted. Keys that merely
/// share the prefix as a string, such as `site-backup/` for `site`, are
/// left alone.
#[must_use]
pub fn plan_sync(
    local: &[LocalFile],
    remote: &[RemoteObject],
    prefix: &str,
    remove_extra: bool,
) -> SyncPlan {
    let remote_by_key: HashMap<&str, &RemoteObject> = remote
        .iter()
        .map(|object| (object.key.as_str(), object))
        .collect();
    let mut plan = SyncPlan::default();
    let mut local_keys = Vec::with_capacity(local.len());

    for file in local {
        let key = join_key(prefix, &file.relative);
        let changed = remote_by_key.get(key.as_str()).is_none_or(|object| {
            object.size != file.size || file.modified > object.last_modified
        });
        if changed {
            plan.uploads.push((file.clone(), key.clone()));
        } else {
            plan.unchanged += 1;
        }
        local_keys.push(key);
    }

    if remove_extra {
        let scope = join_key(prefix, "");
        plan.deletions = remote
            .iter()
            .filter(|object| object.key.starts_with(&scope))
            .filter(|object| !local_keys.contains(&object.key))
            .map(|object| object.key.clone())
            .collect();
    }
    plan
}

/// Incrementally mirrors a directory into a bucket prefix.
pub struct SyncUploader {
    events: Arc<dyn EventLog>,
}

impl SyncUploader {
    /// Creates a sync uploader.
    #[must_use]
    pub fn new(events: Arc<dyn EventLog>) -> Self {
        Self { events }
    }

    /// Uploads new and changed files from `source` and optionally removes
    /// remote-only keys.
    pub async fn sync(
        &self,
        s3: &dyn S3Api,
        source: &Utf8Path,
        bucket: &str,
        prefix: &str,
        remove_extra: bool,
    ) -> bool {
        let local = match collect_local_files(source) {
            Ok(files) => files,
            Err(err) => {
                self.events.failure(
                    ERR_MISSING_SOURCE,
                    json!({"path": source.as_str(), "error": err.to_string()}),
                );
                return false;
            }
        };
        let remote = match s3.list_objects(bucket, &join_key(prefix, "")).await {
            Ok(objects) => objects,
            Err(err) => {
                self.cloud_failure("list_objects", bucket, prefix, &err.to_string());
                return false;
            }
        };

        let plan = plan_sync(&local, &remote, prefix, remove_extra);
        tracing::info!(
            bucket,
            prefix,
            uploads = plan.uploads.len(),
            deletions = plan.deletions.len(),
            unchanged = plan.unchanged,
            "sync planned"
        );

        let no_metadata = BTreeMap::new();
        for (file, key) in &plan.uploads {
            if let Err(err) = s3.put_object(&file.path, bucket, key, &no_metadata).await {
                self.cloud_failure("put_object", bucket, key, &err.to_string());
                return false;
            }
        }
        for key in &plan.deletions {
            if let Err(err) = s3.delete_object(bucket, key).await {
                self.cloud_failure("delete_object", bucket, key, &err.to_string());
                return false;
            }
        }

        self.events.success(
            MSG_SYNCED,
            json!({
                "bucket": bucket,
                "prefix": prefix,
                "uploaded": plan.uploads.len(),
                "deleted": plan.deletions.len(),
                "unchanged": plan.unchanged,
            }),
        );
        true
    }

    fn cloud_failure(&self, operation: &str, bucket: &str, key: &str, error: &str) {
        self.events.failure(
            ERR_CLOUD_CALL,
            json!({"operation": operation, "bucket": bucket, "key": key, "error": error}),
        );
    }
}
