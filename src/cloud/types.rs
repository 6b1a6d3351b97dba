//! Values exchanged with cloud clients.

use chrono::{DateTime, Utc};

/// An object listed from a bucket.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteObject {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// Load balancer view of one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHealth {
    /// EC2 instance id.
    pub instance_id: String,
    /// State such as `InService` or `OutOfService`.
    pub state: String,
}

impl InstanceHealth {
    /// State reported for healthy instances.
    pub const IN_SERVICE: &'static str = "InService";

    /// Whether the instance is receiving traffic.
    #[must_use]
    pub fn is_in_service(&self) -> bool {
        self.state == Self::IN_SERVICE
    }
}

/// Elastic Beanstalk environment state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EnvironmentStatus {
    /// Lifecycle status such as `Ready` or `Updating`.
    pub status: String,
    /// Health colour such as `Green` or `Red`.
    pub health: String,
}

/// Archive format of a CodeDeploy revision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BundleType {
    /// Zip archive.
    Zip,
    /// Gzipped tarball.
    Tgz,
    /// Plain tarball.
    Tar,
}

impl BundleType {
    /// Infers the bundle type from an object key, ignoring case. A plain
    /// `.tar` is sent as `tar` since CodeDeploy accepts it as is. Unknown
    /// extensions fall back to `tgz`.
    #[must_use]
    pub fn detect(key: &str) -> Self {
        let lower = key.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Self::Zip
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else {
            Self::Tgz
        }
    }

    /// Name used by the CodeDeploy API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tgz => "tgz",
            Self::Tar => "tar",
        }
    }
}

/// Parameters for a CodeDeploy deployment from S3.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentRequest {
    /// CodeDeploy application.
    pub application: String,
    /// Deployment group.
    pub group: String,
    /// Deployment configuration, or the group default when `None`.
    pub configuration: Option<String>,
    /// Bucket holding the revision.
    pub bucket: String,
    /// Key of the revision.
    pub key: String,
    /// Revision archive format.
    pub bundle_type: BundleType,
    /// Free-form description.
    pub description: String,
}
