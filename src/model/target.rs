//! Deployment targets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Credential;

/// A named deployment destination.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Target {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Platform type tag such as `rsync` or `codedeploy`. Kept as text so an
    /// unsupported tag reaches the dispatcher instead of failing to load.
    #[serde(rename = "type")]
    pub kind: String,
    /// Flat platform parameters (bucket, region, paths, ...).
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Credential used for cloud platforms.
    #[serde(default)]
    pub credential: Option<Credential>,
    /// Most recent job dispatched to this target.
    #[serde(default)]
    pub last_job: Option<String>,
}

impl Target {
    /// Returns a trimmed, non-empty parameter value.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Returns a parameter interpreted as a boolean flag.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.parameter(key).is_some_and(|value| {
            matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
        })
    }
}

/// Supported deployment platforms.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TargetKind {
    /// Rsync to one or more servers over SSH.
    Rsync,
    /// Artifact upload or tree sync to an S3 bucket.
    S3,
    /// AWS CodeDeploy deployment group.
    CodeDeploy,
    /// AWS Elastic Beanstalk environment.
    ElasticBeanstalk,
    /// Swap between an active and a passive classic load balancer.
    Elb,
}

impl TargetKind {
    /// Canonical type tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rsync => "rsync",
            Self::S3 => "s3",
            Self::CodeDeploy => "codedeploy",
            Self::ElasticBeanstalk => "elasticbeanstalk",
            Self::Elb => "elb",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rsync" => Ok(Self::Rsync),
            "s3" => Ok(Self::S3),
            "codedeploy" => Ok(Self::CodeDeploy),
            "elasticbeanstalk" | "eb" => Ok(Self::ElasticBeanstalk),
            "elb" => Ok(Self::Elb),
            other => Err(other.to_owned()),
        }
    }
}
