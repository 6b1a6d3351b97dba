//! Cloud service ports used by the AWS pipelines.
//!
//! Each service the pipelines touch is a small trait returning boxed
//! futures, so pipelines can run against the AWS CLI adapter in production
//! and in-memory fakes in tests. [`CloudClientFactory`] resolves a region
//! and credential into a bundle of clients.

mod aws;
mod types;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use camino::Utf8Path;
use thiserror::Error;

use crate::model::Credential;

pub use aws::{AwsCli, AwsCliFactory};
pub use types::{BundleType, DeploymentRequest, EnvironmentStatus, InstanceHealth, RemoteObject};

/// Errors raised by cloud clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Credentials could not be resolved or were rejected.
    #[error("cloud authentication failed: {message}")]
    Auth {
        /// Provider or adapter message.
        message: String,
    },
    /// The client program could not be run.
    #[error("failed to run {operation}: {message}")]
    Command {
        /// API operation name.
        operation: String,
        /// Underlying error string.
        message: String,
    },
    /// The provider rejected the request.
    #[error("{operation} failed with status {status_text}: {stderr}")]
    Request {
        /// API operation name.
        operation: String,
        /// Human readable exit status.
        status_text: String,
        /// Provider error output.
        stderr: String,
    },
    /// The response could not be understood.
    #[error("failed to parse {operation} response: {message}")]
    Parse {
        /// API operation name.
        operation: String,
        /// Parser error string.
        message: String,
    },
    /// The response lacked an expected resource.
    #[error("{operation} returned no {resource}")]
    NotFound {
        /// API operation name.
        operation: String,
        /// Missing resource description.
        resource: String,
    },
}

/// Future returned by cloud client methods.
pub type CloudFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CloudError>> + Send + 'a>>;

/// Object storage operations.
pub trait S3Api: Send + Sync {
    /// Whether `bucket/key` exists.
    fn object_exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> CloudFuture<'a, bool>;

    /// Uploads `file` to `bucket/key` with user metadata, overwriting any
    /// existing object.
    fn put_object<'a>(
        &'a self,
        file: &'a Utf8Path,
        bucket: &'a str,
        key: &'a str,
        metadata: &'a BTreeMap<String, String>,
    ) -> CloudFuture<'a, ()>;

    /// Lists every object under `prefix`.
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> CloudFuture<'a, Vec<RemoteObject>>;

    /// Deletes `bucket/key`.
    fn delete_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> CloudFuture<'a, ()>;
}

/// CodeDeploy operations.
pub trait CodeDeployApi: Send + Sync {
    /// Status of the group's most recent deployment, or `None` when the
    /// group has never deployed.
    fn deployment_group_status<'a>(
        &'a self,
        application: &'a str,
        group: &'a str,
    ) -> CloudFuture<'a, Option<String>>;

    /// Starts a deployment and returns its id.
    fn create_deployment<'a>(&'a self, request: &'a DeploymentRequest) -> CloudFuture<'a, String>;

    /// Current status of a deployment.
    fn deployment_status<'a>(&'a self, deployment_id: &'a str) -> CloudFuture<'a, String>;
}

/// Elastic Beanstalk operations.
pub trait BeanstalkApi: Send + Sync {
    /// Status and health of an environment.
    fn environment_status<'a>(
        &'a self,
        application: &'a str,
        environment: &'a str,
    ) -> CloudFuture<'a, EnvironmentStatus>;

    /// Registers an application version from an uploaded bundle.
    fn create_application_version<'a>(
        &'a self,
        application: &'a str,
        version: &'a str,
        description: &'a str,
        bucket: &'a str,
        key: &'a str,
    ) -> CloudFuture<'a, ()>;

    /// Deploys `version` to `environment`.
    fn update_environment<'a>(
        &'a self,
        application: &'a str,
        environment: &'a str,
        version: &'a str,
    ) -> CloudFuture<'a, ()>;
}

/// Classic load balancer operations.
pub trait ElbApi: Send + Sync {
    /// Health of every instance registered with `load_balancer`.
    fn instance_health<'a>(
        &'a self,
        load_balancer: &'a str,
    ) -> CloudFuture<'a, Vec<InstanceHealth>>;

    /// Adds instances to `load_balancer`.
    fn register_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [String],
    ) -> CloudFuture<'a, ()>;

    /// Removes instances from `load_balancer`.
    fn deregister_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [String],
    ) -> CloudFuture<'a, ()>;
}

/// Clients resolved for one region and credential.
#[derive(Clone)]
pub struct CloudClients {
    /// Object storage.
    pub s3: Arc<dyn S3Api>,
    /// CodeDeploy.
    pub codedeploy: Arc<dyn CodeDeployApi>,
    /// Elastic Beanstalk.
    pub beanstalk: Arc<dyn BeanstalkApi>,
    /// Classic load balancing.
    pub elb: Arc<dyn ElbApi>,
}

/// Resolves clients for a region and optional credential.
pub trait CloudClientFactory: Send + Sync {
    /// Builds clients. Role credentials are exchanged for session keys here,
    /// so authentication failures surface before any pipeline side effect.
    fn clients<'a>(
        &'a self,
        region: &'a str,
        credential: Option<&'a Credential>,
    ) -> CloudFuture<'a, CloudClients>;
}
