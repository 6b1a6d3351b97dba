//! AWS CLI adapter for the cloud ports.
//!
//! Every call runs `aws <service> <operation> ... --region <r> --output json`
//! through the shared [`CommandRunner`], with credentials supplied in the
//! child environment.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::Arc;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{
    BeanstalkApi, CloudClientFactory, CloudClients, CloudError, CloudFuture, CodeDeployApi,
    DeploymentRequest, ElbApi, EnvironmentStatus, InstanceHealth, RemoteObject, S3Api,
};
use crate::model::Credential;
use crate::process::{CommandOutput, CommandRequest, CommandRunner};

const ROLE_SESSION_NAME: &str = "hal-agent";

/// Cloud client that drives the `aws` program.
#[derive(Clone)]
pub struct AwsCli {
    runner: Arc<dyn CommandRunner>,
    aws_bin: String,
    region: String,
    env: Vec<(String, String)>,
}

impl AwsCli {
    /// Creates a client for `region` using the agent's ambient credentials.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        aws_bin: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            aws_bin: aws_bin.into(),
            region: region.into(),
            env: Vec::new(),
        }
    }

    /// Uses explicit keys instead of ambient credentials.
    #[must_use]
    pub fn with_keys(
        mut self,
        access_key: &str,
        secret_key: &str,
        session_token: Option<&str>,
    ) -> Self {
        self.env = vec![
            (String::from("AWS_ACCESS_KEY_ID"), access_key.to_owned()),
            (String::from("AWS_SECRET_ACCESS_KEY"), secret_key.to_owned()),
        ];
        if let Some(token) = session_token {
            self.env
                .push((String::from("AWS_SESSION_TOKEN"), token.to_owned()));
        }
        self
    }

    fn request(&self, service: &str, operation: &str, args: Vec<OsString>) -> CommandRequest {
        CommandRequest::new(&self.aws_bin)
            .args([service, operation])
            .args(args)
            .args(["--region", self.region.as_str(), "--output", "json"])
            .envs(self.env.iter().cloned())
    }

    async fn call(
        &self,
        service: &str,
        operation: &str,
        args: Vec<OsString>,
    ) -> Result<CommandOutput, CloudError> {
        let request = self.request(service, operation, args);
        let output = self
            .runner
            .run(&request)
            .await
            .map_err(|err| CloudError::Command {
                operation: format!("{service} {operation}"),
                message: err.to_string(),
            })?;
        tracing::debug!(
            service,
            operation,
            region = %self.region,
            code = ?output.code,
            "aws call finished"
        );
        Ok(output)
    }

    async fn call_checked(
        &self,
        service: &str,
        operation: &str,
        args: Vec<OsString>,
    ) -> Result<String, CloudError> {
        let output = self.call(service, operation, args).await?;
        check_output(output, &format!("{service} {operation}")).map(|out| out.stdout)
    }

    async fn call_json<T>(
        &self,
        service: &str,
        operation: &str,
        args: Vec<OsString>,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned,
    {
        let stdout = self.call_checked(service, operation, args).await?;
        parse_json(&stdout, &format!("{service} {operation}"))
    }
}

fn check_output(output: CommandOutput, operation: &str) -> Result<CommandOutput, CloudError> {
    if output.is_success() {
        return Ok(output);
    }
    Err(CloudError::Request {
        operation: operation.to_owned(),
        status_text: if output.timed_out {
            String::from("timeout")
        } else {
            output.status_text()
        },
        stderr: output.stderr.trim().to_owned(),
    })
}

fn parse_json<T: DeserializeOwned>(stdout: &str, operation: &str) -> Result<T, CloudError> {
    let body = if stdout.trim().is_empty() { "{}" } else { stdout };
    serde_json::from_str(body).map_err(|err| CloudError::Parse {
        operation: operation.to_owned(),
        message: err.to_string(),
    })
}

fn os(values: &[&str]) -> Vec<OsString> {
    values.iter().map(OsString::from).collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsResponse {
    #[serde(default)]
    contents: Vec<S3Object>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3Object {
    key: String,
    size: u64,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentGroupResponse {
    deployment_group_info: DeploymentGroupInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentGroupInfo {
    #[serde(default)]
    last_attempted_deployment: Option<DeploymentSummary>,
}

#[derive(Debug, Deserialize)]
struct DeploymentSummary {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDeploymentResponse {
    deployment_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetDeploymentResponse {
    deployment_info: DeploymentSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeEnvironmentsResponse {
    #[serde(default)]
    environments: Vec<BeanstalkEnvironment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BeanstalkEnvironment {
    status: String,
    #[serde(default)]
    health: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceHealthResponse {
    #[serde(default)]
    instance_states: Vec<InstanceState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceState {
    instance_id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    credentials: SessionCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
}

impl S3Api for AwsCli {
    fn object_exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> CloudFuture<'a, bool> {
        Box::pin(async move {
            let output = self
                .call("s3api", "head-object", os(&["--bucket", bucket, "--key", key]))
                .await?;
            if output.is_success() {
                return Ok(true);
            }
            if output.stderr.contains("404") || output.stderr.contains("Not Found") {
                return Ok(false);
            }
            check_output(output, "s3api head-object").map(|_| false)
        })
    }

    fn put_object<'a>(
        &'a self,
        file: &'a Utf8Path,
        bucket: &'a str,
        key: &'a str,
        metadata: &'a BTreeMap<String, String>,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let mut args = os(&["--bucket", bucket, "--key", key, "--body", file.as_str()]);
            if !metadata.is_empty() {
                let encoded = serde_json::to_string(metadata).map_err(|err| CloudError::Parse {
                    operation: String::from("s3api put-object"),
                    message: err.to_string(),
                })?;
                args.push(OsString::from("--metadata"));
                args.push(OsString::from(encoded));
            }
            self.call_checked("s3api", "put-object", args).await.map(|_| ())
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> CloudFuture<'a, Vec<RemoteObject>> {
        Box::pin(async move {
            let response: ListObjectsResponse = self
                .call_json(
                    "s3api",
                    "list-objects-v2",
                    os(&["--bucket", bucket, "--prefix", prefix]),
                )
                .await?;
            Ok(response
                .contents
                .into_iter()
                .map(|object| RemoteObject {
                    key: object.key,
                    size: object.size,
                    last_modified: object.last_modified,
                })
                .collect())
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.call_checked("s3api", "delete-object", os(&["--bucket", bucket, "--key", key]))
                .await
                .map(|_| ())
        })
    }
}

impl CodeDeployApi for AwsCli {
    fn deployment_group_status<'a>(
        &'a self,
        application: &'a str,
        group: &'a str,
    ) -> CloudFuture<'a, Option<String>> {
        Box::pin(async move {
            let response: DeploymentGroupResponse = self
                .call_json(
                    "deploy",
                    "get-deployment-group",
                    os(&[
                        "--application-name",
                        application,
                        "--deployment-group-name",
                        group,
                    ]),
                )
                .await?;
            Ok(response
                .deployment_group_info
                .last_attempted_deployment
                .and_then(|summary| summary.status))
        })
    }

    fn create_deployment<'a>(&'a self, request: &'a DeploymentRequest) -> CloudFuture<'a, String> {
        Box::pin(async move {
            let location = format!(
                "bucket={},key={},bundleType={}",
                request.bucket,
                request.key,
                request.bundle_type.as_str()
            );
            let mut args = os(&[
                "--application-name",
                &request.application,
                "--deployment-group-name",
                &request.group,
                "--description",
                &request.description,
                "--s3-location",
                &location,
            ]);
            if let Some(configuration) = &request.configuration {
                args.push(OsString::from("--deployment-config-name"));
                args.push(OsString::from(configuration));
            }
            let response: CreateDeploymentResponse =
                self.call_json("deploy", "create-deployment", args).await?;
            Ok(response.deployment_id)
        })
    }

    fn deployment_status<'a>(&'a self, deployment_id: &'a str) -> CloudFuture<'a, String> {
        Box::pin(async move {
            let response: GetDeploymentResponse = self
                .call_json("deploy", "get-deployment", os(&["--deployment-id", deployment_id]))
                .await?;
            response
                .deployment_info
                .status
                .ok_or_else(|| CloudError::NotFound {
                    operation: String::from("deploy get-deployment"),
                    resource: String::from("deployment status"),
                })
        })
    }
}

impl BeanstalkApi for AwsCli {
    fn environment_status<'a>(
        &'a self,
        application: &'a str,
        environment: &'a str,
    ) -> CloudFuture<'a, EnvironmentStatus> {
        Box::pin(async move {
            let response: DescribeEnvironmentsResponse = self
                .call_json(
                    "elasticbeanstalk",
                    "describe-environments",
                    os(&[
                        "--application-name",
                        application,
                        "--environment-names",
                        environment,
                    ]),
                )
                .await?;
            response
                .environments
                .into_iter()
                .next()
                .map(|env| EnvironmentStatus {
                    status: env.status,
                    health: env.health,
                })
                .ok_or_else(|| CloudError::NotFound {
                    operation: String::from("elasticbeanstalk describe-environments"),
                    resource: format!("environment {environment}"),
                })
        })
    }

    fn create_application_version<'a>(
        &'a self,
        application: &'a str,
        version: &'a str,
        description: &'a str,
        bucket: &'a str,
        key: &'a str,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let bundle = format!("S3Bucket={bucket},S3Key={key}");
            self.call_checked(
                "elasticbeanstalk",
                "create-application-version",
                os(&[
                    "--application-name",
                    application,
                    "--version-label",
                    version,
                    "--description",
                    description,
                    "--source-bundle",
                    &bundle,
                ]),
            )
            .await
            .map(|_| ())
        })
    }

    fn update_environment<'a>(
        &'a self,
        application: &'a str,
        environment: &'a str,
        version: &'a str,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.call_checked(
                "elasticbeanstalk",
                "update-environment",
                os(&[
                    "--application-name",
                    application,
                    "--environment-name",
                    environment,
                    "--version-label",
                    version,
                ]),
            )
            .await
            .map(|_| ())
        })
    }
}

impl ElbApi for AwsCli {
    fn instance_health<'a>(
        &'a self,
        load_balancer: &'a str,
    ) -> CloudFuture<'a, Vec<InstanceHealth>> {
        Box::pin(async move {
            let response: InstanceHealthResponse = self
                .call_json(
                    "elb",
                    "describe-instance-health",
                    os(&["--load-balancer-name", load_balancer]),
                )
                .await?;
            Ok(response
                .instance_states
                .into_iter()
                .map(|state| InstanceHealth {
                    instance_id: state.instance_id,
                    state: state.state,
                })
                .collect())
        })
    }

    fn register_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [String],
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let mut args = os(&["--load-balancer-name", load_balancer, "--instances"]);
            args.extend(instance_ids.iter().map(OsString::from));
            self.call_checked("elb", "register-instances-with-load-balancer", args)
                .await
                .map(|_| ())
        })
    }

    fn deregister_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [String],
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let mut args = os(&["--load-balancer-name", load_balancer, "--instances"]);
            args.extend(instance_ids.iter().map(OsString::from));
            self.call_checked("elb", "deregister-instances-from-load-balancer", args)
                .await
                .map(|_| ())
        })
    }
}

/// Builds [`AwsCli`] clients, assuming roles through `aws sts`.
#[derive(Clone)]
pub struct AwsCliFactory {
    runner: Arc<dyn CommandRunner>,
    aws_bin: String,
}

impl AwsCliFactory {
    /// Creates a factory that runs `aws_bin`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, aws_bin: impl Into<String>) -> Self {
        Self {
            runner,
            aws_bin: aws_bin.into(),
        }
    }

    async fn assume_role(
        &self,
        region: &str,
        account_id: &str,
        role: &str,
    ) -> Result<SessionCredentials, CloudError> {
        let ambient = AwsCli::new(Arc::clone(&self.runner), &self.aws_bin, region);
        let role_arn = format!("arn:aws:iam::{account_id}:role/{role}");
        let response: AssumeRoleResponse = ambient
            .call_json(
                "sts",
                "assume-role",
                os(&["--role-arn", &role_arn, "--role-session-name", ROLE_SESSION_NAME]),
            )
            .await
            .map_err(|err| CloudError::Auth {
                message: format!("assume role {role_arn}: {err}"),
            })?;
        Ok(response.credentials)
    }
}

impl CloudClientFactory for AwsCliFactory {
    fn clients<'a>(
        &'a self,
        region: &'a str,
        credential: Option<&'a Credential>,
    ) -> CloudFuture<'a, CloudClients> {
        Box::pin(async move {
            let base = AwsCli::new(Arc::clone(&self.runner), &self.aws_bin, region);
            let client = match credential {
                None => base,
                Some(Credential::AwsStatic {
                    access_key,
                    secret_key,
                }) => base.with_keys(access_key, secret_key, None),
                Some(Credential::AwsRole { account_id, role }) => {
                    let session = self.assume_role(region, account_id, role).await?;
                    base.with_keys(
                        &session.access_key_id,
                        &session.secret_access_key,
                        Some(&session.session_token),
                    )
                }
                Some(Credential::PrivateKey { .. } | Credential::PrivateKeyFile { .. }) => {
                    return Err(CloudError::Auth {
                        message: String::from("credential is not an AWS credential"),
                    });
                }
            };
            let client = Arc::new(client);
            Ok(CloudClients {
                s3: client.clone(),
                codedeploy: client.clone(),
                beanstalk: client.clone(),
                elb: client,
            })
        })
    }
}
