//! Tests for the CodeDeploy platform.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use rstest::{fixture, rstest};

use super::*;
use crate::events::{ERR_OBJECT_EXISTS, ERR_RELEASE_REQUIRED};
use crate::model::Job;
use crate::test_support::{
    PlatformHarness, sample_build, sample_release, sample_target, with_parameters,
};

#[fixture]
fn harness() -> PlatformHarness {
    PlatformHarness::new()
}

fn pipeline(harness: &PlatformHarness) -> CodeDeployPipeline {
    CodeDeployPipeline::new(harness.services.clone())
        .with_verifier(Waiter::new(Duration::ZERO, 3).with_progress_every(2))
}

fn codedeploy_job(extra: &[(&str, &str)]) -> Job {
    let target = with_parameters(
        sample_target("t-cd", "codedeploy"),
        &[
            ("application", "web-app"),
            ("group", "web-fleet"),
            ("bucket", "bundles"),
        ],
    );
    Job::Release(sample_release(
        "r-1",
        "b-1",
        Some(with_parameters(target, extra)),
    ))
}

fn queue_statuses(harness: &PlatformHarness, statuses: &[&str]) {
    harness.cloud.state().deployment_statuses =
        statuses.iter().map(|status| (*status).to_owned()).collect::<VecDeque<_>>();
}

#[rstest]
#[tokio::test]
async fn deploys_bundle_and_waits_for_success(harness: PlatformHarness) {
    queue_statuses(&harness, &["InProgress", "InProgress", "Succeeded"]);
    let job = codedeploy_job(&[("configuration", "CodeDeployDefault.OneAtATime")]);

    assert!(pipeline(&harness).invoke(harness.invocation(&job)).await);

    let state = harness.cloud.state();
    assert_eq!(
        state.uploads,
        [(String::from("bundles"), String::from("1234/TestApp-r-1.tar.gz"))]
    );
    let deployment = state.deployments.first().expect("deployment");
    assert_eq!(deployment.application, "web-app");
    assert_eq!(deployment.group, "web-fleet");
    assert_eq!(
        deployment.configuration.as_deref(),
        Some("CodeDeployDefault.OneAtATime")
    );
    assert_eq!(deployment.bundle_type, BundleType::Tgz);
    drop(state);

    let started = harness.events.find(MSG_DEPLOY_STARTED).expect("started");
    assert_eq!(started.context["deploymentId"], "d-1");
    assert!(harness.events.find(MSG_DEPLOY_SUCCESS).is_some());
    assert!(harness.io.contains("Deployment d-1 is InProgress"));
}

#[rstest]
#[case("Succeeded", true, None)]
#[case("Ready", true, None)]
#[case("Failed", false, Some(ERR_DEPLOY_FAILED))]
#[case("Stopped", false, Some(ERR_DEPLOY_FAILED))]
#[case("InProgress", false, Some(ERR_WAIT_TIMEOUT))]
#[tokio::test]
async fn terminal_status_decides_outcome(
    harness: PlatformHarness,
    #[case] status: &str,
    #[case] expected: bool,
    #[case] failure: Option<&str>,
) {
    queue_statuses(&harness, &[status]);
    let job = codedeploy_job(&[]);

    assert_eq!(pipeline(&harness).invoke(harness.invocation(&job)).await, expected);

    match failure {
        Some(message) => assert!(harness.events.has_failure(message)),
        None => assert!(harness.events.failures().is_empty()),
    }
}

#[rstest]
#[tokio::test]
async fn wait_timeout_reports_attempts(harness: PlatformHarness) {
    queue_statuses(&harness, &["InProgress"]);
    let job = codedeploy_job(&[]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness.events.find(ERR_WAIT_TIMEOUT).expect("timeout");
    assert_eq!(failure.context["attempts"], 3);
}

#[rstest]
#[case(Some("InProgress"))]
#[case(Some("Queued"))]
#[tokio::test]
async fn busy_group_blocks_deployment(harness: PlatformHarness, #[case] status: Option<&str>) {
    harness.cloud.state().group_status = status.map(ToOwned::to_owned);
    let job = codedeploy_job(&[]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    assert!(harness.events.has_failure(ERR_UNHEALTHY));
    let state = harness.cloud.state();
    assert!(state.uploads.is_empty());
    assert!(state.deployments.is_empty());
    drop(state);
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[case(None)]
#[case(Some("Failed"))]
#[tokio::test]
async fn settled_group_allows_deployment(harness: PlatformHarness, #[case] status: Option<&str>) {
    harness.cloud.state().group_status = status.map(ToOwned::to_owned);
    let job = codedeploy_job(&[]);

    assert!(pipeline(&harness).invoke(harness.invocation(&job)).await);
}

#[rstest]
#[tokio::test]
async fn existing_bundle_is_never_overwritten(harness: PlatformHarness) {
    harness
        .cloud
        .insert_object("bundles", "1234/TestApp-r-1.tar.gz", 10, Utc::now());
    let job = codedeploy_job(&[]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    assert!(harness.events.has_failure(ERR_OBJECT_EXISTS));
    let state = harness.cloud.state();
    assert!(state.uploads.is_empty());
    assert!(state.deployments.is_empty());
}

#[rstest]
#[tokio::test]
async fn zip_key_selects_zip_bundle(harness: PlatformHarness) {
    let job = codedeploy_job(&[("path", "$APP/$DATE-$TIME.zip")]);

    assert!(pipeline(&harness).invoke(harness.invocation(&job)).await);

    let state = harness.cloud.state();
    let deployment = state.deployments.first().expect("deployment");
    assert_eq!(deployment.key, "TestApp/20180307-121530.zip");
    assert_eq!(deployment.bundle_type, BundleType::Zip);
}

#[rstest]
#[tokio::test]
async fn builds_are_rejected(harness: PlatformHarness) {
    let job = Job::Build(sample_build("b-1"));

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);
    assert!(harness.events.has_failure(ERR_RELEASE_REQUIRED));
    assert!(harness.factory.requests().is_empty());
}
