//! Tests for the Elastic Beanstalk platform.

use std::collections::VecDeque;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::events::ERR_CLOUD_CALL;
use crate::model::Job;
use crate::test_support::{PlatformHarness, sample_release, sample_target, with_parameters};

#[fixture]
fn harness() -> PlatformHarness {
    PlatformHarness::new()
}

fn pipeline(harness: &PlatformHarness) -> BeanstalkPipeline {
    BeanstalkPipeline::new(harness.services.clone())
        .with_verifier(Waiter::new(Duration::ZERO, 4).with_progress_every(1))
}

fn beanstalk_job(extra: &[(&str, &str)]) -> Job {
    let target = with_parameters(
        sample_target("t-eb", "elasticbeanstalk"),
        &[
            ("application", "eb-app"),
            ("environment", "eb-env"),
            ("bucket", "bundles"),
        ],
    );
    Job::Release(sample_release(
        "r-1",
        "b-1",
        Some(with_parameters(target, extra)),
    ))
}

fn queue_states(harness: &PlatformHarness, states: &[(&str, &str)]) {
    harness.cloud.state().environment_statuses = states
        .iter()
        .map(|(status, health)| EnvironmentStatus {
            status: (*status).to_owned(),
            health: (*health).to_owned(),
        })
        .collect::<VecDeque<_>>();
}

#[rstest]
#[tokio::test]
async fn deploys_new_version_and_waits_for_green(harness: PlatformHarness) {
    queue_states(
        &harness,
        &[("Ready", "Green"), ("Updating", "Grey"), ("Ready", "Green")],
    );
    let job = beanstalk_job(&[]);

    assert!(pipeline(&harness).invoke(harness.invocation(&job)).await);

    let state = harness.cloud.state();
    assert_eq!(
        state.versions,
        [(
            String::from("eb-app"),
            String::from("TestApp-r-1"),
            String::from("bundles"),
            String::from("1234/TestApp-r-1.zip"),
        )]
    );
    assert_eq!(
        state.environment_updates,
        [(String::from("eb-env"), String::from("TestApp-r-1"))]
    );
    drop(state);
    assert_eq!(harness.runner.invocations_of("zip").len(), 1);
    assert!(harness.events.find(MSG_DEPLOY_SUCCESS).is_some());
    assert!(harness.io.contains("Environment eb-env is Updating (Grey)"));
}

#[rstest]
#[tokio::test]
async fn version_label_template_is_rendered(harness: PlatformHarness) {
    let job = beanstalk_job(&[("version", "v-$BUILDID-$DATE")]);

    assert!(pipeline(&harness).invoke(harness.invocation(&job)).await);

    assert_eq!(
        harness.cloud.state().environment_updates,
        [(String::from("eb-env"), String::from("v-b-1-20180307"))]
    );
}

#[rstest]
#[case("Ready", "Red")]
#[case("Updating", "Green")]
#[case("Terminated", "Grey")]
#[tokio::test]
async fn unhealthy_environment_blocks_deployment(
    harness: PlatformHarness,
    #[case] status: &str,
    #[case] health: &str,
) {
    queue_states(&harness, &[(status, health)]);
    let job = beanstalk_job(&[]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness.events.find(ERR_UNHEALTHY).expect("unhealthy");
    assert_eq!(failure.context["status"], status);
    let state = harness.cloud.state();
    assert!(state.uploads.is_empty());
    assert!(state.versions.is_empty());
}

#[rstest]
#[case("Yellow")]
#[case("Grey")]
#[tokio::test]
async fn degraded_environment_still_accepts_deployment(
    harness: PlatformHarness,
    #[case] health: &str,
) {
    queue_states(&harness, &[("Ready", health), ("Ready", "Green")]);
    let job = beanstalk_job(&[]);

    assert!(pipeline(&harness).invoke(harness.invocation(&job)).await);
}

#[rstest]
#[tokio::test]
async fn ready_but_not_green_is_a_failed_deployment(harness: PlatformHarness) {
    queue_states(&harness, &[("Ready", "Green"), ("Ready", "Red")]);
    let job = beanstalk_job(&[]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness.events.find(ERR_DEPLOY_FAILED).expect("failed");
    assert_eq!(failure.context["health"], "Red");
}

#[rstest]
#[tokio::test]
async fn environment_that_never_settles_times_out(harness: PlatformHarness) {
    queue_states(&harness, &[("Ready", "Green"), ("Updating", "Grey")]);
    let job = beanstalk_job(&[]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness.events.find(ERR_WAIT_TIMEOUT).expect("timeout");
    assert_eq!(failure.context["attempts"], 4);
}

#[rstest]
#[tokio::test]
async fn version_creation_failure_skips_update(harness: PlatformHarness) {
    harness.cloud.fail("create_application_version");
    let job = beanstalk_job(&[]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness.events.find(ERR_CLOUD_CALL).expect("cloud failure");
    assert_eq!(failure.context["operation"], "create_application_version");
    assert!(harness.cloud.state().environment_updates.is_empty());
}
