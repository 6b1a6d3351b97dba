//! Tests for the load balancer swap.

use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::events::{ERR_CLOUD_CALL, ERR_MISSING_PARAMETER, ERR_RELEASE_REQUIRED};
use crate::model::Job;
use crate::test_support::{
    PlatformHarness, sample_build, sample_release, sample_target, with_parameters,
};

#[fixture]
fn harness() -> PlatformHarness {
    let harness = PlatformHarness::new();
    harness.cloud.set_balancer("live", &["i-1", "i-2"], "InService");
    harness.cloud.set_balancer("standby", &["i-3", "i-4"], "InService");
    harness
}

fn pipeline(harness: &PlatformHarness) -> ElbPipeline {
    ElbPipeline::new(harness.services.clone())
        .with_promotion_waiter(Waiter::new(Duration::ZERO, 2))
}

fn elb_job(parameters: &[(&str, &str)]) -> Job {
    let target = with_parameters(sample_target("t-elb", "elb"), parameters);
    Job::Release(sample_release("r-1", "b-1", Some(target)))
}

fn swap_job() -> Job {
    elb_job(&[("elb", "live"), ("elb_passive", "standby")])
}

fn call(operation: &str, balancer: &str, ids: &[&str]) -> (String, String, Vec<String>) {
    (
        operation.to_owned(),
        balancer.to_owned(),
        ids.iter().map(|id| (*id).to_owned()).collect(),
    )
}

#[rstest]
#[tokio::test]
async fn swaps_passive_instances_into_service(harness: PlatformHarness) {
    let job = swap_job();

    assert!(pipeline(&harness).invoke(harness.invocation(&job)).await);

    assert_eq!(
        harness.cloud.state().elb_calls,
        [
            call("register", "live", &["i-3", "i-4"]),
            call("register", "standby", &["i-1", "i-2"]),
            call("deregister", "live", &["i-1", "i-2"]),
            call("deregister", "standby", &["i-3", "i-4"]),
        ]
    );
    assert_eq!(harness.cloud.balancer_instances("live"), ["i-3", "i-4"]);
    assert_eq!(harness.cloud.balancer_instances("standby"), ["i-1", "i-2"]);
    let success = harness.events.find(MSG_DEPLOY_SUCCESS).expect("success");
    assert_eq!(success.context["balancer"], "live");
}

#[rstest]
#[tokio::test]
async fn empty_active_balancer_only_promotes(harness: PlatformHarness) {
    harness.cloud.set_balancer("live", &[], "InService");
    let job = swap_job();

    assert!(pipeline(&harness).invoke(harness.invocation(&job)).await);

    assert_eq!(
        harness.cloud.state().elb_calls,
        [
            call("register", "live", &["i-3", "i-4"]),
            call("deregister", "standby", &["i-3", "i-4"]),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn unhealthy_passive_instance_blocks_swap(harness: PlatformHarness) {
    harness
        .cloud
        .set_balancer("standby", &["i-3"], "OutOfService");
    let job = swap_job();

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness.events.find(ERR_UNHEALTHY).expect("unhealthy");
    assert_eq!(failure.context["instances"][0]["state"], "OutOfService");
    assert!(harness.cloud.state().elb_calls.is_empty());
}

#[rstest]
#[tokio::test]
async fn empty_passive_balancer_is_unhealthy(harness: PlatformHarness) {
    harness.cloud.set_balancer("standby", &[], "InService");
    let job = swap_job();

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);
    assert!(harness.events.has_failure(ERR_UNHEALTHY));
}

#[rstest]
#[tokio::test]
async fn promotion_timeout_leaves_old_instances_active(harness: PlatformHarness) {
    harness.cloud.state().register_state = Some(String::from("OutOfService"));
    let job = swap_job();

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness.events.find(ERR_WAIT_TIMEOUT).expect("timeout");
    assert_eq!(failure.context["attempts"], 2);
    assert_eq!(
        harness.cloud.state().elb_calls,
        [call("register", "live", &["i-3", "i-4"])]
    );
}

#[rstest]
#[tokio::test]
async fn register_failure_is_a_cloud_error(harness: PlatformHarness) {
    harness.cloud.fail("register_instances");
    let job = swap_job();

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness.events.find(ERR_CLOUD_CALL).expect("cloud failure");
    assert_eq!(failure.context["operation"], "register_instances");
}

#[rstest]
#[tokio::test]
async fn same_balancer_twice_is_rejected(harness: PlatformHarness) {
    let job = elb_job(&[("elb", "live"), ("elb_passive", "live")]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);
    assert!(harness.events.has_failure(ERR_INVALID_PARAMETER));
    assert!(harness.factory.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn passive_balancer_is_required(harness: PlatformHarness) {
    let job = elb_job(&[("elb", "live")]);

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);

    let failure = harness
        .events
        .find(ERR_MISSING_PARAMETER)
        .expect("missing parameter");
    assert_eq!(failure.context["parameter"], "elb_passive");
}

#[rstest]
#[tokio::test]
async fn builds_are_rejected(harness: PlatformHarness) {
    let job = Job::Build(sample_build("b-1"));

    assert!(!pipeline(&harness).invoke(harness.invocation(&job)).await);
    assert!(harness.events.has_failure(ERR_RELEASE_REQUIRED));
}
