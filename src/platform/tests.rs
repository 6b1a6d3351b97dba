//! Tests for platform selection and shared pipeline helpers.

use rstest::{fixture, rstest};

use super::*;
use crate::events::{ERR_BUILD_REQUIRED, ERR_UNHEALTHY};
use crate::test_support::{
    PlatformHarness, sample_build, sample_release, sample_target, with_parameters,
};

#[fixture]
fn harness() -> PlatformHarness {
    PlatformHarness::new()
}

fn dispatcher(harness: &PlatformHarness) -> Dispatcher {
    Dispatcher::new(Platforms::new(&harness.services), harness.events.clone())
}

#[rstest]
#[case("local", Some(PlatformKind::Local))]
#[case(" LOCAL ", Some(PlatformKind::Local))]
#[case("rsync", Some(PlatformKind::Target(TargetKind::Rsync)))]
#[case("S3", Some(PlatformKind::Target(TargetKind::S3)))]
#[case("eb", Some(PlatformKind::Target(TargetKind::ElasticBeanstalk)))]
#[case("elb", Some(PlatformKind::Target(TargetKind::Elb)))]
#[case("heroku", None)]
#[case("", None)]
fn platform_kind_parses_type_tags(#[case] tag: &str, #[case] expected: Option<PlatformKind>) {
    assert_eq!(tag.parse::<PlatformKind>().ok(), expected);
}

#[rstest]
#[case(None, None, "")]
#[case(None, Some("dist"), "dist")]
#[case(Some("public"), Some("dist"), "public")]
#[case(Some("/public/"), None, "public/")]
#[case(Some("."), None, "")]
fn source_prefers_target_parameter(
    #[case] src: Option<&str>,
    #[case] dist: Option<&str>,
    #[case] expected: &str,
) {
    let properties = Properties {
        workspace: Utf8PathBuf::from("/work"),
        ..Properties::default()
    };
    let config = JobConfig {
        dist: dist.map(ToOwned::to_owned),
        ..JobConfig::default()
    };
    let target = src.map_or_else(
        || sample_target("t-1", "s3"),
        |value| with_parameters(sample_target("t-1", "s3"), &[("src", value)]),
    );
    let job = Job::Build(sample_build("b-1"));
    let io = crate::test_support::BufferedIo::new();
    let invocation = Invocation {
        job: &job,
        io: &io,
        config: &config,
        properties: &properties,
    };

    assert_eq!(
        invocation.source(Some(&target)),
        Utf8PathBuf::from("/work").join(expected)
    );
}

#[rstest]
#[case("", "a.txt", "a.txt")]
#[case("web", "a.txt", "web/a.txt")]
#[case("/web/", "css/a.css", "web/css/a.css")]
fn join_key_uses_single_separator(
    #[case] prefix: &str,
    #[case] relative: &str,
    #[case] expected: &str,
) {
    assert_eq!(join_key(prefix, relative), expected);
}

#[rstest]
fn artifact_metadata_describes_release() {
    let release = sample_release("r-9", "b-3", None);
    let metadata = artifact_metadata(&release);
    assert_eq!(metadata.get("release").map(String::as_str), Some("r-9"));
    assert_eq!(metadata.get("build").map(String::as_str), Some("b-3"));
    assert_eq!(metadata.get("application").map(String::as_str), Some("TestApp"));
    assert_eq!(metadata.get("commit").map(String::as_str), Some("0123abcd"));
}

#[rstest]
#[tokio::test]
async fn unknown_platform_is_rejected_without_running(harness: PlatformHarness) {
    let job = Job::Build(sample_build("b-1"));

    let ok = dispatcher(&harness)
        .invoke(
            &job,
            &harness.io,
            "heroku",
            job.config(),
            &harness.properties,
        )
        .await;

    assert!(!ok);
    let failure = harness
        .events
        .find(ERR_INVALID_PLATFORM)
        .expect("invalid platform");
    assert_eq!(failure.context["platform"], "heroku");
    assert_eq!(harness.events.stage(), Stage::Created);
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn local_platform_runs_build_in_running_stage(harness: PlatformHarness) {
    let mut build = sample_build("b-1");
    build.config.build = vec![String::from("make")];
    let job = Job::Build(build);

    let ok = dispatcher(&harness)
        .invoke(&job, &harness.io, LOCAL_PLATFORM, job.config(), &harness.properties)
        .await;

    assert!(ok);
    assert_eq!(harness.events.stage(), Stage::Running);
    assert_eq!(harness.runner.invocations_of("sh").len(), 1);
}

#[rstest]
#[tokio::test]
async fn release_on_local_platform_fails(harness: PlatformHarness) {
    let job = Job::Release(sample_release("r-1", "b-1", None));

    let ok = dispatcher(&harness)
        .invoke(&job, &harness.io, "local", job.config(), &harness.properties)
        .await;

    assert!(!ok);
    assert!(harness.events.has_failure(ERR_BUILD_REQUIRED));
}

#[rstest]
#[tokio::test]
async fn failed_gate_stops_every_later_step(harness: PlatformHarness) {
    harness.cloud.state().group_status = Some(String::from("InProgress"));
    let target = with_parameters(
        sample_target("t-cd", "codedeploy"),
        &[("application", "app"), ("group", "fleet"), ("bucket", "b")],
    );
    let job = Job::Release(sample_release("r-1", "b-1", Some(target)));

    let ok = dispatcher(&harness)
        .invoke(&job, &harness.io, "codedeploy", job.config(), &harness.properties)
        .await;

    assert!(!ok);
    assert_eq!(harness.events.failures().len(), 1);
    assert!(harness.events.has_failure(ERR_UNHEALTHY));
    let state = harness.cloud.state();
    assert!(state.uploads.is_empty());
    assert!(state.deployments.is_empty());
    drop(state);
    assert!(harness.runner.invocations().is_empty());
}
