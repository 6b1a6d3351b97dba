//! Tests for single-job execution.

use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::events::{ERR_BUILD_COMMAND, ERR_INVALID_PLATFORM, MSG_SYNCED};
use crate::platform::Platforms;
use crate::store::MemoryStore;
use crate::test_support::{
    PlatformHarness, sample_build, sample_release, sample_target, with_parameters,
};

struct Fixture {
    harness: PlatformHarness,
    store: Arc<MemoryStore>,
    runner: JobRunner,
}

impl Fixture {
    fn workspace_root(&self) -> Utf8PathBuf {
        self.harness.scratch().join("jobs")
    }
}

#[fixture]
fn setup() -> Fixture {
    let harness = PlatformHarness::new();
    let store = Arc::new(MemoryStore::new());
    let runner = JobRunner::new(
        store.clone(),
        Dispatcher::new(Platforms::new(&harness.services), harness.events.clone()),
        harness.events.clone(),
        Arc::clone(harness.services.executor.sessions()),
        Arc::new(harness.runner.clone()),
        RunnerPaths {
            workspace_root: harness.scratch().join("jobs"),
            artifact_root: harness.properties.artifact_root.clone(),
            tar_bin: String::from("tar"),
        },
    );
    Fixture {
        harness,
        store,
        runner,
    }
}

fn write_artifact(setup: &Fixture, build_id: &str) {
    let root = &setup.harness.properties.artifact_root;
    std::fs::create_dir_all(root).expect("artifact root");
    std::fs::write(artifact_path(root, build_id), "tarball").expect("artifact");
}

#[rstest]
fn resolve_reports_missing_job(setup: Fixture) {
    assert_eq!(
        setup.runner.resolve("nope", JobKind::Build),
        Err(ResolveError::NotFound {
            id: String::from("nope")
        })
    );
}

#[rstest]
fn resolve_rejects_wrong_kind(setup: Fixture) {
    setup.store.insert_build(sample_build("b-1"));
    assert_eq!(
        setup.runner.resolve("b-1", JobKind::Release),
        Err(ResolveError::WrongKind {
            id: String::from("b-1"),
            expected: JobKind::Release,
            actual: JobKind::Build,
        })
    );
}

#[rstest]
#[case(JobStatus::Running)]
#[case(JobStatus::Success)]
#[case(JobStatus::Failure)]
fn resolve_rejects_jobs_that_are_not_pending(setup: Fixture, #[case] status: JobStatus) {
    let mut build = sample_build("b-1");
    build.status = status;
    setup.store.insert_build(build);

    assert_eq!(
        setup.runner.resolve("b-1", JobKind::Build),
        Err(ResolveError::WrongStatus {
            id: String::from("b-1"),
            status,
        })
    );
}

#[rstest]
#[tokio::test]
async fn successful_build_is_marked_success(setup: Fixture) {
    let mut build = sample_build("b-1");
    build.config.build = vec![String::from("make")];
    setup.store.insert_build(build);

    let outcome = setup
        .runner
        .run("b-1", JobKind::Build, &setup.harness.io)
        .await;

    assert_eq!(outcome, Ok(true));
    assert_eq!(setup.store.status_of("b-1"), Some(JobStatus::Success));
    assert_eq!(setup.harness.events.stage(), Stage::Ending);

    let shell = setup.harness.runner.invocations_of("sh");
    let make = shell.first().expect("build command");
    assert!(
        make.cwd
            .as_ref()
            .is_some_and(|cwd| cwd.starts_with(setup.workspace_root()))
    );
    assert_eq!(make.env_value("HAL_BUILDID"), Some("b-1"));
    let leftovers = std::fs::read_dir(setup.workspace_root())
        .expect("workspace root")
        .count();
    assert_eq!(leftovers, 0);
}

#[rstest]
#[tokio::test]
async fn failing_build_is_marked_failure(setup: Fixture) {
    setup.harness.runner.push_failure(2);
    let mut build = sample_build("b-1");
    build.config.build = vec![String::from("make")];
    setup.store.insert_build(build);

    let outcome = setup
        .runner
        .run("b-1", JobKind::Build, &setup.harness.io)
        .await;

    assert_eq!(outcome, Ok(false));
    assert_eq!(setup.store.status_of("b-1"), Some(JobStatus::Failure));
    assert!(setup.harness.events.has_failure(ERR_BUILD_COMMAND));
}

#[rstest]
#[tokio::test]
async fn release_without_artifact_fails_before_dispatch(setup: Fixture) {
    let target = with_parameters(sample_target("t-1", "s3"), &[("bucket", "site")]);
    setup
        .store
        .insert_release(sample_release("r-1", "b-1", Some(target)));

    let outcome = setup
        .runner
        .run("r-1", JobKind::Release, &setup.harness.io)
        .await;

    assert_eq!(outcome, Ok(false));
    assert_eq!(setup.store.status_of("r-1"), Some(JobStatus::Failure));
    let failure = setup.harness.events.find(ERR_WORKSPACE).expect("workspace failure");
    assert!(
        failure.context["error"]
            .as_str()
            .is_some_and(|text| text.contains("b-1.tar.gz"))
    );
    assert!(setup.harness.factory.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn release_unpacks_artifact_and_deploys(setup: Fixture) {
    write_artifact(&setup, "b-1");
    let target = with_parameters(
        sample_target("t-1", "s3"),
        &[("bucket", "site"), ("strategy", "sync")],
    );
    setup
        .store
        .insert_release(sample_release("r-1", "b-1", Some(target)));

    let outcome = setup
        .runner
        .run("r-1", JobKind::Release, &setup.harness.io)
        .await;

    assert_eq!(outcome, Ok(true));
    assert_eq!(setup.store.status_of("r-1"), Some(JobStatus::Success));
    let tar = setup.harness.runner.invocations_of("tar");
    let unpack = tar.first().expect("unpack");
    assert!(unpack.has_arg("-xzf"));
    assert!(setup.harness.events.find(MSG_SYNCED).is_some());
}

#[rstest]
#[tokio::test]
async fn release_without_target_has_no_platform(setup: Fixture) {
    write_artifact(&setup, "b-1");
    setup
        .store
        .insert_release(sample_release("r-1", "b-1", None));

    let outcome = setup
        .runner
        .run("r-1", JobKind::Release, &setup.harness.io)
        .await;

    assert_eq!(outcome, Ok(false));
    assert!(setup.harness.events.has_failure(ERR_INVALID_PLATFORM));
}

#[rstest]
#[tokio::test]
async fn unresolvable_job_leaves_store_untouched(setup: Fixture) {
    let mut build = sample_build("b-1");
    build.status = JobStatus::Success;
    setup.store.insert_build(build);

    let outcome = setup
        .runner
        .run("b-1", JobKind::Build, &setup.harness.io)
        .await;

    assert!(matches!(outcome, Err(ResolveError::WrongStatus { .. })));
    assert_eq!(setup.store.status_of("b-1"), Some(JobStatus::Success));
    assert!(setup.harness.runner.invocations().is_empty());
}

#[rstest]
fn platform_follows_job_kind() {
    let build = Job::Build(sample_build("b-1"));
    assert_eq!(platform_for(&build), LOCAL_PLATFORM);

    let target = sample_target("t-1", "codedeploy");
    let release = Job::Release(sample_release("r-1", "b-1", Some(target)));
    assert_eq!(platform_for(&release), "codedeploy");

    let orphan = Job::Release(sample_release("r-2", "b-1", None));
    assert_eq!(platform_for(&orphan), "");
}
