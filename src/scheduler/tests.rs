//! Tests for the worker scheduler.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rstest::rstest;

use super::*;
use crate::store::MemoryStore;
use crate::test_support::{sample_build, sample_release, sample_target};

#[derive(Clone)]
enum Script {
    ExitAfter(u32, ProcessExit),
    Hang(ProcessExit),
}

struct FakeProcess {
    script: Script,
    polls: u32,
    killed: Arc<Mutex<Vec<String>>>,
    job_id: String,
}

impl WorkerProcess for FakeProcess {
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        self.polls += 1;
        match &self.script {
            Script::ExitAfter(polls, exit) if self.polls > *polls => Ok(Some(exit.clone())),
            _ => Ok(None),
        }
    }

    fn kill(&mut self) -> io::Result<ProcessExit> {
        self.killed
            .lock()
            .expect("killed lock")
            .push(self.job_id.clone());
        match &self.script {
            Script::ExitAfter(_, exit) | Script::Hang(exit) => Ok(exit.clone()),
        }
    }
}

#[derive(Default)]
struct FakeSpawner {
    scripts: Mutex<VecDeque<Script>>,
    spawned: Mutex<Vec<(JobKind, String)>>,
    killed: Arc<Mutex<Vec<String>>>,
    refuse: bool,
}

impl FakeSpawner {
    fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    fn spawned(&self) -> Vec<String> {
        self.spawned
            .lock()
            .expect("spawned lock")
            .iter()
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn killed(&self) -> Vec<String> {
        self.killed.lock().expect("killed lock").clone()
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(&self, kind: JobKind, job_id: &str) -> io::Result<Box<dyn WorkerProcess>> {
        if self.refuse {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such binary"));
        }
        self.spawned
            .lock()
            .expect("spawned lock")
            .push((kind, job_id.to_owned()));
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_else(|| Script::ExitAfter(0, exited(0, "")));
        Ok(Box::new(FakeProcess {
            script,
            polls: 0,
            killed: Arc::clone(&self.killed),
            job_id: job_id.to_owned(),
        }))
    }
}

fn exited(code: i32, stdout: &str) -> ProcessExit {
    ProcessExit {
        code: Some(code),
        stdout: stdout.to_owned(),
        stderr: String::new(),
    }
}

fn scheduler(
    store: &Arc<MemoryStore>,
    spawner: &Arc<FakeSpawner>,
    kind: JobKind,
    timeout: Duration,
) -> WorkerScheduler {
    WorkerScheduler::new(
        store.clone(),
        spawner.clone(),
        kind,
        timeout,
        Duration::ZERO,
    )
}

#[rstest]
#[case(JobKind::Build, "runner:build")]
#[case(JobKind::Release, "runner:deploy")]
fn runner_command_matches_kind(#[case] kind: JobKind, #[case] expected: &str) {
    assert_eq!(runner_command(kind), expected);
}

#[rstest]
#[case(Some(0), true)]
#[case(Some(1), false)]
#[case(None, false)]
fn process_exit_success_requires_zero(#[case] code: Option<i32>, #[case] expected: bool) {
    let exit = ProcessExit {
        code,
        ..ProcessExit::default()
    };
    assert_eq!(exit.is_success(), expected);
}

#[test]
fn releases_sharing_a_target_spawn_once() {
    let store = Arc::new(MemoryStore::new());
    let target = sample_target("t-1", "rsync");
    store.insert_release(sample_release("r-1", "b-1", Some(target.clone())));
    store.insert_release(sample_release("r-2", "b-1", Some(target)));
    let spawner = Arc::new(FakeSpawner::default());
    let mut scheduler = scheduler(&store, &spawner, JobKind::Release, Duration::from_secs(60));

    let summary = scheduler.execute().expect("execute");

    assert_eq!(
        summary,
        ExecuteSummary {
            spawned: 1,
            skipped: 1,
            rejected: 0,
        }
    );
    assert_eq!(spawner.spawned(), vec![String::from("r-1")]);
    assert_eq!(store.status_of("r-2"), Some(JobStatus::Pending));
    let record = scheduler.workers().first().expect("worker record");
    assert_eq!(record.target_id.as_deref(), Some("t-1"));
}

#[test]
fn releases_on_different_targets_both_spawn() {
    let store = Arc::new(MemoryStore::new());
    store.insert_release(sample_release("r-1", "b-1", Some(sample_target("t-1", "s3"))));
    store.insert_release(sample_release("r-2", "b-1", Some(sample_target("t-2", "s3"))));
    let spawner = Arc::new(FakeSpawner::default());
    let mut scheduler = scheduler(&store, &spawner, JobKind::Release, Duration::from_secs(60));

    let summary = scheduler.execute().expect("execute");

    assert_eq!(summary.spawned, 2);
    assert_eq!(spawner.spawned().len(), 2);
}

#[test]
fn release_without_target_is_failed_without_spawning() {
    let store = Arc::new(MemoryStore::new());
    store.insert_release(sample_release("r-1", "b-1", None));
    let spawner = Arc::new(FakeSpawner::default());
    let mut scheduler = scheduler(&store, &spawner, JobKind::Release, Duration::from_secs(60));

    let summary = scheduler.execute().expect("execute");

    assert_eq!(summary.rejected, 1);
    assert!(spawner.spawned().is_empty());
    assert_eq!(store.status_of("r-1"), Some(JobStatus::Failure));
}

#[test]
fn spawn_failure_marks_job_failed_and_continues() {
    let store = Arc::new(MemoryStore::new());
    store.insert_build(sample_build("b-1"));
    store.insert_build(sample_build("b-2"));
    let spawner = Arc::new(FakeSpawner::refusing());
    let mut scheduler = scheduler(&store, &spawner, JobKind::Build, Duration::from_secs(60));

    let summary = scheduler.execute().expect("execute");

    assert_eq!(summary.rejected, 2);
    assert_eq!(store.status_of("b-1"), Some(JobStatus::Failure));
    assert_eq!(store.status_of("b-2"), Some(JobStatus::Failure));
}

#[test]
fn execute_only_considers_its_own_kind() {
    let store = Arc::new(MemoryStore::new());
    store.insert_build(sample_build("b-1"));
    store.insert_release(sample_release("r-1", "b-1", Some(sample_target("t-1", "s3"))));
    let spawner = Arc::new(FakeSpawner::default());
    let mut scheduler = scheduler(&store, &spawner, JobKind::Build, Duration::from_secs(60));

    scheduler.execute().expect("execute");

    assert_eq!(spawner.spawned(), vec![String::from("b-1")]);
}

#[tokio::test]
async fn wait_collects_finished_workers() {
    let store = Arc::new(MemoryStore::new());
    store.insert_build(sample_build("b-1"));
    store.insert_build(sample_build("b-2"));
    let spawner = Arc::new(FakeSpawner::with_scripts([
        Script::ExitAfter(2, exited(0, "built\n")),
        Script::ExitAfter(0, exited(1, "")),
    ]));
    let mut scheduler = scheduler(&store, &spawner, JobKind::Build, Duration::from_secs(60));

    let outcomes = scheduler.run().await.expect("run");

    assert!(scheduler.workers().is_empty());
    let results: Vec<_> = outcomes
        .iter()
        .map(|outcome| (outcome.job_id.as_str(), outcome.result))
        .collect();
    assert_eq!(results.len(), 2);
    assert!(results.contains(&("b-1", WorkerResult::Succeeded)));
    assert!(results.contains(&("b-2", WorkerResult::Failed)));
    let built = outcomes
        .iter()
        .find(|outcome| outcome.job_id == "b-1")
        .expect("b-1 outcome");
    assert_eq!(built.exit.stdout, "built\n");
}

#[tokio::test]
async fn failed_worker_marks_job_that_was_left_active() {
    let store = Arc::new(MemoryStore::new());
    store.insert_build(sample_build("b-1"));
    let spawner = Arc::new(FakeSpawner::with_scripts([Script::ExitAfter(0, exited(2, ""))]));
    let mut scheduler = scheduler(&store, &spawner, JobKind::Build, Duration::from_secs(60));

    scheduler.run().await.expect("run");

    assert_eq!(store.status_of("b-1"), Some(JobStatus::Failure));
}

#[tokio::test]
async fn successful_worker_leaves_recorded_status_alone() {
    let store = Arc::new(MemoryStore::new());
    store.insert_build(sample_build("b-1"));
    let spawner = Arc::new(FakeSpawner::default());
    let mut scheduler = scheduler(&store, &spawner, JobKind::Build, Duration::from_secs(60));

    scheduler.run().await.expect("run");

    assert_eq!(store.status_of("b-1"), Some(JobStatus::Pending));
}

#[tokio::test]
async fn hung_worker_is_killed_after_timeout() {
    let store = Arc::new(MemoryStore::new());
    store.insert_release(sample_release("r-1", "b-1", Some(sample_target("t-1", "rsync"))));
    let spawner = Arc::new(FakeSpawner::with_scripts([Script::Hang(ProcessExit {
        code: None,
        stdout: String::from("partial output"),
        stderr: String::new(),
    })]));
    let mut scheduler = scheduler(&store, &spawner, JobKind::Release, Duration::ZERO);

    let outcomes = scheduler.run().await.expect("run");

    let outcome = outcomes.first().expect("outcome");
    assert_eq!(outcome.result, WorkerResult::TimedOut);
    assert_eq!(outcome.exit.stdout, "partial output");
    assert_eq!(spawner.killed(), vec![String::from("r-1")]);
    assert_eq!(store.status_of("r-1"), Some(JobStatus::Failure));
}

#[tokio::test]
async fn timed_out_release_frees_its_target_for_the_next_pass() {
    let store = Arc::new(MemoryStore::new());
    let target = sample_target("t-1", "rsync");
    store.insert_release(sample_release("r-1", "b-1", Some(target.clone())));
    store.insert_release(sample_release("r-2", "b-1", Some(target)));
    let spawner = Arc::new(FakeSpawner::with_scripts([Script::Hang(ProcessExit::default())]));
    let mut scheduler = scheduler(&store, &spawner, JobKind::Release, Duration::ZERO);

    scheduler.run().await.expect("first pass");
    scheduler.run().await.expect("second pass");

    assert_eq!(
        spawner.spawned(),
        vec![String::from("r-1"), String::from("r-2")]
    );
}

#[tokio::test]
async fn wait_with_no_workers_returns_immediately() {
    let store = Arc::new(MemoryStore::new());
    let spawner = Arc::new(FakeSpawner::default());
    let mut scheduler = scheduler(&store, &spawner, JobKind::Build, Duration::from_secs(1));

    assert!(scheduler.wait().await.is_empty());
}

fn lock_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    (dir, root)
}

#[rstest]
fn pass_lock_paths_are_per_kind() {
    let state = camino::Utf8Path::new("/var/lib/hal/hal-agent.json");
    assert_eq!(
        PassLock::path_for(state, JobKind::Build),
        Utf8PathBuf::from(format!("/var/lib/hal/.hal-agent.json.worker-{}.lock", JobKind::Build))
    );
    assert_ne!(
        PassLock::path_for(state, JobKind::Build),
        PassLock::path_for(state, JobKind::Release)
    );
}

#[rstest]
fn overlapping_pass_is_refused_until_the_first_ends() {
    let (_guard, root) = lock_dir();
    let path = PassLock::path_for(&root.join("state").join("hal-agent.json"), JobKind::Release);

    let first = PassLock::try_acquire(&path).expect("lock").expect("first pass");
    assert_eq!(first.path(), path.as_path());
    assert!(PassLock::try_acquire(&path).expect("lock").is_none());

    drop(first);
    assert!(PassLock::try_acquire(&path).expect("lock").is_some());
}

#[rstest]
fn passes_over_different_kinds_run_side_by_side() {
    let (_guard, root) = lock_dir();
    let state = root.join("hal-agent.json");
    let builds = PassLock::try_acquire(&PassLock::path_for(&state, JobKind::Build)).expect("lock");
    let releases =
        PassLock::try_acquire(&PassLock::path_for(&state, JobKind::Release)).expect("lock");
    assert!(builds.is_some());
    assert!(releases.is_some());
}
