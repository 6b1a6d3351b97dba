//! Tests for the process runner.

use std::time::Duration;

use rstest::rstest;

use super::*;

#[rstest]
fn command_string_renders_program_and_args() {
    let request = CommandRequest::new("tar")
        .arg("-czf")
        .args(["out.tar.gz", "."]);
    assert_eq!(request.command_string(), "tar -czf out.tar.gz .");
}

#[rstest]
#[case(Some(0), false, true)]
#[case(Some(1), false, false)]
#[case(None, false, false)]
#[case(None, true, false)]
fn is_success_requires_zero_exit_without_timeout(
    #[case] code: Option<i32>,
    #[case] timed_out: bool,
    #[case] expected: bool,
) {
    let output = CommandOutput {
        code,
        timed_out,
        ..CommandOutput::default()
    };
    assert_eq!(output.is_success(), expected);
}

#[tokio::test]
async fn process_runner_captures_output_and_exit_code() {
    let request = CommandRequest::new("sh")
        .arg("-c")
        .arg("echo out; echo err >&2; exit 3");
    let output = ProcessCommandRunner
        .run(&request)
        .await
        .expect("sh should spawn");

    assert_eq!(output.code, Some(3));
    assert_eq!(output.stdout.trim(), "out");
    assert_eq!(output.stderr.trim(), "err");
    assert!(!output.timed_out);
}

#[tokio::test]
async fn process_runner_passes_environment() {
    let request = CommandRequest::new("sh")
        .arg("-c")
        .arg("printf %s \"$HAL_JOBID\"")
        .env("HAL_JOBID", "1234");
    let output = ProcessCommandRunner
        .run(&request)
        .await
        .expect("sh should spawn");

    assert_eq!(output.stdout, "1234");
}

#[tokio::test]
async fn process_runner_kills_on_timeout_and_keeps_partial_output() {
    let request = CommandRequest::new("sh")
        .arg("-c")
        .arg("echo started; exec sleep 5")
        .timeout(Duration::from_millis(200));
    let output = ProcessCommandRunner
        .run(&request)
        .await
        .expect("sh should spawn");

    assert!(output.timed_out, "expected timeout, got {output:?}");
    assert_eq!(output.code, None);
    assert!(output.stdout.contains("started"));
}

#[tokio::test]
async fn process_runner_timeout_kills_shell_descendants() {
    let request = CommandRequest::new("sh")
        .arg("-c")
        .arg("echo started; sleep 4; echo done")
        .timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    let output = ProcessCommandRunner
        .run(&request)
        .await
        .expect("sh should spawn");

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "timeout took {:?}",
        started.elapsed()
    );
    assert!(output.timed_out, "expected timeout, got {output:?}");
    assert!(output.stdout.contains("started"));
    assert!(!output.stdout.contains("done"));
}

#[tokio::test]
async fn process_runner_does_not_wait_for_detached_pipe_holders() {
    let request = CommandRequest::new("sh")
        .arg("-c")
        .arg("echo ready; sleep 4 &");
    let started = std::time::Instant::now();
    let output = ProcessCommandRunner
        .run(&request)
        .await
        .expect("sh should spawn");

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "run took {:?}",
        started.elapsed()
    );
    assert!(output.is_success(), "unexpected: {output:?}");
    assert!(output.stdout.contains("ready"));
}

#[tokio::test]
async fn process_runner_reports_spawn_failure() {
    let request = CommandRequest::new("/nonexistent/hal-agent-binary");
    let err = ProcessCommandRunner
        .run(&request)
        .await
        .expect_err("missing binary should fail to spawn");
    assert!(matches!(err, CommandError::Spawn { .. }), "unexpected: {err}");
}
