//! Command-line interface definitions for the `hal-agent` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `hal-agent` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hal-agent",
    about = "Run build and deployment jobs, one supervised process per job",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run a single pending build in this process.
    #[command(name = "runner:build", about = "Run a single pending build")]
    RunnerBuild(JobArgs),
    /// Run a single pending release in this process.
    #[command(name = "runner:deploy", about = "Run a single pending release")]
    RunnerDeploy(JobArgs),
    /// Run every pending build as a supervised subprocess.
    #[command(name = "worker:build", about = "Run every pending build in its own process")]
    WorkerBuild,
    /// Run every pending release as a supervised subprocess, one per target.
    #[command(
        name = "worker:deploy",
        about = "Run every pending release in its own process, one per target"
    )]
    WorkerDeploy,
}

/// Arguments for the single-job runner subcommands.
#[derive(Debug, Args)]
pub(crate) struct JobArgs {
    /// Identifier of the job to run.
    #[arg(value_name = "JOB_ID")]
    pub(crate) job_id: String,
}
