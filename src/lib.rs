//! Core library for the hal-agent build and deployment runner.
//!
//! A job is either a build or a release. The single-job runner prepares a
//! scratch workspace, hands the job to the pipeline for its platform, and
//! records the outcome. The worker scheduler launches one runner process per
//! pending job, never two releases on the same target at once, and kills any
//! worker that outlives its time budget.

pub mod clock;
pub mod cloud;
pub mod config;
pub mod events;
pub mod io;
pub mod model;
pub mod platform;
pub mod process;
pub mod runner;
pub mod scheduler;
pub mod ssh;
pub mod store;
pub mod template;
pub mod test_support;
pub mod wallet;
pub mod waiter;
pub mod workspace;

pub use config::{AgentConfig, ConfigError};
pub use model::{Job, JobKind, JobStatus, Target, TargetKind};
pub use runner::{JobRunner, ResolveError};
pub use scheduler::{WorkerOutcome, WorkerResult, WorkerScheduler};
