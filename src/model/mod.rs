//! Jobs, targets, and credentials as the persistence layer hands them over.

mod credential;
mod job;
mod target;

pub use credential::Credential;
pub use job::{Application, Build, Environment, Job, JobConfig, JobKind, JobStatus, Release};
pub use target::{Target, TargetKind};
