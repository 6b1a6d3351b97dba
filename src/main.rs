//! Binary entry point for the hal-agent CLI.

use std::io::{self, IsTerminal, Write};
use std::process;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use hal_agent::clock::SystemClock;
use hal_agent::cloud::AwsCliFactory;
use hal_agent::config::{AgentConfig, ConfigError};
use hal_agent::events::TracingEventLog;
use hal_agent::io::ConsoleIo;
use hal_agent::model::JobKind;
use hal_agent::platform::{Dispatcher, Platforms, Services, Tools};
use hal_agent::process::{CommandRunner, ProcessCommandRunner};
use hal_agent::runner::{JobRunner, ResolveError, RunnerPaths};
use hal_agent::scheduler::{
    PassLock, SchedulerError, SubprocessSpawner, WorkerResult, WorkerScheduler,
};
use hal_agent::ssh::{RemoteCommandExecutor, SessionManager};
use hal_agent::store::{JobStore, JsonFileStore};
use hal_agent::wallet::{CredentialWallet, WalletError};

mod cli;

use cli::{Cli, JobArgs};

/// Exit status for a job whose pipeline failed.
const EXIT_FAILURE: i32 = 1;
/// Exit status for configuration errors and jobs that could not start.
const EXIT_USAGE: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("credential wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("job could not be started: {0}")]
    Resolve(#[from] ResolveError),
    #[error("worker pass failed: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("cannot determine runner binary: {0}")]
    RunnerBin(String),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Scheduler(_) => EXIT_FAILURE,
            Self::Config(_) | Self::Wallet(_) | Self::Resolve(_) | Self::RunnerBin(_) => {
                EXIT_USAGE
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hal_agent=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = load_config()?;
    match cli {
        Cli::RunnerBuild(args) => run_job(&config, &args, JobKind::Build).await,
        Cli::RunnerDeploy(args) => run_job(&config, &args, JobKind::Release).await,
        Cli::WorkerBuild => run_worker(&config, JobKind::Build).await,
        Cli::WorkerDeploy => run_worker(&config, JobKind::Release).await,
    }
}

fn load_config() -> Result<AgentConfig, CliError> {
    let config = AgentConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

fn open_store(config: &AgentConfig) -> Arc<dyn JobStore> {
    Arc::new(JsonFileStore::new(config.state_file.as_str()))
}

async fn run_job(config: &AgentConfig, args: &JobArgs, kind: JobKind) -> Result<i32, CliError> {
    let credentials = Utf8PathBuf::from(&config.credentials_file);
    let wallet = Arc::new(CredentialWallet::load(&credentials)?);
    let commands: Arc<dyn CommandRunner> = Arc::new(ProcessCommandRunner);
    let events = Arc::new(TracingEventLog::new(args.job_id.as_str()));

    let sessions = Arc::new(SessionManager::new(
        config.ssh_settings(),
        wallet,
        Arc::clone(&commands),
        events.clone(),
    ));
    let executor = Arc::new(RemoteCommandExecutor::new(
        Arc::clone(&sessions),
        Arc::clone(&commands),
        events.clone(),
        config.remote_command_timeout(),
    ));
    let services = Arc::new(Services {
        runner: Arc::clone(&commands),
        events: events.clone(),
        clock: Arc::new(SystemClock),
        cloud: Arc::new(AwsCliFactory::new(Arc::clone(&commands), &config.aws_bin)),
        executor,
        tools: Tools {
            rsync_bin: config.rsync_bin.clone(),
            tar_bin: config.tar_bin.clone(),
            zip_bin: config.zip_bin.clone(),
            shell_bin: config.shell_bin.clone(),
            build_timeout: config.build_command_timeout(),
            transfer_timeout: config.remote_command_timeout(),
        },
    });
    let runner = JobRunner::new(
        open_store(config),
        Dispatcher::new(Platforms::new(&services), events.clone()),
        events,
        sessions,
        commands,
        RunnerPaths {
            workspace_root: config.workspace_root(),
            artifact_root: config.artifact_root(),
            tar_bin: config.tar_bin.clone(),
        },
    );

    let succeeded = runner.run(&args.job_id, kind, &ConsoleIo).await?;
    Ok(if succeeded { 0 } else { EXIT_FAILURE })
}

async fn run_worker(config: &AgentConfig, kind: JobKind) -> Result<i32, CliError> {
    let lock_path = PassLock::path_for(Utf8Path::new(&config.state_file), kind);
    let Some(_pass) = PassLock::try_acquire(&lock_path)? else {
        tracing::info!(%kind, lock = %lock_path, "another worker pass is running, skipping");
        return Ok(0);
    };
    let program = runner_bin(config)?;
    let mut scheduler = WorkerScheduler::new(
        open_store(config),
        Arc::new(SubprocessSpawner::new(program)),
        kind,
        config.job_timeout(),
        config.worker_poll_interval(),
    );
    let outcomes = scheduler.run().await?;
    let failed = outcomes
        .iter()
        .filter(|outcome| outcome.result != WorkerResult::Succeeded)
        .count();
    tracing::info!(
        %kind,
        finished = outcomes.len(),
        failed,
        "worker pass complete"
    );
    Ok(0)
}

fn runner_bin(config: &AgentConfig) -> Result<Utf8PathBuf, CliError> {
    if let Some(program) = config.runner_bin.as_deref() {
        return Ok(Utf8PathBuf::from(program));
    }
    let current = std::env::current_exe().map_err(|err| CliError::RunnerBin(err.to_string()))?;
    Utf8PathBuf::from_path_buf(current)
        .map_err(|path| CliError::RunnerBin(format!("{} is not valid UTF-8", path.display())))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
