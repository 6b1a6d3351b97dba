//! Agent configuration loaded via `ortho-config`.
//!
//! Values merge defaults, configuration files (`hal-agent.toml`,
//! `.hal-agent.toml`, or the file named by `HAL_AGENT_CONFIG_PATH`), and
//! `HAL_AGENT_*` environment variables in that order of precedence.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::ssh::SshSettings;

/// Lower bound for the worker poll interval.
pub const MIN_WORKER_POLL_SECS: u64 = 1;
/// Upper bound for the worker poll interval.
pub const MAX_WORKER_POLL_SECS: u64 = 30;

/// Runtime settings shared by the runner and the worker scheduler.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HAL_AGENT",
    discovery(
        app_name = "hal-agent",
        env_var = "HAL_AGENT_CONFIG_PATH",
        config_file_name = "hal-agent.toml",
        dotfile_name = ".hal-agent.toml",
        project_file_name = "hal-agent.toml"
    )
)]
pub struct AgentConfig {
    /// JSON document holding jobs and targets.
    #[ortho_config(default = "hal-agent.json".to_owned())]
    pub state_file: String,
    /// JSON file imported into the SSH credential wallet.
    #[ortho_config(default = "credentials.json".to_owned())]
    pub credentials_file: String,
    /// Parent directory for per-job scratch workspaces.
    #[ortho_config(default = "/tmp/hal-agent".to_owned())]
    pub workspace_root: String,
    /// Directory holding build artifacts named `<build id>.tar.gz`.
    #[ortho_config(default = "/var/lib/hal-agent/artifacts".to_owned())]
    pub artifact_root: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `rsync` executable.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Path to the `tar` executable.
    #[ortho_config(default = "tar".to_owned())]
    pub tar_bin: String,
    /// Path to the `zip` executable.
    #[ortho_config(default = "zip".to_owned())]
    pub zip_bin: String,
    /// Path to the AWS CLI.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Shell used for local build commands.
    #[ortho_config(default = "sh".to_owned())]
    pub shell_bin: String,
    /// Known hosts file passed to SSH; `/dev/null` for throwaway hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Whether SSH enforces host key checking.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Budget for establishing an SSH session.
    #[ortho_config(default = 15)]
    pub ssh_connect_timeout_secs: u64,
    /// Budget for a single remote command.
    #[ortho_config(default = 1800)]
    pub remote_command_timeout_secs: u64,
    /// Budget for a single local build command.
    #[ortho_config(default = 1800)]
    pub build_command_timeout_secs: u64,
    /// Sleep between worker liveness checks, clamped to 1–30 seconds.
    #[ortho_config(default = 5)]
    pub worker_poll_interval_secs: u64,
    /// Hard budget for one job subprocess.
    #[ortho_config(default = 3600)]
    pub job_timeout_secs: u64,
    /// Program spawned by the worker for each job. Defaults to the running
    /// executable.
    pub runner_bin: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 10] = [
    FieldMetadata::new("state file", "HAL_AGENT_STATE_FILE", "state_file"),
    FieldMetadata::new(
        "credentials file",
        "HAL_AGENT_CREDENTIALS_FILE",
        "credentials_file",
    ),
    FieldMetadata::new(
        "workspace root",
        "HAL_AGENT_WORKSPACE_ROOT",
        "workspace_root",
    ),
    FieldMetadata::new("artifact root", "HAL_AGENT_ARTIFACT_ROOT", "artifact_root"),
    FieldMetadata::new("ssh binary", "HAL_AGENT_SSH_BIN", "ssh_bin"),
    FieldMetadata::new("rsync binary", "HAL_AGENT_RSYNC_BIN", "rsync_bin"),
    FieldMetadata::new("tar binary", "HAL_AGENT_TAR_BIN", "tar_bin"),
    FieldMetadata::new("zip binary", "HAL_AGENT_ZIP_BIN", "zip_bin"),
    FieldMetadata::new("AWS CLI binary", "HAL_AGENT_AWS_BIN", "aws_bin"),
    FieldMetadata::new("shell binary", "HAL_AGENT_SHELL_BIN", "shell_bin"),
];

impl AgentConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("hal-agent")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and TOML key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank,
    /// or [`ConfigError::Invalid`] when a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            &self.state_file,
            &self.credentials_file,
            &self.workspace_root,
            &self.artifact_root,
            &self.ssh_bin,
            &self.rsync_bin,
            &self.tar_bin,
            &self.zip_bin,
            &self.aws_bin,
            &self.shell_bin,
        ];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "missing {}: set {} or add {} to hal-agent.toml",
                    metadata.description, metadata.env_var, metadata.toml_key
                )));
            }
        }
        if self
            .runner_bin
            .as_deref()
            .is_some_and(|value| value.trim().is_empty())
        {
            return Err(ConfigError::MissingField(String::from(
                "missing runner binary: set HAL_AGENT_RUNNER_BIN \
                 or remove runner_bin from hal-agent.toml",
            )));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "job_timeout_secs must be greater than 0",
            )));
        }
        if self.remote_command_timeout_secs == 0 || self.build_command_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "command timeouts must be greater than 0",
            )));
        }
        Ok(())
    }

    /// Sleep between worker liveness checks, clamped to the supported range.
    #[must_use]
    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.worker_poll_interval_secs
                .clamp(MIN_WORKER_POLL_SECS, MAX_WORKER_POLL_SECS),
        )
    }

    /// Hard budget for one job subprocess.
    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Budget for a single remote command.
    #[must_use]
    pub const fn remote_command_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_command_timeout_secs)
    }

    /// Budget for a single local build command.
    #[must_use]
    pub const fn build_command_timeout(&self) -> Duration {
        Duration::from_secs(self.build_command_timeout_secs)
    }

    /// SSH options derived from this configuration.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            ssh_bin: self.ssh_bin.clone(),
            known_hosts_file: self.ssh_known_hosts_file.clone(),
            strict_host_key_checking: self.ssh_strict_host_key_checking,
            connect_timeout: Duration::from_secs(self.ssh_connect_timeout_secs),
        }
    }

    /// Workspace root as a path.
    #[must_use]
    pub fn workspace_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.workspace_root)
    }

    /// Artifact root as a path.
    #[must_use]
    pub fn artifact_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.artifact_root)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
