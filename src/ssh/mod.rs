//! SSH sessions backed by the system `ssh` client.
//!
//! A [`Session`] is a verified, authenticated connection description: the
//! login, the endpoint, and an identity file holding the key from the
//! credential wallet. Each remote command starts a fresh `ssh` process with
//! the session's arguments. Sessions live in a per-process registry until
//! [`SessionManager::disconnect_all`] drops them, which also removes any
//! temporary key files.

mod executor;

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::events::{
    ERR_CONNECT_SERVER, ERR_MISSING_PRIVATE_KEY, ERR_NO_CREDENTIALS, EventLog,
};
use crate::model::Credential;
use crate::process::{CommandRequest, CommandRunner};
use crate::wallet::CredentialWallet;

pub use executor::{CommandContext, RemoteCommandExecutor, RunMessages};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Options applied to every `ssh` invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Known hosts file.
    pub known_hosts_file: String,
    /// Whether unknown host keys are rejected.
    pub strict_host_key_checking: bool,
    /// Budget for connecting and authenticating.
    pub connect_timeout: Duration,
}

/// Reasons a credential cannot become an SSH identity.
#[derive(Debug, Error)]
pub enum SshError {
    /// The credential is not an SSH key.
    #[error("credential does not carry SSH key material")]
    NotAnSshKey,
    /// The key text is empty or lacks PEM/OpenSSH markers.
    #[error("private key is empty or malformed")]
    MalformedKey,
    /// A key file could not be read.
    #[error("failed to read private key {path}: {message}")]
    ReadKey {
        /// Key file path.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// The temporary identity file could not be written.
    #[error("failed to write temporary identity file: {0}")]
    Identity(String),
}

/// Identity file handed to `ssh -i`.
#[derive(Debug)]
enum Identity {
    /// Key written to a private temp file, removed on drop.
    Temporary(NamedTempFile),
    /// Key file already present on the agent host.
    File(PathBuf),
}

impl Identity {
    fn path(&self) -> &Path {
        match self {
            Self::Temporary(file) => file.path(),
            Self::File(path) => path,
        }
    }
}

/// An authenticated SSH endpoint.
#[derive(Debug)]
pub struct Session {
    user: String,
    host: String,
    port: u16,
    identity: Identity,
    settings: SshSettings,
}

impl Session {
    /// Remote login name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Host name without port.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// `user@host` destination.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Connection options shared by `ssh` and the rsync remote shell.
    fn option_args(&self) -> Vec<String> {
        vec![
            String::from("-i"),
            self.identity.path().to_string_lossy().into_owned(),
            String::from("-p"),
            self.port.to_string(),
            String::from("-o"),
            String::from("BatchMode=yes"),
            String::from("-o"),
            String::from("IdentitiesOnly=yes"),
            String::from("-o"),
            format!(
                "StrictHostKeyChecking={}",
                if self.settings.strict_host_key_checking {
                    "yes"
                } else {
                    "no"
                }
            ),
            String::from("-o"),
            format!("UserKnownHostsFile={}", self.settings.known_hosts_file),
            String::from("-o"),
            format!("ConnectTimeout={}", self.settings.connect_timeout.as_secs().max(1)),
        ]
    }

    /// Arguments for `ssh` running `remote_command` on this session.
    #[must_use]
    pub fn ssh_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.option_args().into_iter().map(OsString::from).collect();
        args.push(OsString::from(self.destination()));
        args.push(OsString::from(remote_command));
        args
    }

    /// Remote shell string for `rsync --rsh`.
    #[must_use]
    pub fn remote_shell(&self) -> String {
        let ssh_bin = shell_escape::unix::escape(self.settings.ssh_bin.as_str().into());
        let mut parts = vec![ssh_bin.into_owned()];
        parts.extend(
            self.option_args()
                .into_iter()
                .map(|arg| shell_escape::unix::escape(arg.into()).into_owned()),
        );
        parts.join(" ")
    }
}

/// Opens and tracks SSH sessions for one process.
pub struct SessionManager {
    settings: SshSettings,
    wallet: Arc<CredentialWallet>,
    runner: Arc<dyn CommandRunner>,
    events: Arc<dyn EventLog>,
    sessions: Mutex<HashMap<(String, String), Arc<Session>>>,
}

impl SessionManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        settings: SshSettings,
        wallet: Arc<CredentialWallet>,
        runner: Arc<dyn CommandRunner>,
        events: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            settings,
            wallet,
            runner,
            events,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Settings applied to every session.
    #[must_use]
    pub const fn settings(&self) -> &SshSettings {
        &self.settings
    }

    /// Returns the registered session for `(user, server)`, creating one
    /// when none exists.
    pub async fn session(&self, user: &str, server: &str) -> Option<Arc<Session>> {
        if let Some(existing) = self.registered(user, server) {
            return Some(existing);
        }
        self.create_session(user, server).await
    }

    /// Resolves credentials, checks the server, and registers a session.
    ///
    /// Failures are recorded on the event log and yield `None`.
    pub async fn create_session(&self, user: &str, server: &str) -> Option<Arc<Session>> {
        let Some((host, port)) = split_port(server) else {
            self.events.failure(
                ERR_CONNECT_SERVER,
                json!({"user": user, "server": server, "errors": ["invalid port"]}),
            );
            return None;
        };

        let Some(credential) = self.wallet.find(user, host) else {
            self.events
                .failure(ERR_NO_CREDENTIALS, json!({"user": user, "server": server}));
            return None;
        };

        let identity = match prepare_identity(credential) {
            Ok(identity) => identity,
            Err(err) => {
                tracing::warn!(user, server, error = %err, "unusable SSH credential");
                self.events
                    .failure(ERR_MISSING_PRIVATE_KEY, json!({"user": user, "server": server}));
                return None;
            }
        };

        let session = Session {
            user: user.to_owned(),
            host: host.to_owned(),
            port,
            identity,
            settings: self.settings.clone(),
        };

        let errors = self.handshake(&session).await;
        if !errors.is_empty() {
            self.events.failure(
                ERR_CONNECT_SERVER,
                json!({"user": user, "server": server, "errors": errors}),
            );
            return None;
        }

        tracing::info!(user, server, "SSH session established");
        let session = Arc::new(session);
        self.lock()
            .insert((user.to_owned(), server.to_owned()), Arc::clone(&session));
        Some(session)
    }

    /// Drops every registered session. Safe to call repeatedly.
    pub fn disconnect_all(&self) {
        let mut sessions = self.lock();
        if !sessions.is_empty() {
            tracing::debug!(count = sessions.len(), "closing SSH sessions");
        }
        sessions.clear();
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.lock().len()
    }

    fn registered(&self, user: &str, server: &str) -> Option<Arc<Session>> {
        self.lock()
            .get(&(user.to_owned(), server.to_owned()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `true` on the server; returns transport messages on failure.
    async fn handshake(&self, session: &Session) -> Vec<String> {
        let request = CommandRequest::new(&self.settings.ssh_bin)
            .args(session.ssh_args("true"))
            .timeout(self.settings.connect_timeout + Duration::from_secs(5));
        match self.runner.run(&request).await {
            Ok(output) if output.is_success() => Vec::new(),
            Ok(output) => {
                let mut errors: Vec<String> = output
                    .stderr
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(ToOwned::to_owned)
                    .collect();
                if output.timed_out {
                    errors.push(String::from("connection timed out"));
                }
                if errors.is_empty() {
                    errors.push(format!("ssh exited with status {}", output.status_text()));
                }
                errors
            }
            Err(err) => vec![err.to_string()],
        }
    }
}

/// Splits an optional `:port` suffix. Returns `None` for a malformed port.
fn split_port(server: &str) -> Option<(&str, u16)> {
    match server.rsplit_once(':') {
        Some((host, port)) => port.parse().ok().map(|parsed| (host, parsed)),
        None => Some((server, DEFAULT_SSH_PORT)),
    }
}

/// Whether `key` looks like PEM or OpenSSH private key material.
fn is_private_key(key: &str) -> bool {
    let trimmed = key.trim();
    trimmed.starts_with("-----BEGIN ")
        && trimmed.contains("PRIVATE KEY-----")
        && trimmed.contains("-----END ")
}

fn prepare_identity(credential: &Credential) -> Result<Identity, SshError> {
    match credential {
        Credential::PrivateKey { key } => {
            if !is_private_key(key) {
                return Err(SshError::MalformedKey);
            }
            let mut file = NamedTempFile::new().map_err(|err| SshError::Identity(err.to_string()))?;
            writeln!(file, "{}", key.trim()).map_err(|err| SshError::Identity(err.to_string()))?;
            Ok(Identity::Temporary(file))
        }
        Credential::PrivateKeyFile { path } => {
            let contents = std::fs::read_to_string(path).map_err(|err| SshError::ReadKey {
                path: path.clone(),
                message: err.to_string(),
            })?;
            if !is_private_key(&contents) {
                return Err(SshError::MalformedKey);
            }
            Ok(Identity::File(PathBuf::from(path)))
        }
        Credential::AwsStatic { .. } | Credential::AwsRole { .. } => Err(SshError::NotAnSshKey),
    }
}
