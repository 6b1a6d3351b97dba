//! SSH credential wallet.
//!
//! Entries are imported once and never change afterwards. Lookups prefer an
//! exact host match over a `*` wildcard, and the earliest import wins among
//! entries of equal specificity.

use camino::Utf8Path;
use serde::Deserialize;
use thiserror::Error;

use crate::model::Credential;

/// Host pattern matching every server.
pub const WILDCARD_HOST: &str = "*";

/// One `(user, host pattern, credential)` import.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct WalletEntry {
    /// Remote login name.
    pub user: String,
    /// Exact host name or `*`.
    pub host: String,
    /// Credential used for matching connections.
    pub credential: Credential,
}

impl WalletEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(user: impl Into<String>, host: impl Into<String>, credential: Credential) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            credential,
        }
    }
}

/// Errors raised while loading the wallet.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The credentials file could not be read.
    #[error("failed to read credentials file {path}: {message}")]
    Read {
        /// File that failed.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// The credentials file is not a JSON list of entries.
    #[error("failed to parse credentials file {path}: {message}")]
    Parse {
        /// File that failed.
        path: String,
        /// Parser error string.
        message: String,
    },
}

/// Immutable, ordered set of SSH credentials.
#[derive(Clone, Debug, Default)]
pub struct CredentialWallet {
    entries: Vec<WalletEntry>,
}

impl CredentialWallet {
    /// Imports entries, preserving their order.
    #[must_use]
    pub const fn import(entries: Vec<WalletEntry>) -> Self {
        Self { entries }
    }

    /// Loads entries from a JSON file. A missing file yields an empty wallet.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError`] when the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Utf8Path) -> Result<Self, WalletError> {
        if !path.exists() {
            tracing::debug!(%path, "credentials file not found; wallet is empty");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|err| WalletError::Read {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        let entries: Vec<WalletEntry> =
            serde_json::from_str(&contents).map_err(|err| WalletError::Parse {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        tracing::debug!(%path, count = entries.len(), "imported SSH credentials");
        Ok(Self::import(entries))
    }

    /// Finds the credential for `user` on `host`.
    #[must_use]
    pub fn find(&self, user: &str, host: &str) -> Option<&Credential> {
        let mut wildcard = None;
        for entry in self.entries.iter().filter(|entry| entry.user == user) {
            if entry.host == host {
                return Some(&entry.credential);
            }
            if wildcard.is_none() && entry.host == WILDCARD_HOST {
                wildcard = Some(&entry.credential);
            }
        }
        wildcard
    }

    /// Number of imported entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the wallet holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests;
