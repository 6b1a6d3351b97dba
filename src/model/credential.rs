//! Credential detail blobs.

use serde::{Deserialize, Serialize};

/// Secret material used to reach a server or a cloud account.
#[derive(Clone, Deserialize, Serialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Inline SSH private key (PEM or OpenSSH format).
    PrivateKey {
        /// Key material.
        key: String,
    },
    /// SSH private key stored on the agent host.
    PrivateKeyFile {
        /// Path to the key file.
        path: String,
    },
    /// Long-lived AWS access keys.
    AwsStatic {
        /// Access key id.
        access_key: String,
        /// Secret access key.
        secret_key: String,
    },
    /// AWS role assumed with the agent's ambient credentials.
    AwsRole {
        /// Account that owns the role.
        account_id: String,
        /// Role name.
        role: String,
    },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrivateKey { .. } => f.write_str("PrivateKey { key: <redacted> }"),
            Self::PrivateKeyFile { path } => {
                f.debug_struct("PrivateKeyFile").field("path", path).finish()
            }
            Self::AwsStatic { access_key, .. } => f
                .debug_struct("AwsStatic")
                .field("access_key", access_key)
                .finish_non_exhaustive(),
            Self::AwsRole { account_id, role } => f
                .debug_struct("AwsRole")
                .field("account_id", account_id)
                .field("role", role)
                .finish(),
        }
    }
}
