//! Domain errors for the vault and the orchestration layer.
//!
//! Probe outcomes (TIMEOUT / FAILURE / ERROR) are never represented here;
//! they are data inside a `CheckResult`.

use thiserror::Error;

/// Failures of the credential vault.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Encryption key is missing")]
    MissingKey,

    #[error("Encryption key must be 32 bytes (256 bits) long, got {0}")]
    InvalidKeyLength(usize),

    #[error("Encryption key is not valid hex")]
    InvalidKeyEncoding,

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),

    #[error("Decryption failed — wrong key or corrupted data")]
    Decryption,

    #[error("Encryption failed")]
    Encryption,

    #[error("Decrypted credential is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors that abort a single check run (or a configuration action).
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Check configuration '{0}' not found")]
    CheckNotFound(String),

    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl MonitorError {
    /// Whether this error is a missing-entity error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CheckNotFound(_) | Self::ConnectionNotFound(_))
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
