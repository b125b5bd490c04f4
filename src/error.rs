//! Error types for certificate authority operations.
//!
//! Every library API returns [`CaError`]. All errors are terminal for the
//! current operation; issuance is never retried automatically because a
//! retry after a partial serial-state failure could double-issue a serial.

use std::path::PathBuf;
use thiserror::Error;

/// The error type for all certificate authority operations.
#[derive(Error, Debug)]
pub enum CaError {
    /// Rejected configuration: unsupported key size, empty passphrase,
    /// malformed distinguished name, validity outliving the issuer, etc.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// RSA key pair generation failed (entropy or backend failure)
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A certificate request did not verify against its own public key
    #[error("malformed certificate request: {0}")]
    MalformedRequest(String),

    /// Certificate assembly, encryption or signing failed in the backend
    #[error("signing failed: {0}")]
    Signing(String),

    /// An issued certificate failed verification against its own issuer.
    /// This is a self-check; seeing it means a bug, not an operator error.
    #[error("issued certificate failed chain verification: {0}")]
    ChainVerification(String),

    /// I/O failure reading or writing an artifact
    #[error("storage failure for {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Refusal to overwrite an existing artifact without --force
    #[error("refusing to overwrite existing file {0}")]
    AlreadyExists(PathBuf),

    /// CA key, certificate or serial state not found where expected
    #[error("certificate authority material missing: {0}")]
    MissingCa(PathBuf),
}

/// A specialized Result type for certificate authority operations.
pub type Result<T> = std::result::Result<T, CaError>;

impl CaError {
    /// Process exit code for the command-line boundary: configuration
    /// errors exit 2, I/O errors 3, cryptographic/backend errors 4.
    pub fn exit_code(&self) -> i32 {
        match self {
            CaError::InvalidConfig(_) => 2,
            CaError::Persistence { .. } | CaError::AlreadyExists(_) | CaError::MissingCa(_) => 3,
            CaError::KeyGeneration(_)
            | CaError::MalformedRequest(_)
            | CaError::Signing(_)
            | CaError::ChainVerification(_) => 4,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaError::Persistence {
            path: path.into(),
            source,
        }
    }
}
