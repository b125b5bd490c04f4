//! Encrypted private-key persistence.
//!
//! Private keys are written as PKCS#8 PEM encrypted with AES-256-CBC under
//! an operator-supplied passphrase, with owner-read-only permissions. An
//! empty passphrase is rejected outright; there is no fallback to an
//! unencrypted key or to a well-known default.

use crate::error::{CaError, Result};
use crate::storage::open_exclusive;
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Owner-read-only mode for key material on disk.
pub const KEY_FILE_MODE: u32 = 0o600;

/// Reject the empty passphrase before any key material is produced.
pub fn require_passphrase(passphrase: &SecretString) -> Result<()> {
    if passphrase.expose_secret().is_empty() {
        return Err(CaError::InvalidConfig(
            "passphrase must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Encrypt `key` under `passphrase` and write it to `path` (mode 0o600).
/// Refuses to overwrite an existing file unless `force` is set.
pub fn save_private_key(
    path: &Path,
    key: &PKey<Private>,
    passphrase: &SecretString,
    force: bool,
) -> Result<()> {
    require_passphrase(passphrase)?;

    let pem = key
        .private_key_to_pem_pkcs8_passphrase(
            Cipher::aes_256_cbc(),
            passphrase.expose_secret().as_bytes(),
        )
        .map_err(|e| CaError::Signing(format!("failed to encrypt private key: {e}")))?;

    let mut file = open_exclusive(path, force, Some(KEY_FILE_MODE))?;
    file.write_all(&pem)
        .and_then(|_| file.sync_all())
        .map_err(|e| CaError::persistence(path, e))?;
    Ok(())
}

/// Load and decrypt a private key written by [`save_private_key`].
pub fn load_private_key(path: &Path, passphrase: &SecretString) -> Result<PKey<Private>> {
    let pem = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CaError::MissingCa(path.to_path_buf()),
        _ => CaError::persistence(path, e),
    })?;
    PKey::private_key_from_pem_passphrase(&pem, passphrase.expose_secret().as_bytes()).map_err(
        |e| {
            CaError::Signing(format!(
                "failed to decrypt private key at {}: {e}",
                path.display()
            ))
        },
    )
}
