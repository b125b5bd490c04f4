//! File-backed persistence for CA material and issued artifacts.
//!
//! One directory per certificate authority, with fixed member names:
//!
//! ```text
//! <ca dir>/
//!   ca.pem          root certificate (PEM)
//!   ca.key.pem      root private key (encrypted PEM, mode 0o600)
//!   serial          next serial number (hex, one line)
//! ```
//!
//! Issued leaves get `<name>.pem`, `<name>.key.pem`, `<name>.fullchain.pem`
//! and optionally `<name>.p12` under the output directory. Nothing here
//! overwrites an existing file unless the caller passes `force`.

use crate::error::{CaError, Result};
use crate::private_key_storage::{load_private_key, save_private_key};
use crate::serial_state::SerialState;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::SecretString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const CA_CERT_FILE: &str = "ca.pem";
const CA_KEY_FILE: &str = "ca.key.pem";
const CA_SERIAL_FILE: &str = "serial";

/// Location of one certificate authority on disk.
#[derive(Debug, Clone)]
pub struct CaPaths {
    dir: PathBuf,
}

impl CaPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(CA_CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(CA_KEY_FILE)
    }

    pub fn serial_path(&self) -> PathBuf {
        self.dir.join(CA_SERIAL_FILE)
    }
}

/// Output locations for one issued leaf.
#[derive(Debug, Clone)]
pub struct LeafPaths {
    dir: PathBuf,
    name: String,
}

impl LeafPaths {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(format!("{}.pem", self.name))
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(format!("{}.key.pem", self.name))
    }

    pub fn fullchain_path(&self) -> PathBuf {
        self.dir.join(format!("{}.fullchain.pem", self.name))
    }

    pub fn pkcs12_path(&self) -> PathBuf {
        self.dir.join(format!("{}.p12", self.name))
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| CaError::persistence(&self.dir, e))
    }
}

/// A loaded certificate authority: decrypted key, certificate, and the
/// handle to its serial state.
#[derive(Debug)]
pub struct CertificateAuthority {
    key: PKey<Private>,
    cert: X509,
    serial: SerialState,
}

impl CertificateAuthority {
    /// Load CA material from disk, decrypting the key with `passphrase`.
    /// The certificate and private key are cross-checked so that a store
    /// with mismatched members is caught before any signing happens.
    pub fn load(paths: &CaPaths, passphrase: &SecretString) -> Result<Self> {
        let cert_path = paths.cert_path();
        if !cert_path.exists() {
            return Err(CaError::MissingCa(cert_path));
        }
        let pem = fs::read(&cert_path).map_err(|e| CaError::persistence(&cert_path, e))?;
        let cert = X509::from_pem(&pem).map_err(|e| {
            CaError::Signing(format!(
                "failed to parse CA certificate {}: {e}",
                cert_path.display()
            ))
        })?;

        let key = load_private_key(&paths.key_path(), passphrase)?;
        let cert_pubkey = cert.public_key().map_err(|e| {
            CaError::Signing(format!("failed to read CA certificate public key: {e}"))
        })?;
        if !key.public_eq(&cert_pubkey) {
            return Err(CaError::Signing(format!(
                "CA private key does not match certificate in {}",
                paths.dir().display()
            )));
        }

        let serial = SerialState::open(paths.serial_path())?;
        Ok(Self { key, cert, serial })
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }

    pub fn cert(&self) -> &X509 {
        &self.cert
    }

    pub fn serial(&self) -> &SerialState {
        &self.serial
    }
}

/// Persist a freshly generated CA: encrypted key, certificate, and serial
/// state. Serial initialization is idempotent; an existing counter is left
/// alone even under `force` so that reissuing a root never resets serials.
pub fn store_key_certificate(
    paths: &CaPaths,
    key: &PKey<Private>,
    cert: &X509,
    passphrase: &SecretString,
    force: bool,
) -> Result<()> {
    fs::create_dir_all(paths.dir()).map_err(|e| CaError::persistence(paths.dir(), e))?;
    save_private_key(&paths.key_path(), key, passphrase, force)?;
    write_certificate(&paths.cert_path(), cert, force)?;
    SerialState::init(paths.serial_path())?;
    Ok(())
}

/// Write a certificate as PEM (world-readable; certificates are public).
pub fn write_certificate(path: &Path, cert: &X509, force: bool) -> Result<()> {
    let pem = cert
        .to_pem()
        .map_err(|e| CaError::Signing(format!("failed to serialize certificate: {e}")))?;
    write_file(path, &pem, force, None)
}

/// Write leaf-then-issuer PEM concatenation for servers that expect the
/// whole chain in one file.
pub fn write_fullchain(path: &Path, leaf: &X509, issuer: &X509, force: bool) -> Result<()> {
    let mut pem = leaf
        .to_pem()
        .map_err(|e| CaError::Signing(format!("failed to serialize certificate: {e}")))?;
    let issuer_pem = issuer
        .to_pem()
        .map_err(|e| CaError::Signing(format!("failed to serialize certificate: {e}")))?;
    pem.extend_from_slice(&issuer_pem);
    write_file(path, &pem, force, None)
}

/// Write raw bytes with the overwrite policy and an optional unix mode.
pub fn write_file(path: &Path, bytes: &[u8], force: bool, mode: Option<u32>) -> Result<()> {
    let mut file = open_exclusive(path, force, mode)?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| CaError::persistence(path, e))
}

/// Open `path` for writing, refusing to clobber an existing file unless
/// `force` is set. `mode` applies only when the file is created.
pub(crate) fn open_exclusive(path: &Path, force: bool, mode: Option<u32>) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    options.open(path).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => CaError::AlreadyExists(path.to_path_buf()),
        _ => CaError::persistence(path, e),
    })
}
