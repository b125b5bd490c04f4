//! Durable serial-number state for one certificate authority.
//!
//! The serial file holds the next serial to issue as a single line of hex.
//! It is seeded with 128 bits of CSPRNG entropy so that independently
//! bootstrapped authorities never collide on predictable low serials, and
//! an existing file is never reseeded. The read-increment-persist sequence
//! is guarded by an exclusive lock file, and the incremented value reaches
//! disk before the serial is handed to the signer: a crash mid-issuance can
//! skip a serial but can never reuse one.

use crate::error::{CaError, Result};
use openssl::bn::{BigNum, MsbOption};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SERIAL_ENTROPY_BITS: i32 = 128;

/// Handle to the file-backed serial counter of one CA.
#[derive(Debug)]
pub struct SerialState {
    path: PathBuf,
}

impl SerialState {
    /// Open existing serial state. The file must already exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(CaError::MissingCa(path));
        }
        Ok(Self { path })
    }

    /// Create serial state seeded with a random 128-bit value. Re-running
    /// against an existing file leaves it untouched.
    pub fn init(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Ok(Self { path });
        }
        let mut seed = BigNum::new()
            .map_err(|e| CaError::KeyGeneration(format!("failed to allocate serial seed: {e}")))?;
        seed.rand(SERIAL_ENTROPY_BITS, MsbOption::MAYBE_ZERO, false)
            .map_err(|e| CaError::KeyGeneration(format!("failed to draw serial entropy: {e}")))?;
        write_serial(&path, &seed)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next serial without consuming it.
    pub fn peek(&self) -> Result<BigNum> {
        read_serial(&self.path)
    }

    /// Atomically consume the next serial: under the lock, persist the
    /// incremented value, then return the value that was read. The caller
    /// only ever signs with a serial whose successor is already durable.
    pub fn next_serial(&self) -> Result<BigNum> {
        let _lock = SerialLock::acquire(&self.path)?;

        let current = read_serial(&self.path)?;
        let one = BigNum::from_u32(1)
            .map_err(|e| CaError::Signing(format!("failed to allocate bignum: {e}")))?;
        let mut next = BigNum::new()
            .map_err(|e| CaError::Signing(format!("failed to allocate bignum: {e}")))?;
        next.checked_add(&current, &one)
            .map_err(|e| CaError::Signing(format!("serial increment failed: {e}")))?;
        write_serial(&self.path, &next)?;

        Ok(current)
    }
}

fn read_serial(path: &Path) -> Result<BigNum> {
    let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CaError::MissingCa(path.to_path_buf()),
        _ => CaError::persistence(path, e),
    })?;
    BigNum::from_hex_str(raw.trim()).map_err(|e| {
        CaError::persistence(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("corrupt serial value: {e}"),
            ),
        )
    })
}

/// Replace the serial file atomically: write to a sibling temp file, fsync,
/// rename into place.
fn write_serial(path: &Path, value: &BigNum) -> Result<()> {
    let hex = value
        .to_hex_str()
        .map_err(|e| CaError::Signing(format!("failed to encode serial: {e}")))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CaError::persistence(path, e))?;
    writeln!(tmp, "{}", &*hex).map_err(|e| CaError::persistence(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CaError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| CaError::persistence(path, e.error))?;
    Ok(())
}

/// Exclusive advisory lock, held as a sibling `.lock` file for the duration
/// of one read-increment-persist cycle. A crash can leave the lock behind;
/// the error message names it so the operator can remove it after checking
/// that no other issuance is running.
struct SerialLock {
    path: PathBuf,
}

impl SerialLock {
    fn acquire(serial_path: &Path) -> Result<Self> {
        let path = serial_path.with_extension("lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(CaError::persistence(
                &path,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "serial state is locked by another issuance; remove the lock file if none is running",
                ),
            )),
            Err(e) => Err(CaError::persistence(&path, e)),
        }
    }
}

impl Drop for SerialLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_one_hex_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial");
        SerialState::init(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with('\n'));
        let line = raw.trim();
        assert!(!line.is_empty());
        assert!(line.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_init_never_resets_existing_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial");
        let state = SerialState::init(&path).unwrap();
        let before = state.peek().unwrap();

        let reopened = SerialState::init(&path).unwrap();
        let after = reopened.peek().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_open_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("serial");
        assert!(matches!(
            SerialState::open(&missing),
            Err(CaError::MissingCa(_))
        ));
    }

    #[test]
    fn test_sequential_serials_are_distinct_and_increment() {
        let dir = TempDir::new().unwrap();
        let state = SerialState::init(dir.path().join("serial")).unwrap();

        let mut issued = Vec::new();
        for _ in 0..5 {
            issued.push(state.next_serial().unwrap());
        }
        for pair in issued.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }

        // next unconsumed value sits one past the last issued serial
        let one = BigNum::from_u32(1).unwrap();
        let mut expected = BigNum::new().unwrap();
        expected.checked_add(&issued[4], &one).unwrap();
        assert_eq!(state.peek().unwrap(), expected);
    }

    #[test]
    fn test_held_lock_fails_issuance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial");
        let state = SerialState::init(&path).unwrap();

        fs::write(path.with_extension("lock"), b"").unwrap();
        let err = state.next_serial().unwrap_err();
        assert!(matches!(err, CaError::Persistence { .. }));
        assert_eq!(err.exit_code(), 3);

        fs::remove_file(path.with_extension("lock")).unwrap();
        assert!(state.next_serial().is_ok());
    }

    #[test]
    fn test_corrupt_serial_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial");
        fs::write(&path, "not hex at all\n").unwrap();
        let state = SerialState::open(&path).unwrap();
        assert!(matches!(state.peek(), Err(CaError::Persistence { .. })));
    }
}
