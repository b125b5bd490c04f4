//! PKCS#12 archive handling.
//!
//! Bundles a private key with its certificate and the CA chain into a
//! single password-protected `.p12` file, the format reverse proxies and
//! desktop keystores import directly. Loading is the exact mirror and is
//! what the round-trip tests lean on.

use crate::error::{CaError, Result};
use crate::storage::write_file;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::io;
use std::path::Path;

/// Contents recovered from a PKCS#12 archive.
#[derive(Debug)]
pub struct PfxContents {
    pub key: PKey<Private>,
    pub cert: X509,
    pub chain: Vec<X509>,
}

/// Serialize key + certificate + chain into PKCS#12 DER protected by
/// `password`.
pub fn build_pfx(
    friendly_name: &str,
    key: &PKey<Private>,
    cert: &X509,
    chain: &[X509],
    password: &SecretString,
) -> Result<Vec<u8>> {
    let backend = |e: openssl::error::ErrorStack| {
        CaError::Signing(format!("failed to build PKCS#12 archive: {e}"))
    };

    let mut builder = Pkcs12::builder();
    builder.name(friendly_name).pkey(key).cert(cert);
    if !chain.is_empty() {
        let mut stack = Stack::new().map_err(backend)?;
        for issuer in chain {
            stack.push(issuer.clone()).map_err(backend)?;
        }
        builder.ca(stack);
    }

    let pkcs12 = builder.build2(password.expose_secret()).map_err(backend)?;
    pkcs12.to_der().map_err(backend)
}

/// Build and write a PKCS#12 archive. The file carries key material, so it
/// gets the same owner-read-only mode as key files.
pub fn save_pfx(
    path: &Path,
    friendly_name: &str,
    key: &PKey<Private>,
    cert: &X509,
    chain: &[X509],
    password: &SecretString,
    force: bool,
) -> Result<()> {
    let der = build_pfx(friendly_name, key, cert, chain, password)?;
    write_file(path, &der, force, Some(crate::private_key_storage::KEY_FILE_MODE))
}

/// Load a PKCS#12 archive and decrypt it with `password`.
pub fn load_pfx(path: &Path, password: &SecretString) -> Result<PfxContents> {
    let der = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CaError::MissingCa(path.to_path_buf()),
        _ => CaError::persistence(path, e),
    })?;
    let parsed = Pkcs12::from_der(&der)
        .map_err(|e| CaError::Signing(format!("failed to parse PKCS#12 archive: {e}")))?
        .parse2(password.expose_secret())
        .map_err(|e| {
            CaError::Signing(format!(
                "failed to decrypt PKCS#12 archive {}: {e}",
                path.display()
            ))
        })?;

    let key = parsed.pkey.ok_or_else(|| {
        CaError::Signing("PKCS#12 archive does not contain a private key".to_string())
    })?;
    let cert = parsed.cert.ok_or_else(|| {
        CaError::Signing("PKCS#12 archive does not contain a certificate".to_string())
    })?;
    let chain = parsed
        .ca
        .map(|stack| stack.iter().map(|c| c.to_owned()).collect())
        .unwrap_or_default();

    Ok(PfxContents { key, cert, chain })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::DistinguishedName;
    use crate::generate_root_ca::{generate_root_ca, RootCaConfig};
    use tempfile::TempDir;

    fn passphrase(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    fn test_material(common_name: &str) -> (PKey<Private>, X509) {
        generate_root_ca(&RootCaConfig {
            key_bits: 2048,
            validity_days: 365,
            dn: DistinguishedName {
                country: "US".to_string(),
                state: "Oregon".to_string(),
                locality: "Portland".to_string(),
                organization: "Self-Hosted".to_string(),
                organizational_unit: "Operations".to_string(),
                common_name: common_name.to_string(),
                email: None,
            },
            passphrase: passphrase("pw"),
        })
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.p12");
        let (key, cert) = test_material("Pfx Entity");
        let (_, issuer_cert) = test_material("Pfx Issuer");

        save_pfx(
            &path,
            "Pfx Entity",
            &key,
            &cert,
            std::slice::from_ref(&issuer_cert),
            &passphrase("export-pw"),
            false,
        )
        .unwrap();

        let contents = load_pfx(&path, &passphrase("export-pw")).unwrap();
        assert_eq!(contents.cert.to_der().unwrap(), cert.to_der().unwrap());
        assert!(contents.key.public_eq(&key));
        assert_eq!(contents.chain.len(), 1);
        assert_eq!(
            contents.chain[0].to_der().unwrap(),
            issuer_cert.to_der().unwrap()
        );
    }

    #[test]
    fn test_wrong_password_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.p12");
        let (key, cert) = test_material("Pfx Entity");
        save_pfx(&path, "x", &key, &cert, &[], &passphrase("right"), false).unwrap();

        let err = load_pfx(&path, &passphrase("wrong")).unwrap_err();
        assert!(matches!(err, CaError::Signing(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_is_owner_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.p12");
        let (key, cert) = test_material("Pfx Entity");
        save_pfx(&path, "x", &key, &cert, &[], &passphrase("pw"), false).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
