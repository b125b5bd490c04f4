//! Leaf (end-entity) certificate issuance.
//!
//! Issues TLS server/client certificates signed by the root CA:
//!
//! ```text
//! Root CA (self-signed, pathlen=1)
//!   └── Leaf certificate ← this module
//! ```
//!
//! # X.509 Extensions
//! - **Basic Constraints**: CA=false, critical
//! - **Key Usage**: digitalSignature, keyEncipherment (critical)
//! - **Extended Key Usage**: serverAuth, clientAuth
//! - **Subject Alternative Name**: caller-supplied DNS/IP entries; the
//!   primary DNS entry defaults to the common name
//! - **Authority Key Identifier**: keyed to the issuing CA
//!
//! Issuance goes through a real certificate request: the request is built,
//! verified against its own public key, and only then countersigned with
//! the CA key and the next durable serial. The finished certificate is
//! verified against the CA before it is returned; that check failing means
//! a bug in this module, not operator error.
//!
//! # Example
//! ```rust,no_run
//! # use localca::storage::CertificateAuthority;
//! # use localca::configs::{DistinguishedName, SubjectAltNames};
//! # use localca::generate_leaf::{issue_leaf, LeafConfig};
//! # use secrecy::SecretString;
//! # fn example(ca: &CertificateAuthority, dn: DistinguishedName) -> localca::Result<()> {
//! let leaf = issue_leaf(
//!     ca,
//!     &LeafConfig {
//!         key_bits: 3072,
//!         validity_days: 200,
//!         dn,
//!         sans: SubjectAltNames::default(),
//!         passphrase: SecretString::new("leaf key passphrase".into()),
//!         pkcs12_password: None,
//!     },
//! )?;
//! println!("issued serial {}", leaf.serial_hex);
//! # Ok(())
//! # }
//! ```

use crate::configs::{validate_key_bits, DistinguishedName, SubjectAltNames};
use crate::error::{CaError, Result};
use crate::pfx_key::build_pfx;
use crate::private_key_storage::require_passphrase;
use crate::storage::CertificateAuthority;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509Req, X509StoreContext, X509};
use secrecy::SecretString;
use std::cmp::Ordering;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const CSR_VERSION_1: i32 = 0; // PKCS#10 v1 is represented by 0

/// Parameters for issuing one leaf certificate.
pub struct LeafConfig {
    /// RSA modulus size; one of 2048, 3072, 4096. Default 3072.
    pub key_bits: u32,
    /// Validity window starting now. Default 200 days; must fit inside the
    /// issuing CA's remaining validity.
    pub validity_days: u32,
    pub dn: DistinguishedName,
    /// DNS/IP identities. When no DNS entry is given, the common name
    /// becomes the primary DNS entry.
    pub sans: SubjectAltNames,
    /// Mandatory passphrase encrypting the leaf private key at rest.
    pub passphrase: SecretString,
    /// When set, the result also carries a PKCS#12 archive of key,
    /// certificate and CA chain protected by this password.
    pub pkcs12_password: Option<SecretString>,
}

impl LeafConfig {
    pub fn validate(&self) -> Result<()> {
        validate_key_bits(self.key_bits)?;
        if self.validity_days == 0 {
            return Err(CaError::InvalidConfig(
                "validity must be at least one day".to_string(),
            ));
        }
        self.dn.validate()?;
        require_passphrase(&self.passphrase)?;
        if let Some(password) = &self.pkcs12_password {
            require_passphrase(password)?;
        }
        Ok(())
    }
}

/// One issued leaf: key pair, signed certificate, the serial it consumed,
/// and the optional PKCS#12 archive. Never mutated after issuance; renewal
/// means issuing a fresh one.
#[derive(Debug)]
pub struct IssuedLeaf {
    pub private_key: PKey<Private>,
    pub certificate: X509,
    pub serial_hex: String,
    pub pkcs12: Option<Vec<u8>>,
}

/// Issue a leaf certificate under `ca`.
///
/// Everything happens in memory; persisting the results is the caller's
/// concern. The only side effect is the durable serial increment, which is
/// persisted before the signature is produced.
pub fn issue_leaf(ca: &CertificateAuthority, config: &LeafConfig) -> Result<IssuedLeaf> {
    config.validate()?;

    let mut sans = config.sans.clone();
    sans.ensure_primary_dns(&config.dn.common_name);

    let not_before = Asn1Time::days_from_now(0)
        .map_err(|e| CaError::Signing(format!("failed to compute validity start: {e}")))?;
    let not_after = Asn1Time::days_from_now(config.validity_days)
        .map_err(|e| CaError::Signing(format!("failed to compute validity end: {e}")))?;
    let containment = not_after
        .compare(ca.cert().not_after())
        .map_err(|e| CaError::Signing(format!("failed to compare validity windows: {e}")))?;
    if containment == Ordering::Greater {
        return Err(CaError::InvalidConfig(format!(
            "requested validity of {} days outlives the CA certificate (expires {})",
            config.validity_days,
            ca.cert().not_after()
        )));
    }

    // Generate leaf RSA key pair
    let rsa = openssl::rsa::Rsa::generate(config.key_bits)
        .map_err(|e| CaError::KeyGeneration(format!("failed to generate RSA key pair: {e}")))?;
    let private_key = PKey::from_rsa(rsa)
        .map_err(|e| CaError::KeyGeneration(format!("failed to wrap RSA key: {e}")))?;

    let subject = config.dn.to_x509_name()?;
    let request = build_request(&private_key, &subject, &sans)
        .map_err(|e| CaError::Signing(format!("failed to build certificate request: {e}")))?;

    // The request must verify against its own public key before the CA
    // key touches it.
    let consistent = request
        .verify(&private_key)
        .map_err(|e| CaError::MalformedRequest(format!("request verification failed: {e}")))?;
    if !consistent {
        return Err(CaError::MalformedRequest(
            "request signature does not match its public key".to_string(),
        ));
    }

    // The serial's successor is durable before any signature exists, so a
    // crash here skips a serial rather than reissuing it.
    let serial = ca.serial().next_serial()?;
    let serial_hex = serial
        .to_hex_str()
        .map_err(|e| CaError::Signing(format!("failed to encode serial: {e}")))?
        .to_string();

    let certificate = sign_request(ca, &request, &sans, &serial, &not_before, &not_after)
        .map_err(|e| CaError::Signing(format!("failed to sign certificate: {e}")))?;

    verify_chain(ca.cert(), &certificate)?;

    let pkcs12 = match &config.pkcs12_password {
        Some(password) => Some(build_pfx(
            &config.dn.common_name,
            &private_key,
            &certificate,
            std::slice::from_ref(ca.cert()),
            password,
        )?),
        None => None,
    };

    Ok(IssuedLeaf {
        private_key,
        certificate,
        serial_hex,
        pkcs12,
    })
}

fn build_request(
    key: &PKey<Private>,
    subject: &openssl::x509::X509NameRef,
    sans: &SubjectAltNames,
) -> std::result::Result<X509Req, ErrorStack> {
    let mut builder = X509Req::builder()?;
    builder.set_version(CSR_VERSION_1)?;
    builder.set_subject_name(subject)?;
    builder.set_pubkey(key)?;

    let mut extensions = Stack::new()?;
    extensions.push(BasicConstraints::new().critical().build()?)?;
    extensions.push(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    extensions.push(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;
    let san_extension = {
        let mut san = SubjectAlternativeName::new();
        sans.apply(&mut san);
        san.build(&builder.x509v3_context(None))?
    };
    extensions.push(san_extension)?;
    builder.add_extensions(&extensions)?;

    builder.sign(key, MessageDigest::sha256())?;
    Ok(builder.build())
}

fn sign_request(
    ca: &CertificateAuthority,
    request: &X509Req,
    sans: &SubjectAltNames,
    serial: &BigNum,
    not_before: &Asn1Time,
    not_after: &Asn1Time,
) -> std::result::Result<X509, ErrorStack> {
    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;
    let serial_number = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial_number)?;

    builder.set_subject_name(request.subject_name())?;
    builder.set_issuer_name(ca.cert().subject_name())?;

    builder.set_not_before(not_before)?;
    builder.set_not_after(not_after)?;

    let request_pubkey = request.public_key()?;
    builder.set_pubkey(&request_pubkey)?;

    builder.append_extension(BasicConstraints::new().critical().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;
    let san_extension = {
        let mut san = SubjectAlternativeName::new();
        sans.apply(&mut san);
        san.build(&builder.x509v3_context(Some(ca.cert()), None))?
    };
    builder.append_extension(san_extension)?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(true)
        .build(&builder.x509v3_context(Some(ca.cert()), None))?;
    builder.append_extension(aki)?;

    builder.sign(ca.key(), MessageDigest::sha256())?;
    Ok(builder.build())
}

/// Verify `cert` against `issuer` as the sole trust anchor.
pub fn verify_chain(issuer: &X509, cert: &X509) -> Result<()> {
    let backend = |e: ErrorStack| CaError::ChainVerification(format!("verification backend: {e}"));

    let mut store = X509StoreBuilder::new().map_err(backend)?;
    store.add_cert(issuer.clone()).map_err(backend)?;
    let store = store.build();

    let chain = Stack::new().map_err(backend)?;
    let mut ctx = X509StoreContext::new().map_err(backend)?;
    let failure = ctx
        .init(&store, cert, &chain, |c| {
            let verified = c.verify_cert()?;
            if verified {
                Ok(None)
            } else {
                Ok(Some(c.error().error_string().to_string()))
            }
        })
        .map_err(backend)?;

    match failure {
        None => Ok(()),
        Some(reason) => Err(CaError::ChainVerification(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_root_ca::{generate_root_ca, RootCaConfig};
    use crate::storage::{store_key_certificate, CaPaths};
    use std::fs;
    use tempfile::TempDir;

    fn passphrase(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    fn test_dn(common_name: &str) -> DistinguishedName {
        DistinguishedName {
            country: "US".to_string(),
            state: "Oregon".to_string(),
            locality: "Portland".to_string(),
            organization: "Self-Hosted".to_string(),
            organizational_unit: "Operations".to_string(),
            common_name: common_name.to_string(),
            email: None,
        }
    }

    fn test_ca(dir: &TempDir, validity_days: u32) -> (CaPaths, CertificateAuthority) {
        let config = RootCaConfig {
            key_bits: 2048,
            validity_days,
            dn: test_dn("Leaf Test Root"),
            passphrase: passphrase("root-pw"),
        };
        let (key, cert) = generate_root_ca(&config).unwrap();
        let paths = CaPaths::new(dir.path().join("ca"));
        store_key_certificate(&paths, &key, &cert, &passphrase("root-pw"), false).unwrap();
        let ca = CertificateAuthority::load(&paths, &passphrase("root-pw")).unwrap();
        (paths, ca)
    }

    fn leaf_config(common_name: &str) -> LeafConfig {
        LeafConfig {
            key_bits: 2048,
            validity_days: 200,
            dn: test_dn(common_name),
            sans: SubjectAltNames::default(),
            passphrase: passphrase("leaf-pw"),
            pkcs12_password: None,
        }
    }

    #[test]
    fn test_issued_leaf_chains_to_ca() {
        let dir = TempDir::new().unwrap();
        let (_, ca) = test_ca(&dir, 3650);

        let leaf = issue_leaf(&ca, &leaf_config("svc.internal")).unwrap();
        verify_chain(ca.cert(), &leaf.certificate).unwrap();

        // end-entity marking and usable key pair
        let text = String::from_utf8(leaf.certificate.to_text().unwrap()).unwrap();
        assert!(text.contains("CA:FALSE"));
        assert!(leaf
            .private_key
            .public_eq(&leaf.certificate.public_key().unwrap()));
    }

    #[test]
    fn test_san_defaults_to_common_name() {
        let dir = TempDir::new().unwrap();
        let (_, ca) = test_ca(&dir, 3650);

        let leaf = issue_leaf(&ca, &leaf_config("svc.internal")).unwrap();
        let stack = leaf.certificate.subject_alt_names().unwrap();
        let sans: Vec<_> = stack.iter().collect();
        assert_eq!(sans.len(), 1);
        assert_eq!(sans[0].dnsname(), Some("svc.internal"));
    }

    #[test]
    fn test_explicit_sans_preserved_in_order() {
        let dir = TempDir::new().unwrap();
        let (_, ca) = test_ca(&dir, 3650);

        let mut config = leaf_config("svc.internal");
        config.sans = SubjectAltNames::new(vec![
            crate::configs::SanEntry::Dns("svc.internal".to_string()),
            crate::configs::SanEntry::Dns("alt.internal".to_string()),
            crate::configs::SanEntry::Ip("10.0.0.7".parse().unwrap()),
        ]);
        let leaf = issue_leaf(&ca, &config).unwrap();

        let stack = leaf.certificate.subject_alt_names().unwrap();
        let sans: Vec<_> = stack.iter().collect();
        assert_eq!(sans.len(), 3);
        assert_eq!(sans[0].dnsname(), Some("svc.internal"));
        assert_eq!(sans[1].dnsname(), Some("alt.internal"));
        assert_eq!(sans[2].ipaddress(), Some(&[10u8, 0, 0, 7][..]));
    }

    #[test]
    fn test_extended_key_usage_covers_server_and_client() {
        let dir = TempDir::new().unwrap();
        let (_, ca) = test_ca(&dir, 3650);

        let leaf = issue_leaf(&ca, &leaf_config("svc.internal")).unwrap();
        let text = String::from_utf8(leaf.certificate.to_text().unwrap()).unwrap();
        assert!(text.contains("TLS Web Server Authentication"));
        assert!(text.contains("TLS Web Client Authentication"));
        assert!(text.contains("Digital Signature"));
        assert!(text.contains("Key Encipherment"));
    }

    #[test]
    fn test_serials_are_pairwise_distinct() {
        let dir = TempDir::new().unwrap();
        let (_, ca) = test_ca(&dir, 3650);

        let mut serials = Vec::new();
        for i in 0..4 {
            let leaf = issue_leaf(&ca, &leaf_config(&format!("svc{i}.internal"))).unwrap();
            serials.push(leaf.serial_hex);
        }
        let before = serials.len();
        serials.sort();
        serials.dedup();
        assert_eq!(serials.len(), before);
    }

    #[test]
    fn test_leaf_must_not_outlive_ca() {
        let dir = TempDir::new().unwrap();
        let (paths, ca) = test_ca(&dir, 10);
        let serial_before = fs::read_to_string(paths.serial_path()).unwrap();

        let err = issue_leaf(&ca, &leaf_config("svc.internal")).unwrap_err();
        assert!(matches!(err, CaError::InvalidConfig(_)));

        // refused before the serial was consumed
        assert_eq!(
            fs::read_to_string(paths.serial_path()).unwrap(),
            serial_before
        );
    }

    #[test]
    fn test_wrong_ca_passphrase_consumes_no_serial() {
        let dir = TempDir::new().unwrap();
        let (paths, _) = test_ca(&dir, 3650);
        let serial_before = fs::read_to_string(paths.serial_path()).unwrap();

        let err = CertificateAuthority::load(&paths, &passphrase("wrong")).unwrap_err();
        assert!(matches!(err, CaError::Signing(_)));
        assert_eq!(
            fs::read_to_string(paths.serial_path()).unwrap(),
            serial_before
        );
    }

    #[test]
    fn test_serial_is_embedded_in_certificate() {
        let dir = TempDir::new().unwrap();
        let (_, ca) = test_ca(&dir, 3650);

        let leaf = issue_leaf(&ca, &leaf_config("svc.internal")).unwrap();
        let embedded = leaf
            .certificate
            .serial_number()
            .to_bn()
            .unwrap()
            .to_hex_str()
            .unwrap()
            .to_string();
        assert_eq!(embedded, leaf.serial_hex);
    }

    #[test]
    fn test_unrelated_ca_fails_chain_verification() {
        let dir = TempDir::new().unwrap();
        let (_, ca) = test_ca(&dir, 3650);
        let other_dir = TempDir::new().unwrap();
        let (_, other_ca) = test_ca(&other_dir, 3650);

        let leaf = issue_leaf(&ca, &leaf_config("svc.internal")).unwrap();
        let err = verify_chain(other_ca.cert(), &leaf.certificate).unwrap_err();
        assert!(matches!(err, CaError::ChainVerification(_)));
    }
}
