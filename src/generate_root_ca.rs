//! Root CA certificate generation.
//!
//! The root is the trust anchor of a single-level hierarchy:
//!
//! ```text
//! Root CA (self-signed, pathlen=1)
//!   └── Leaf certificate (CA=false)
//! ```
//!
//! # Certificate Properties
//! - **Version**: X.509v3
//! - **Signature Algorithm**: SHA-256 with RSA
//! - **Basic Constraints**: CA=true, pathlen=1, critical
//! - **Key Usage**: keyCertSign, cRLSign (critical) — the root signs
//!   certificates and revocation lists, nothing else
//! - **Subject Key Identifier / Authority Key Identifier**: present,
//!   AKI referencing the certificate's own key
//! - **Serial Number**: random 128-bit value
//! - **Issuer**: same as subject (self-signed)

use crate::configs::{validate_key_bits, DistinguishedName};
use crate::error::{CaError, Result};
use crate::private_key_storage::require_passphrase;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::X509;
use secrecy::SecretString;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const ROOT_CA_PATH_LENGTH: u32 = 1;

/// Parameters for creating a self-signed root CA.
pub struct RootCaConfig {
    /// RSA modulus size; one of 2048, 3072, 4096. Default 4096.
    pub key_bits: u32,
    /// Validity window starting now. Default 3650 days.
    pub validity_days: u32,
    pub dn: DistinguishedName,
    /// Mandatory passphrase encrypting the private key at rest.
    pub passphrase: SecretString,
}

impl RootCaConfig {
    pub fn validate(&self) -> Result<()> {
        validate_key_bits(self.key_bits)?;
        if self.validity_days == 0 {
            return Err(CaError::InvalidConfig(
                "validity must be at least one day".to_string(),
            ));
        }
        self.dn.validate()?;
        require_passphrase(&self.passphrase)
    }
}

/// Generate an RSA key pair and a self-signed root CA certificate.
///
/// Persistence is the caller's concern (see [`crate::storage`]); this
/// function is pure key and certificate construction.
pub fn generate_root_ca(config: &RootCaConfig) -> Result<(PKey<Private>, X509)> {
    config.validate()?;

    // Generate RSA key pair
    let rsa = openssl::rsa::Rsa::generate(config.key_bits)
        .map_err(|e| CaError::KeyGeneration(format!("failed to generate RSA key pair: {e}")))?;
    let private_key = PKey::from_rsa(rsa)
        .map_err(|e| CaError::KeyGeneration(format!("failed to wrap RSA key: {e}")))?;

    let subject = config.dn.to_x509_name()?;
    let cert = build_root_certificate(&private_key, &subject, config.validity_days)
        .map_err(|e| CaError::Signing(format!("failed to build root certificate: {e}")))?;

    Ok((private_key, cert))
}

fn build_root_certificate(
    private_key: &PKey<Private>,
    subject: &openssl::x509::X509NameRef,
    validity_days: u32,
) -> std::result::Result<X509, ErrorStack> {
    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;

    // Random 128-bit serial for the root certificate itself; leaves get
    // theirs from the durable counter.
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let serial_number = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial_number)?;

    builder.set_subject_name(subject)?;
    builder.set_issuer_name(subject)?;

    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(validity_days)?;
    builder.set_not_after(&not_after)?;

    builder.set_pubkey(private_key)?;

    let basic_constraints = {
        let mut bc = BasicConstraints::new();
        bc.critical().ca().pathlen(ROOT_CA_PATH_LENGTH);
        bc.build()?
    };
    builder.append_extension(basic_constraints)?;

    let key_usage = KeyUsage::new().critical().key_cert_sign().crl_sign().build()?;
    builder.append_extension(key_usage)?;

    // SKI must be in place before the AKI below can reference it
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(true)
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(aki)?;

    builder.sign(private_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::stack::Stack;
    use openssl::x509::store::X509StoreBuilder;
    use openssl::x509::X509StoreContext;

    fn test_config(common_name: &str) -> RootCaConfig {
        RootCaConfig {
            key_bits: 2048,
            validity_days: 3650,
            dn: DistinguishedName {
                country: "US".to_string(),
                state: "Oregon".to_string(),
                locality: "Portland".to_string(),
                organization: "Self-Hosted".to_string(),
                organizational_unit: "Operations".to_string(),
                common_name: common_name.to_string(),
                email: None,
            },
            passphrase: SecretString::new("root-pw".to_string()),
        }
    }

    #[test]
    fn test_subject_and_ca_marking() {
        let (_, cert) = generate_root_ca(&test_config("Test Root")).unwrap();

        let cn = cert
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .unwrap();
        assert_eq!(cn.data().as_utf8().unwrap().to_string(), "Test Root");

        let text = String::from_utf8(cert.to_text().unwrap()).unwrap();
        assert!(text.contains("CA:TRUE"));
        assert!(text.contains("pathlen:1"));
        assert!(text.contains("Certificate Sign"));
        assert!(text.contains("CRL Sign"));
        assert!(text.contains("Subject Key Identifier"));
        assert!(text.contains("Authority Key Identifier"));
    }

    #[test]
    fn test_self_signature_verifies() {
        let (key, cert) = generate_root_ca(&test_config("Test Root")).unwrap();
        assert!(cert.verify(&key).unwrap());
    }

    #[test]
    fn test_root_verifies_against_itself_as_trust_anchor() {
        let (_, cert) = generate_root_ca(&test_config("Test Root")).unwrap();

        let mut store = X509StoreBuilder::new().unwrap();
        store.add_cert(cert.clone()).unwrap();
        let store = store.build();

        let chain = Stack::new().unwrap();
        let mut ctx = X509StoreContext::new().unwrap();
        let verified = ctx
            .init(&store, &cert, &chain, |c| c.verify_cert())
            .unwrap();
        assert!(verified);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut bad_bits = test_config("Test Root");
        bad_bits.key_bits = 1234;
        assert!(matches!(
            generate_root_ca(&bad_bits),
            Err(CaError::InvalidConfig(_))
        ));

        let mut zero_days = test_config("Test Root");
        zero_days.validity_days = 0;
        assert!(matches!(
            generate_root_ca(&zero_days),
            Err(CaError::InvalidConfig(_))
        ));

        let mut no_passphrase = test_config("Test Root");
        no_passphrase.passphrase = SecretString::new(String::new());
        assert!(matches!(
            generate_root_ca(&no_passphrase),
            Err(CaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_distinct_roots_get_distinct_serials() {
        let (_, a) = generate_root_ca(&test_config("Root A")).unwrap();
        let (_, b) = generate_root_ca(&test_config("Root B")).unwrap();
        let sa = a.serial_number().to_bn().unwrap();
        let sb = b.serial_number().to_bn().unwrap();
        assert_ne!(sa, sb);
    }
}
