//! localca - Minimal Local Certificate Authority
//!
//! A small toolkit for provisioning TLS for self-hosted deployments: create
//! one self-signed root CA per trust domain, then issue end-entity
//! certificates under it for each service or host.
//!
//! ```text
//! Root CA (self-signed, pathlen=1)
//!   └── Leaf certificate (CA=false, serverAuth + clientAuth)
//! ```
//!
//! # What it guarantees
//!
//! - **Chain of trust**: every issued certificate is verified against the
//!   CA before it is returned; a leaf can never silently fail to chain.
//! - **Serial uniqueness**: serials come from a durable, lock-protected
//!   counter seeded with 128 bits of entropy. The incremented counter hits
//!   disk before the signature is produced, so a crash can skip a serial
//!   but never reuse one.
//! - **Keys encrypted at rest**: private keys are PKCS#8 PEM encrypted
//!   with AES-256-CBC under a mandatory passphrase and written with
//!   owner-read-only permissions. An empty passphrase is a hard error.
//! - **Bounded leaf validity**: a leaf whose requested lifetime would
//!   outlive the CA certificate is refused.
//!
//! # Module Overview
//!
//! - [`generate_root_ca`]: self-signed root CA generation
//! - [`generate_leaf`]: end-entity issuance (request, sign, verify)
//! - [`serial_state`]: the durable serial counter
//! - [`storage`]: file layout, persistence, CA loading
//! - [`private_key_storage`]: encrypted private-key files
//! - [`pfx_key`]: PKCS#12 export and import
//! - [`configs`]: TOML defaults and subject types
//! - [`cli`]: the `create-ca` / `issue-leaf` / `show-ca` commands
//!
//! # Example
//!
//! ```no_run
//! use localca::configs::{DistinguishedName, SubjectAltNames};
//! use localca::generate_leaf::{issue_leaf, LeafConfig};
//! use localca::generate_root_ca::{generate_root_ca, RootCaConfig};
//! use localca::storage::{store_key_certificate, CaPaths, CertificateAuthority};
//! use secrecy::SecretString;
//!
//! fn main() -> localca::Result<()> {
//!     let dn = DistinguishedName {
//!         country: "US".into(),
//!         state: "Oregon".into(),
//!         locality: "Portland".into(),
//!         organization: "Self-Hosted".into(),
//!         organizational_unit: "Operations".into(),
//!         common_name: "Home Lab Root CA".into(),
//!         email: None,
//!     };
//!     let (key, cert) = generate_root_ca(&RootCaConfig {
//!         key_bits: 4096,
//!         validity_days: 3650,
//!         dn: dn.clone(),
//!         passphrase: SecretString::new("root passphrase".into()),
//!     })?;
//!
//!     let paths = CaPaths::new("pki/ca");
//!     store_key_certificate(&paths, &key, &cert, &SecretString::new("root passphrase".into()), false)?;
//!
//!     let ca = CertificateAuthority::load(&paths, &SecretString::new("root passphrase".into()))?;
//!     let leaf = issue_leaf(
//!         &ca,
//!         &LeafConfig {
//!             key_bits: 3072,
//!             validity_days: 200,
//!             dn: DistinguishedName {
//!                 common_name: "svc.internal".into(),
//!                 ..dn
//!             },
//!             sans: SubjectAltNames::default(),
//!             passphrase: SecretString::new("leaf passphrase".into()),
//!             pkcs12_password: None,
//!         },
//!     )?;
//!     println!("issued serial {}", leaf.serial_hex);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod configs;
pub mod error;
pub mod generate_leaf;
pub mod generate_root_ca;
pub mod pfx_key;
pub mod private_key_storage;
pub mod serial_state;
pub mod storage;

pub use error::{CaError, Result};
