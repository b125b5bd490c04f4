//! Configuration defaults and shared subject types.
//!
//! Issuance defaults can be supplied through an optional TOML file
//! (`localca.toml`); every field has a documented built-in default, and
//! command-line flags override both. The subject types
//! ([`DistinguishedName`], [`SubjectAltNames`]) are shared by the root CA
//! and leaf issuance paths so that divergent per-certificate defaults stay
//! configuration, not separate code paths.

use crate::error::{CaError, Result};
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::X509Name;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// RSA modulus sizes accepted for both CA and leaf keys.
pub const SUPPORTED_RSA_KEY_BITS: [u32; 3] = [2048, 3072, 4096];

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "localca.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub dn: DnDefaults,
    #[serde(default)]
    pub ca: CaDefaults,
    #[serde(default)]
    pub leaf: LeafDefaults,
}

/// Subject defaults shared by root and leaf certificates. The common name
/// is deliberately absent here; it is always per-certificate.
#[derive(Debug, Deserialize, Clone)]
pub struct DnDefaults {
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default = "default_organizational_unit")]
    pub organizational_unit: String,
    #[serde(default = "default_locality")]
    pub locality: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_country")]
    pub country: String,
}

impl Default for DnDefaults {
    fn default() -> Self {
        Self {
            organization: default_organization(),
            organizational_unit: default_organizational_unit(),
            locality: default_locality(),
            state: default_state(),
            country: default_country(),
        }
    }
}

fn default_organization() -> String {
    "Self-Hosted".to_string()
}

fn default_organizational_unit() -> String {
    "Operations".to_string()
}

fn default_locality() -> String {
    "Portland".to_string()
}

fn default_state() -> String {
    "Oregon".to_string()
}

fn default_country() -> String {
    "US".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaDefaults {
    /// Root CA common name. Empty means unset; the CLI prompts for it.
    #[serde(default)]
    pub common_name: String,
    #[serde(default = "default_ca_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_ca_key_bits")]
    pub key_bits: u32,
    #[serde(default = "default_ca_dir")]
    pub dir: PathBuf,
}

impl Default for CaDefaults {
    fn default() -> Self {
        Self {
            common_name: String::new(),
            validity_days: default_ca_validity_days(),
            key_bits: default_ca_key_bits(),
            dir: default_ca_dir(),
        }
    }
}

fn default_ca_validity_days() -> u32 {
    3650 // 10 years
}

fn default_ca_key_bits() -> u32 {
    4096
}

fn default_ca_dir() -> PathBuf {
    PathBuf::from("pki/ca")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LeafDefaults {
    #[serde(default = "default_leaf_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_leaf_key_bits")]
    pub key_bits: u32,
    #[serde(default = "default_leaf_dir")]
    pub dir: PathBuf,
}

impl Default for LeafDefaults {
    fn default() -> Self {
        Self {
            validity_days: default_leaf_validity_days(),
            key_bits: default_leaf_key_bits(),
            dir: default_leaf_dir(),
        }
    }
}

fn default_leaf_validity_days() -> u32 {
    200
}

fn default_leaf_key_bits() -> u32 {
    3072
}

fn default_leaf_dir() -> PathBuf {
    PathBuf::from("pki/issued")
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| CaError::persistence(path, e))?;
        toml::from_str(&raw)
            .map_err(|e| CaError::InvalidConfig(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load from an explicit path, from `localca.toml` if present, or fall
    /// back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Validate an RSA modulus size against the supported set.
pub fn validate_key_bits(bits: u32) -> Result<()> {
    if SUPPORTED_RSA_KEY_BITS.contains(&bits) {
        Ok(())
    } else {
        Err(CaError::InvalidConfig(format!(
            "unsupported RSA key size {bits}; expected one of {SUPPORTED_RSA_KEY_BITS:?}"
        )))
    }
}

// ================= Subject types =================

/// X.500 subject fields attached to a certificate request. Immutable once
/// a request has been built from it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
    pub common_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl DistinguishedName {
    pub fn validate(&self) -> Result<()> {
        if self.common_name.trim().is_empty() {
            return Err(CaError::InvalidConfig(
                "common name must not be empty".to_string(),
            ));
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CaError::InvalidConfig(format!(
                "country must be a 2-letter code, got {:?}",
                self.country
            )));
        }
        Ok(())
    }

    /// Build the openssl subject name, entries in conventional C/ST/L/O/OU/CN
    /// order with the optional email last.
    pub fn to_x509_name(&self) -> Result<X509Name> {
        use openssl::nid::Nid;

        let mut builder = X509Name::builder()
            .map_err(|e| CaError::InvalidConfig(format!("failed to create name builder: {e}")))?;
        let entries = [
            (Nid::COUNTRYNAME, &self.country),
            (Nid::STATEORPROVINCENAME, &self.state),
            (Nid::LOCALITYNAME, &self.locality),
            (Nid::ORGANIZATIONNAME, &self.organization),
            (Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit),
            (Nid::COMMONNAME, &self.common_name),
        ];
        for (nid, value) in entries {
            builder.append_entry_by_nid(nid, value).map_err(|e| {
                CaError::InvalidConfig(format!("invalid distinguished name entry {value:?}: {e}"))
            })?;
        }
        if let Some(email) = &self.email {
            builder
                .append_entry_by_nid(Nid::PKCS9_EMAILADDRESS, email)
                .map_err(|e| CaError::InvalidConfig(format!("invalid email {email:?}: {e}")))?;
        }
        Ok(builder.build())
    }
}

/// One subject-alternative-name entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanEntry {
    Dns(String),
    Ip(IpAddr),
}

/// Ordered subject-alternative-name set. Must be non-empty by the time a
/// leaf request is built; [`SubjectAltNames::ensure_primary_dns`] defaults
/// the primary DNS entry to the common name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltNames {
    entries: Vec<SanEntry>,
}

impl SubjectAltNames {
    pub fn new(entries: Vec<SanEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SanEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `DNS:<common_name>` at the front unless a DNS entry is
    /// already present.
    pub fn ensure_primary_dns(&mut self, common_name: &str) {
        let has_dns = self
            .entries
            .iter()
            .any(|entry| matches!(entry, SanEntry::Dns(_)));
        if !has_dns {
            self.entries
                .insert(0, SanEntry::Dns(common_name.to_string()));
        }
    }

    /// Feed the entries into an openssl extension builder, in order.
    pub fn apply(&self, san: &mut SubjectAlternativeName) {
        for entry in &self.entries {
            match entry {
                SanEntry::Dns(name) => {
                    san.dns(name);
                }
                SanEntry::Ip(addr) => {
                    san.ip(&addr.to_string());
                }
            }
        }
    }
}
