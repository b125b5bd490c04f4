//! Command-line interface.
//!
//! Flags and environment variables carry the full configuration; the
//! interactive prompts are a fallback used only when a required field is
//! missing, so the tool stays scriptable. All issuance logic lives in the
//! library modules; this layer only resolves inputs, reports results, and
//! maps errors to exit codes.

use crate::configs::{AppConfig, DistinguishedName, DnDefaults, SanEntry, SubjectAltNames};
use crate::error::{CaError, Result};
use crate::generate_leaf::{issue_leaf, LeafConfig};
use crate::generate_root_ca::{generate_root_ca, RootCaConfig};
use crate::private_key_storage::{save_private_key, KEY_FILE_MODE};
use crate::serial_state::SerialState;
use crate::storage::{
    store_key_certificate, write_certificate, write_file, write_fullchain, CaPaths,
    CertificateAuthority, LeafPaths,
};
use clap::{Args, Parser, Subcommand};
use openssl::x509::{X509NameRef, X509};
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "localca")]
#[command(version, about = "Minimal local certificate authority for self-hosted deployments")]
pub struct Cli {
    /// TOML file with issuance defaults (built-ins apply when absent)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a self-signed root CA and initialize its serial state
    CreateCa(CreateCaArgs),

    /// Issue a leaf certificate signed by the root CA
    IssueLeaf(IssueLeafArgs),

    /// Show the root certificate and the next serial to be issued
    ShowCa(ShowCaArgs),
}

#[derive(Args)]
pub struct CreateCaArgs {
    /// Common name for the CA; prompted for when omitted
    #[arg(long)]
    pub cn: Option<String>,

    #[arg(long)]
    pub org: Option<String>,

    #[arg(long)]
    pub ou: Option<String>,

    /// Two-letter country code
    #[arg(long)]
    pub country: Option<String>,

    #[arg(long)]
    pub state: Option<String>,

    #[arg(long)]
    pub locality: Option<String>,

    #[arg(long)]
    pub email: Option<String>,

    /// RSA modulus size: 2048, 3072 or 4096
    #[arg(long)]
    pub key_bits: Option<u32>,

    #[arg(long)]
    pub validity_days: Option<u32>,

    /// Directory receiving ca.pem, ca.key.pem and serial
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Passphrase for the CA private key; prompted for when omitted
    #[arg(long, env = "LOCALCA_CA_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Overwrite existing key and certificate (serial state survives)
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct IssueLeafArgs {
    /// Common name (service host name); prompted for when omitted
    #[arg(long)]
    pub cn: Option<String>,

    /// DNS subject-alternative names; defaults to the common name
    #[arg(long = "dns", value_delimiter = ',')]
    pub dns: Vec<String>,

    /// IP subject-alternative names
    #[arg(long = "ip", value_delimiter = ',')]
    pub ip: Vec<String>,

    #[arg(long)]
    pub org: Option<String>,

    #[arg(long)]
    pub ou: Option<String>,

    /// Two-letter country code
    #[arg(long)]
    pub country: Option<String>,

    #[arg(long)]
    pub state: Option<String>,

    #[arg(long)]
    pub locality: Option<String>,

    #[arg(long)]
    pub email: Option<String>,

    /// RSA modulus size: 2048, 3072 or 4096
    #[arg(long)]
    pub key_bits: Option<u32>,

    #[arg(long)]
    pub validity_days: Option<u32>,

    /// Directory holding the CA material
    #[arg(long)]
    pub ca_dir: Option<PathBuf>,

    /// Output directory for the issued files
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// File stem for the outputs; defaults to a sanitized common name
    #[arg(long)]
    pub name: Option<String>,

    /// Also write a password-protected PKCS#12 archive
    #[arg(long)]
    pub p12: bool,

    /// PKCS#12 export password; prompted for when --p12 is set and this
    /// is omitted
    #[arg(long, env = "LOCALCA_P12_PASSWORD", hide_env_values = true)]
    pub p12_password: Option<String>,

    /// Passphrase for the new leaf private key; prompted for when omitted
    #[arg(long, env = "LOCALCA_KEY_PASSPHRASE", hide_env_values = true)]
    pub key_passphrase: Option<String>,

    /// Passphrase for the CA private key; prompted for when omitted
    #[arg(long, env = "LOCALCA_CA_PASSPHRASE", hide_env_values = true)]
    pub ca_passphrase: Option<String>,

    /// Overwrite existing output files
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ShowCaArgs {
    /// Directory holding the CA material
    #[arg(long)]
    pub ca_dir: Option<PathBuf>,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = AppConfig::load_or_default(self.config.as_deref())?;
        match self.command {
            Commands::CreateCa(args) => run_create_ca(&config, args),
            Commands::IssueLeaf(args) => run_issue_leaf(&config, args),
            Commands::ShowCa(args) => run_show_ca(&config, args),
        }
    }
}

fn run_create_ca(config: &AppConfig, args: CreateCaArgs) -> Result<()> {
    let common_name = match args.cn {
        Some(cn) => cn,
        None if !config.ca.common_name.is_empty() => config.ca.common_name.clone(),
        None => prompt_line("Common name for the root CA")?,
    };
    let dn = resolve_dn(
        &config.dn,
        common_name,
        args.org,
        args.ou,
        args.country,
        args.state,
        args.locality,
        args.email,
    );
    let passphrase = match args.passphrase {
        Some(raw) => SecretString::new(raw),
        None => prompt_new_secret("Passphrase for the CA private key")?,
    };

    let ca_config = RootCaConfig {
        key_bits: args.key_bits.unwrap_or(config.ca.key_bits),
        validity_days: args.validity_days.unwrap_or(config.ca.validity_days),
        dn,
        passphrase,
    };
    let paths = CaPaths::new(args.out_dir.unwrap_or_else(|| config.ca.dir.clone()));

    let (key, cert) = generate_root_ca(&ca_config)?;
    println!("✓ Root CA key pair and certificate generated");

    store_key_certificate(&paths, &key, &cert, &ca_config.passphrase, args.force)?;
    println!("✓ Root CA stored in {}", paths.dir().display());
    println!("  certificate: {}", paths.cert_path().display());
    println!("  private key: {}", paths.key_path().display());
    println!("  serial:      {}", paths.serial_path().display());
    Ok(())
}

fn run_issue_leaf(config: &AppConfig, args: IssueLeafArgs) -> Result<()> {
    let common_name = match args.cn {
        Some(cn) => cn,
        None => prompt_line("Common name for the certificate")?,
    };
    let dn = resolve_dn(
        &config.dn,
        common_name.clone(),
        args.org,
        args.ou,
        args.country,
        args.state,
        args.locality,
        args.email,
    );

    let mut entries: Vec<SanEntry> = args.dns.into_iter().map(SanEntry::Dns).collect();
    for raw in &args.ip {
        let addr: IpAddr = raw
            .parse()
            .map_err(|_| CaError::InvalidConfig(format!("invalid IP address {raw:?}")))?;
        entries.push(SanEntry::Ip(addr));
    }

    let ca_paths = CaPaths::new(args.ca_dir.unwrap_or_else(|| config.ca.dir.clone()));
    let ca_passphrase = match args.ca_passphrase {
        Some(raw) => SecretString::new(raw),
        None => prompt_secret("Passphrase for the CA private key")?,
    };
    let ca = CertificateAuthority::load(&ca_paths, &ca_passphrase)?;

    let key_passphrase = match args.key_passphrase {
        Some(raw) => SecretString::new(raw),
        None => prompt_new_secret("Passphrase for the new leaf private key")?,
    };
    let want_pkcs12 = args.p12 || args.p12_password.is_some();
    let pkcs12_password = if want_pkcs12 {
        Some(match args.p12_password {
            Some(raw) => SecretString::new(raw),
            None => prompt_new_secret("PKCS#12 export password")?,
        })
    } else {
        None
    };

    let leaf_config = LeafConfig {
        key_bits: args.key_bits.unwrap_or(config.leaf.key_bits),
        validity_days: args.validity_days.unwrap_or(config.leaf.validity_days),
        dn,
        sans: SubjectAltNames::new(entries),
        passphrase: key_passphrase,
        pkcs12_password,
    };

    let issued = issue_leaf(&ca, &leaf_config)?;
    println!("✓ Certificate issued, serial {}", issued.serial_hex);

    let stem = args.name.unwrap_or_else(|| sanitize_file_stem(&common_name));
    let paths = LeafPaths::new(
        args.out_dir.unwrap_or_else(|| config.leaf.dir.clone()),
        stem,
    );
    paths.ensure_dir()?;

    let mut written: Vec<PathBuf> = Vec::new();
    let outcome = (|| -> Result<()> {
        save_private_key(
            &paths.key_path(),
            &issued.private_key,
            &leaf_config.passphrase,
            args.force,
        )?;
        written.push(paths.key_path());
        write_certificate(&paths.cert_path(), &issued.certificate, args.force)?;
        written.push(paths.cert_path());
        write_fullchain(
            &paths.fullchain_path(),
            &issued.certificate,
            ca.cert(),
            args.force,
        )?;
        written.push(paths.fullchain_path());
        if let Some(der) = &issued.pkcs12 {
            write_file(&paths.pkcs12_path(), der, args.force, Some(KEY_FILE_MODE))?;
            written.push(paths.pkcs12_path());
        }
        Ok(())
    })();
    if let Err(e) = outcome {
        if !written.is_empty() {
            eprintln!("partial artifacts left on disk:");
            for path in &written {
                eprintln!("  {}", path.display());
            }
        }
        return Err(e);
    }

    for path in &written {
        println!("✓ wrote {}", path.display());
    }
    Ok(())
}

fn run_show_ca(config: &AppConfig, args: ShowCaArgs) -> Result<()> {
    let paths = CaPaths::new(args.ca_dir.unwrap_or_else(|| config.ca.dir.clone()));
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

    println!("subject:     {}", format_name(cert.subject_name()));
    println!("not before:  {}", cert.not_before());
    println!("not after:   {}", cert.not_after());

    let serial = SerialState::open(paths.serial_path())?;
    let next = serial.peek()?;
    let next_hex = next
        .to_hex_str()
        .map_err(|e| CaError::Signing(format!("failed to encode serial: {e}")))?;
    println!("next serial: {}", &*next_hex);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn resolve_dn(
    defaults: &DnDefaults,
    common_name: String,
    org: Option<String>,
    ou: Option<String>,
    country: Option<String>,
    state: Option<String>,
    locality: Option<String>,
    email: Option<String>,
) -> DistinguishedName {
    DistinguishedName {
        country: country.unwrap_or_else(|| defaults.country.clone()),
        state: state.unwrap_or_else(|| defaults.state.clone()),
        locality: locality.unwrap_or_else(|| defaults.locality.clone()),
        organization: org.unwrap_or_else(|| defaults.organization.clone()),
        organizational_unit: ou.unwrap_or_else(|| defaults.organizational_unit.clone()),
        common_name,
        email,
    }
}

fn format_name(name: &X509NameRef) -> String {
    name.entries()
        .filter_map(|entry| {
            let field = entry.object().nid().short_name().ok()?;
            let value = entry.data().as_utf8().ok()?;
            Some(format!("{field}={value}"))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Keep file stems boring: anything outside [A-Za-z0-9._-] becomes '_',
/// so wildcard names like `*.svc.internal` stay usable paths.
fn sanitize_file_stem(common_name: &str) -> String {
    common_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn prompt_line(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush().map_err(stdin_error)?;
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).map_err(stdin_error)?;
    Ok(buf.trim().to_string())
}

fn prompt_secret(label: &str) -> Result<SecretString> {
    rpassword::prompt_password(format!("{label}: "))
        .map(SecretString::new)
        .map_err(stdin_error)
}

/// Prompt twice for a passphrase that is being chosen, not recalled.
fn prompt_new_secret(label: &str) -> Result<SecretString> {
    let first = prompt_secret(label)?;
    let second = prompt_secret(&format!("{label} (again)"))?;
    if first.expose_secret() != second.expose_secret() {
        return Err(CaError::InvalidConfig(
            "passphrases do not match".to_string(),
        ));
    }
    Ok(first)
}

fn stdin_error(e: io::Error) -> CaError {
    CaError::persistence("(terminal)", e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_ca_flags() {
        let cli = Cli::try_parse_from([
            "localca",
            "create-ca",
            "--cn",
            "Test Root",
            "--key-bits",
            "2048",
            "--validity-days",
            "30",
            "--passphrase",
            "pw",
            "--out-dir",
            "/tmp/ca",
            "--force",
        ])
        .unwrap();
        match cli.command {
            Commands::CreateCa(args) => {
                assert_eq!(args.cn.as_deref(), Some("Test Root"));
                assert_eq!(args.key_bits, Some(2048));
                assert_eq!(args.validity_days, Some(30));
                assert!(args.force);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_parse_issue_leaf_san_lists() {
        let cli = Cli::try_parse_from([
            "localca",
            "issue-leaf",
            "--cn",
            "svc.internal",
            "--dns",
            "svc.internal,alt.internal",
            "--ip",
            "10.0.0.7",
            "--p12",
        ])
        .unwrap();
        match cli.command {
            Commands::IssueLeaf(args) => {
                assert_eq!(args.dns, vec!["svc.internal", "alt.internal"]);
                assert_eq!(args.ip, vec!["10.0.0.7"]);
                assert!(args.p12);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("svc.internal"), "svc.internal");
        assert_eq!(sanitize_file_stem("*.svc.internal"), "_.svc.internal");
        assert_eq!(sanitize_file_stem("my service"), "my_service");
    }

    #[test]
    fn test_resolve_dn_prefers_flags_over_defaults() {
        let defaults = DnDefaults::default();
        let dn = resolve_dn(
            &defaults,
            "svc.internal".to_string(),
            Some("Acme".to_string()),
            None,
            None,
            None,
            None,
            None,
        );
        assert_eq!(dn.organization, "Acme");
        assert_eq!(dn.organizational_unit, defaults.organizational_unit);
        assert_eq!(dn.common_name, "svc.internal");
    }
}
