//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use magma_relation::CertificateKind;

use crate::config::{CertifierConfig, ConfigOverrides};
use crate::error::Result;

/// Magma certifier - certificate authority and bundle management.
#[derive(Parser, Debug, Clone)]
#[command(name = "magma-certifier")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, global = true, default_value_t = Format::Table)]
    pub format: Format,

    /// Log level filter (overrides `RUST_LOG`).
    #[arg(long, global = true, env = "MAGMA_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "MAGMA_LOG_JSON")]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Generate the certificate bundle, or load it if it already exists.
    Bundle(BundleArgs),

    /// Renew one kind of bundle material in place.
    Renew {
        /// Bundle settings.
        #[command(flatten)]
        bundle: BundleArgs,

        /// Kind to renew.
        #[arg(value_enum)]
        kind: KindArg,
    },

    /// Generate an RSA private key.
    Key(KeyArgs),

    /// Create a certificate signing request.
    Csr(CsrArgs),

    /// Create a self-signed CA certificate.
    Ca(CaArgs),

    /// Sign a CSR with a CA.
    Sign(SignArgs),

    /// Package a certificate and key as PKCS#12.
    Pfx(PfxArgs),

    /// Show certificate details.
    Inspect {
        /// PEM certificate file.
        cert: PathBuf,
    },
}

/// Bundle configuration; flags and `MAGMA_*` variables override the file.
#[derive(Args, Debug, Clone, Default)]
pub struct BundleArgs {
    /// JSON configuration file.
    #[arg(short, long, env = "MAGMA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Orchestrator domain.
    #[arg(long, env = "MAGMA_DOMAIN")]
    pub domain: Option<String>,

    /// Admin-operator PFX passphrase.
    #[arg(long, env = "MAGMA_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Directory holding the bundle files.
    #[arg(long, env = "MAGMA_CERTS_DIR")]
    pub certs_dir: Option<PathBuf>,

    /// Directory for relation state snapshots.
    #[arg(long, env = "MAGMA_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl BundleArgs {
    /// Resolves the effective configuration.
    ///
    /// Without a config file a domain must be given on the command line or
    /// in the environment.
    pub fn resolve(&self) -> Result<CertifierConfig> {
        let mut config = match &self.config {
            Some(path) => CertifierConfig::from_file(path)?,
            None => CertifierConfig::new(String::new()),
        };
        config.apply(ConfigOverrides {
            domain: self.domain.clone(),
            passphrase: self.passphrase.clone(),
            certs_dir: self.certs_dir.clone(),
            state_dir: self.state_dir.clone(),
        });
        config.validate()?;
        Ok(config)
    }
}

/// Certificate kinds as CLI values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Root CA certificate.
    RootCa,
    /// Controller wildcard certificate.
    Controller,
    /// Admin-operator certificate, key and PFX.
    AdminOperator,
    /// Fluentd certificate and key.
    Fluentd,
    /// Bootstrapper key.
    Bootstrapper,
}

impl From<KindArg> for CertificateKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::RootCa => Self::RootCa,
            KindArg::Controller => Self::Controller,
            KindArg::AdminOperator => Self::AdminOperator,
            KindArg::Fluentd => Self::Fluentd,
            KindArg::Bootstrapper => Self::Bootstrapper,
        }
    }
}

/// Arguments for the key command.
#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// Modulus size in bits.
    #[arg(long, default_value_t = 2048)]
    pub size: usize,

    /// Public exponent.
    #[arg(long, default_value_t = 65537)]
    pub exponent: u64,

    /// Encrypt the key with this password.
    #[arg(long, env = "MAGMA_KEY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// A private key on disk and its optional password.
#[derive(Args, Debug, Clone)]
pub struct KeyInput {
    /// PEM private key file.
    #[arg(long)]
    pub key: PathBuf,

    /// Password of an encrypted key.
    #[arg(long, env = "MAGMA_KEY_PASSWORD", hide_env_values = true)]
    pub key_password: Option<String>,
}

/// Arguments for the csr command.
#[derive(Args, Debug, Clone)]
pub struct CsrArgs {
    /// Key to sign the request with.
    #[command(flatten)]
    pub key: KeyInput,

    /// Common name.
    #[arg(long)]
    pub subject: String,

    /// Two-letter country.
    #[arg(long)]
    pub country: Option<String>,

    /// DNS alternative names.
    #[arg(long = "alt-name", value_name = "DNS")]
    pub alt_names: Vec<String>,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// Arguments for the ca command.
#[derive(Args, Debug, Clone)]
pub struct CaArgs {
    /// CA key.
    #[command(flatten)]
    pub key: KeyInput,

    /// Common name.
    #[arg(long)]
    pub subject: String,

    /// Two-letter country.
    #[arg(long, default_value = "US")]
    pub country: String,

    /// Validity in days.
    #[arg(long, default_value_t = 365, allow_negative_numbers = true)]
    pub days: i64,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// Arguments for the sign command.
#[derive(Args, Debug, Clone)]
pub struct SignArgs {
    /// PEM CSR file.
    #[arg(long)]
    pub csr: PathBuf,

    /// CA certificate file.
    #[arg(long)]
    pub ca_cert: PathBuf,

    /// CA key file.
    #[arg(long)]
    pub ca_key: PathBuf,

    /// Password of an encrypted CA key.
    #[arg(long, env = "MAGMA_CA_KEY_PASSWORD", hide_env_values = true)]
    pub ca_key_password: Option<String>,

    /// Validity in days.
    #[arg(long, default_value_t = 365, allow_negative_numbers = true)]
    pub days: i64,

    /// DNS alternative names; replaces any requested in the CSR.
    #[arg(long = "alt-name", value_name = "DNS")]
    pub alt_names: Vec<String>,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// Arguments for the pfx command.
#[derive(Args, Debug, Clone)]
pub struct PfxArgs {
    /// PEM certificate file.
    #[arg(long)]
    pub cert: PathBuf,

    /// Matching key.
    #[command(flatten)]
    pub key: KeyInput,

    /// PFX password.
    #[arg(long, env = "MAGMA_PFX_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Output file.
    #[arg(short, long)]
    pub out: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_bundle_flags() {
        let cli = Cli::parse_from([
            "magma-certifier",
            "bundle",
            "--domain",
            "magma.test",
            "--passphrase",
            "secret",
            "--certs-dir",
            "/tmp/certs",
        ]);
        let Commands::Bundle(args) = cli.command else {
            panic!("expected bundle command");
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.domain, "magma.test");
        assert_eq!(config.certs_dir, PathBuf::from("/tmp/certs"));
    }

    #[test]
    fn bundle_without_domain_is_rejected() {
        let args = BundleArgs {
            passphrase: Some("secret".into()),
            ..BundleArgs::default()
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn format_is_global() {
        let cli = Cli::parse_from(["magma-certifier", "inspect", "cert.pem", "--format", "json"]);
        assert_eq!(cli.format, Format::Json);
    }

    #[test]
    fn parses_renew_kind() {
        let cli = Cli::parse_from(["magma-certifier", "renew", "admin-operator", "--domain", "x.test"]);
        let Commands::Renew { kind, bundle } = cli.command else {
            panic!("expected renew command");
        };
        assert_eq!(CertificateKind::from(kind), CertificateKind::AdminOperator);
        assert_eq!(bundle.domain.as_deref(), Some("x.test"));
    }

    #[test]
    fn sign_accepts_negative_days_and_repeated_alt_names() {
        let cli = Cli::parse_from([
            "magma-certifier",
            "sign",
            "--csr",
            "req.pem",
            "--ca-cert",
            "ca.pem",
            "--ca-key",
            "ca.key",
            "--days",
            "-1",
            "--alt-name",
            "a.test",
            "--alt-name",
            "b.test",
        ]);
        let Commands::Sign(args) = cli.command else {
            panic!("expected sign command");
        };
        assert_eq!(args.days, -1);
        assert_eq!(args.alt_names, vec!["a.test", "b.test"]);
    }
}
