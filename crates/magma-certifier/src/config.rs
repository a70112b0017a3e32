//! Certifier configuration.
//!
//! The configuration is a JSON document in which every field except
//! `domain` has a default. CLI flags and `MAGMA_*` environment variables are
//! layered on top with [`CertifierConfig::apply`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use magma_pki::{CaOptions, KeyParams, LeafOptions};

use crate::error::{CertifierError, Result};

/// Default directory the bundle is written to.
pub const DEFAULT_CERTS_DIR: &str = "/var/opt/magma/certs";

const fn default_key_size() -> usize {
    2048
}

const fn default_public_exponent() -> u64 {
    65537
}

const fn default_ca_validity_days() -> i64 {
    3650
}

const fn default_validity_days() -> i64 {
    365
}

fn default_country() -> String {
    "US".to_string()
}

fn default_certs_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CERTS_DIR)
}

/// Settings for generating and serving the certificate bundle.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertifierConfig {
    /// Orchestrator domain, e.g. `magma.example.com`.
    pub domain: String,
    /// Two-letter country used in CA subjects.
    #[serde(default = "default_country")]
    pub country: String,
    /// Password protecting the admin-operator PFX.
    #[serde(default)]
    pub passphrase: String,
    /// RSA modulus size in bits.
    #[serde(default = "default_key_size")]
    pub key_size: usize,
    /// RSA public exponent.
    #[serde(default = "default_public_exponent")]
    pub public_exponent: u64,
    /// Validity of the root and certifier CAs, in days.
    #[serde(default = "default_ca_validity_days")]
    pub ca_validity_days: i64,
    /// Validity of leaf certificates, in days.
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
    /// Directory holding the bundle files.
    #[serde(default = "default_certs_dir")]
    pub certs_dir: PathBuf,
    /// Directory for relation state snapshots; in-memory only when unset.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Optional overrides collected from the command line or environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Replaces `domain`.
    pub domain: Option<String>,
    /// Replaces `passphrase`.
    pub passphrase: Option<String>,
    /// Replaces `certs_dir`.
    pub certs_dir: Option<PathBuf>,
    /// Replaces `state_dir`.
    pub state_dir: Option<PathBuf>,
}

impl CertifierConfig {
    /// Creates a configuration for `domain` with every other field defaulted.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            country: default_country(),
            passphrase: String::new(),
            key_size: default_key_size(),
            public_exponent: default_public_exponent(),
            ca_validity_days: default_ca_validity_days(),
            validity_days: default_validity_days(),
            certs_dir: default_certs_dir(),
            state_dir: None,
        }
    }

    /// Sets the PFX passphrase.
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = passphrase.into();
        self
    }

    /// Sets the certificates directory.
    #[must_use]
    pub fn with_certs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.certs_dir = dir.into();
        self
    }

    /// Load configuration from a JSON file.
    ///
    /// The result is not validated; call [`Self::validate`] once overrides
    /// have been applied.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CertifierError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| CertifierError::Config(format!("invalid JSON: {e}")))
    }

    /// Applies overrides on top of the loaded values.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(domain) = overrides.domain {
            self.domain = domain;
        }
        if let Some(passphrase) = overrides.passphrase {
            self.passphrase = passphrase;
        }
        if let Some(dir) = overrides.certs_dir {
            self.certs_dir = dir;
        }
        if let Some(dir) = overrides.state_dir {
            self.state_dir = Some(dir);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(CertifierError::Config("domain cannot be empty".to_string()));
        }
        if self.domain.contains(char::is_whitespace) {
            return Err(CertifierError::Config(format!(
                "domain '{}' must not contain whitespace",
                self.domain
            )));
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CertifierError::Config(format!(
                "country '{}' must be two ASCII letters",
                self.country
            )));
        }
        if self.passphrase.is_empty() {
            return Err(CertifierError::Config("passphrase cannot be empty".to_string()));
        }
        if self.ca_validity_days <= 0 {
            return Err(CertifierError::Config(
                "ca_validity_days must be greater than 0".to_string(),
            ));
        }
        if self.validity_days <= 0 {
            return Err(CertifierError::Config(
                "validity_days must be greater than 0".to_string(),
            ));
        }
        self.key_params().validate()?;
        Ok(())
    }

    /// Key generation parameters. Bundle keys are stored unencrypted.
    pub fn key_params(&self) -> KeyParams {
        KeyParams::new()
            .key_size(self.key_size)
            .public_exponent(self.public_exponent)
    }

    /// Options for the root and certifier CAs.
    pub fn ca_options(&self) -> CaOptions {
        CaOptions::default()
            .validity_days(self.ca_validity_days)
            .country(Some(&self.country))
    }

    /// Options for leaf certificates.
    pub fn leaf_options(&self) -> LeafOptions {
        LeafOptions::default().validity_days(self.validity_days)
    }

    /// Subject of the root CA.
    pub fn root_ca_subject(&self) -> String {
        format!("rootca.{}", self.domain)
    }

    /// Subject of the certifier CA.
    pub fn certifier_subject(&self) -> String {
        format!("certifier.{}", self.domain)
    }

    /// Wildcard name carried by the controller certificate.
    pub fn controller_subject(&self) -> String {
        format!("*.{}", self.domain)
    }

    /// Subject of the fluentd certificate.
    pub fn fluentd_subject(&self) -> String {
        format!("fluentd.{}", self.domain)
    }
}

impl std::fmt::Debug for CertifierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertifierConfig")
            .field("domain", &self.domain)
            .field("country", &self.country)
            .field("passphrase", &"[REDACTED]")
            .field("key_size", &self.key_size)
            .field("public_exponent", &self.public_exponent)
            .field("ca_validity_days", &self.ca_validity_days)
            .field("validity_days", &self.validity_days)
            .field("certs_dir", &self.certs_dir)
            .field("state_dir", &self.state_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn valid() -> CertifierConfig {
        CertifierConfig::new("magma.test").with_passphrase("hunter2")
    }

    #[test]
    fn minimal_json_takes_defaults() {
        let config = CertifierConfig::from_json(r#"{"domain": "magma.test"}"#).unwrap();

        assert_eq!(config.domain, "magma.test");
        assert_eq!(config.country, "US");
        assert_eq!(config.key_size, 2048);
        assert_eq!(config.public_exponent, 65537);
        assert_eq!(config.ca_validity_days, 3650);
        assert_eq!(config.validity_days, 365);
        assert_eq!(config.certs_dir, PathBuf::from(DEFAULT_CERTS_DIR));
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn missing_domain_is_rejected() {
        let result = CertifierConfig::from_json(r#"{"country": "DE"}"#);
        assert!(matches!(result, Err(CertifierError::Config(_))));
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certifier.json");
        std::fs::write(
            &path,
            r#"{"domain": "orc8r.example.com", "passphrase": "p", "validity_days": 30}"#,
        )
        .unwrap();

        let config = CertifierConfig::from_file(&path).unwrap();
        assert_eq!(config.domain, "orc8r.example.com");
        assert_eq!(config.validity_days, 30);
        config.validate().unwrap();

        let missing = CertifierConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(missing, Err(CertifierError::Config(_))));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = valid();
        config.apply(ConfigOverrides {
            domain: Some("other.test".into()),
            passphrase: None,
            certs_dir: Some("/tmp/certs".into()),
            state_dir: Some("/tmp/state".into()),
        });

        assert_eq!(config.domain, "other.test");
        assert_eq!(config.passphrase, "hunter2");
        assert_eq!(config.certs_dir, PathBuf::from("/tmp/certs"));
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/state")));
    }

    #[test_case(|c: &mut CertifierConfig| c.domain = String::new(); "empty domain")]
    #[test_case(|c: &mut CertifierConfig| c.domain = "magma test".into(); "domain with space")]
    #[test_case(|c: &mut CertifierConfig| c.country = "USA".into(); "three letter country")]
    #[test_case(|c: &mut CertifierConfig| c.country = "1A".into(); "digit in country")]
    #[test_case(|c: &mut CertifierConfig| c.passphrase = String::new(); "empty passphrase")]
    #[test_case(|c: &mut CertifierConfig| c.validity_days = 0; "zero validity")]
    #[test_case(|c: &mut CertifierConfig| c.ca_validity_days = -1; "negative ca validity")]
    fn invalid_settings_are_rejected(mutate: fn(&mut CertifierConfig)) {
        let mut config = valid();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(CertifierError::Config(_))));
    }

    #[test]
    fn bad_key_size_surfaces_as_parameter_error() {
        let mut config = valid();
        config.key_size = 100;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CertifierError::Pki(ref e) if e.is_precondition()));
    }

    #[test]
    fn subjects_derive_from_domain() {
        let config = valid();
        assert_eq!(config.root_ca_subject(), "rootca.magma.test");
        assert_eq!(config.certifier_subject(), "certifier.magma.test");
        assert_eq!(config.controller_subject(), "*.magma.test");
        assert_eq!(config.fluentd_subject(), "fluentd.magma.test");
    }

    #[test]
    fn debug_hides_passphrase() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
