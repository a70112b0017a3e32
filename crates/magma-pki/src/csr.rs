//! PKCS#10 certificate signing request construction.

use rcgen::CertificateParams;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::keygen::{decode_private_key, signing_key_pair};
use crate::name::{distinguished_name, dns_sans, validate_common_name, validate_country, validate_dns_names};
use crate::types::{CertificateSigningRequest, PrivateKey};

/// Subject and alternative names for a signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrRequest {
    subject: String,
    country: Option<String>,
    alt_names: Vec<String>,
}

impl CsrRequest {
    /// Creates a request for the given common name.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            country: None,
            alt_names: Vec::new(),
        }
    }

    /// Sets the two-letter country code.
    #[must_use]
    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Adds a DNS alternative name.
    #[must_use]
    pub fn alt_name(mut self, name: impl Into<String>) -> Self {
        self.alt_names.push(name.into());
        self
    }

    /// Adds several DNS alternative names.
    #[must_use]
    pub fn alt_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alt_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Returns the requested common name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject, country or any alternative name is invalid.
    pub fn validate(&self) -> Result<()> {
        validate_common_name(&self.subject)?;
        if let Some(country) = &self.country {
            validate_country(country)?;
        }
        validate_dns_names(&self.alt_names)
    }
}

/// Builds a PEM CSR signed by `key` with SHA-256.
///
/// If alternative names are present they are carried in a non-critical
/// Subject Alternative Name extension as DNS names.
///
/// # Errors
///
/// Returns [`Error::Decryption`] if `password` does not open `key`,
/// [`Error::Parse`] if the key is malformed, and
/// [`Error::InvalidParameter`]/[`Error::San`] for a bad request.
pub fn generate_csr(
    key: &PrivateKey,
    password: Option<&[u8]>,
    request: &CsrRequest,
) -> Result<CertificateSigningRequest> {
    request.validate()?;

    let decoded = decode_private_key(key, password)?;
    let key_pair = signing_key_pair(&decoded)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&request.subject, request.country.as_deref())?;
    params.subject_alt_names = dns_sans(&request.alt_names)?;

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| Error::Generation(format!("failed to build CSR: {e}")))?;

    let parsed = CertificateSigningRequest::from_der(&csr.der().to_vec())?;

    info!(subject = %parsed.subject(), alt_names = request.alt_names.len(), "Generated CSR");
    debug!("CSR self-signature verified");

    Ok(parsed)
}
