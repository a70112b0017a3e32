//! Certificate issuance: self-signed CA certificates and CSR-based leaves.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, IsCa, KeyIdMethod,
    KeyPair, KeyUsagePurpose, SerialNumber,
};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::csr::{CsrRequest, generate_csr};
use crate::error::{Error, Result};
use crate::keygen::{
    KeyParams, decode_private_key, generate_private_key, public_key_bytes, signing_key_pair,
    subject_key_identifier,
};
use crate::name::{distinguished_name, dns_sans};
use crate::types::{Certificate, CertificateSigningRequest, PrivateKey};
use crate::validation::verify_key_pair;

/// Default validity in days for CA and leaf certificates.
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

/// Default CA country.
pub const DEFAULT_COUNTRY: &str = "US";

/// Largest accepted validity magnitude, in days.
pub const MAX_VALIDITY_DAYS: i64 = 36_500;

/// Options for a self-signed CA certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaOptions {
    /// Validity in days; negative values produce an already-expired certificate.
    pub validity_days: i64,
    /// Two-letter country placed before the common name, if any.
    pub country: Option<String>,
}

impl Default for CaOptions {
    fn default() -> Self {
        Self {
            validity_days: DEFAULT_VALIDITY_DAYS,
            country: Some(DEFAULT_COUNTRY.to_string()),
        }
    }
}

impl CaOptions {
    /// Sets the validity in days.
    #[must_use]
    pub const fn validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    /// Sets or clears the country.
    #[must_use]
    pub fn country(mut self, country: Option<&str>) -> Self {
        self.country = country.map(String::from);
        self
    }
}

/// Options for a leaf certificate issued from a CSR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafOptions {
    /// Validity in days; negative values produce an already-expired certificate.
    pub validity_days: i64,
    /// DNS alternative names. When set, these replace whatever the CSR asked for;
    /// when unset the certificate carries no SAN extension.
    pub alt_names: Option<Vec<String>>,
}

impl Default for LeafOptions {
    fn default() -> Self {
        Self {
            validity_days: DEFAULT_VALIDITY_DAYS,
            alt_names: None,
        }
    }
}

impl LeafOptions {
    /// Sets the validity in days.
    #[must_use]
    pub const fn validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    /// Sets the authoritative DNS alternative names.
    #[must_use]
    pub fn alt_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alt_names = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Builds a self-signed CA certificate for `key`.
///
/// Subject and issuer are `C=<country>, CN=<subject>`. The certificate carries a
/// subject key identifier derived from the public key, an authority key
/// identifier with the same value, and critical basic constraints with `CA:true`.
/// Not-before is the issuance time and not-after is issuance time plus
/// `validity_days`.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] for an empty subject, a bad country or an
/// out-of-range validity, [`Error::Decryption`]/[`Error::Parse`] if the key
/// cannot be opened, and [`Error::Generation`] if signing fails.
pub fn generate_ca(
    key: &PrivateKey,
    password: Option<&[u8]>,
    subject: &str,
    options: &CaOptions,
) -> Result<Certificate> {
    let name = distinguished_name(subject, options.country.as_deref())?;
    let (not_before, not_after) = validity_window(options.validity_days)?;

    let decoded = decode_private_key(key, password)?;
    let key_pair = signing_key_pair(&decoded)?;
    let key_id = subject_key_identifier(&public_key_bytes(&decoded)?);

    let mut params = CertificateParams::default();
    params.distinguished_name = name;
    params.serial_number = Some(random_serial());
    params.not_before = to_rcgen_time(not_before)?;
    params.not_after = to_rcgen_time(not_after)?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.key_identifier_method = KeyIdMethod::PreSpecified(key_id);
    params.use_authority_key_identifier_extension = true;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Generation(format!("failed to self-sign CA certificate: {e}")))?;
    let certificate = Certificate::from_der(&cert.der().to_vec())?;

    info!(
        subject = %certificate.subject(),
        serial = %certificate.serial(),
        not_after = %certificate.not_after(),
        "Generated CA certificate"
    );

    Ok(certificate)
}

/// Issues a leaf certificate for `csr`, signed by the CA.
///
/// The subject and public key are copied from the CSR, the issuer is the CA
/// subject, the serial number is fresh and random, and the signature uses
/// SHA-256. SANs embedded in the CSR are ignored: only `options.alt_names`
/// ends up in the certificate.
///
/// # Errors
///
/// Returns [`Error::Parse`] for a malformed CSR or CA material,
/// [`Error::Validation`] if the CA key does not belong to the CA certificate,
/// and [`Error::Generation`] if signing fails.
pub fn generate_certificate(
    csr: &CertificateSigningRequest,
    ca_certificate: &Certificate,
    ca_key: &PrivateKey,
    ca_password: Option<&[u8]>,
    options: &LeafOptions,
) -> Result<Certificate> {
    let (not_before, not_after) = validity_window(options.validity_days)?;
    let alt_names = match &options.alt_names {
        Some(names) => dns_sans(names)?,
        None => Vec::new(),
    };

    verify_key_pair(ca_certificate, ca_key, ca_password)?;
    let ca_key_pair = signing_key_pair(&decode_private_key(ca_key, ca_password)?)?;

    let mut request = CertificateSigningRequestParams::from_pem(csr.pem())
        .map_err(|e| Error::Parse(format!("failed to read CSR: {e}")))?;
    request.params.subject_alt_names = alt_names;
    request.params.serial_number = Some(random_serial());
    request.params.not_before = to_rcgen_time(not_before)?;
    request.params.not_after = to_rcgen_time(not_after)?;
    request.params.is_ca = IsCa::NoCa;
    request.params.key_usages.clear();
    request.params.extended_key_usages.clear();
    request.params.custom_extensions.clear();
    request.params.use_authority_key_identifier_extension = true;

    let issuer = issuer_certificate(ca_certificate, &ca_key_pair)?;
    let cert = request
        .signed_by(&issuer, &ca_key_pair)
        .map_err(|e| Error::Generation(format!("failed to sign certificate: {e}")))?;
    let certificate = Certificate::from_der(&cert.der().to_vec())?;

    info!(
        subject = %certificate.subject(),
        issuer = %certificate.issuer(),
        serial = %certificate.serial(),
        "Issued certificate"
    );

    Ok(certificate)
}

/// Rebuilds an rcgen issuer from an existing CA certificate so that the
/// issuer name and authority key identifier match it exactly.
fn issuer_certificate(ca_certificate: &Certificate, ca_key_pair: &KeyPair) -> Result<rcgen::Certificate> {
    let mut params = CertificateParams::from_ca_cert_pem(ca_certificate.pem())
        .map_err(|e| Error::Parse(format!("failed to read CA certificate: {e}")))?;
    if let Some(key_id) = ca_certificate.subject_key_id() {
        params.key_identifier_method = KeyIdMethod::PreSpecified(key_id.to_vec());
    }
    params
        .self_signed(ca_key_pair)
        .map_err(|e| Error::Generation(format!("failed to create issuer: {e}")))
}

/// Computes `[now, now + validity_days]` at second precision.
///
/// Zero yields an empty window; negative values yield a window that already
/// ended, with not-after earlier than not-before.
fn validity_window(validity_days: i64) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if validity_days.abs() > MAX_VALIDITY_DAYS {
        return Err(Error::InvalidParameter(format!(
            "validity of {validity_days} days exceeds {MAX_VALIDITY_DAYS}"
        )));
    }
    let now = DateTime::from_timestamp(Utc::now().timestamp(), 0)
        .ok_or_else(|| Error::Generation("clock out of range".into()))?;
    Ok((now, now + Duration::days(validity_days)))
}

/// Draws a positive 159-bit serial number from the OS RNG.
///
/// RFC 5280 caps serials at 20 octets and requires them to be positive, so
/// the top bit of the first octet stays clear; 159 bits is the most entropy
/// that fits.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    if bytes[0] == 0 {
        bytes[0] = 0x01;
    }
    SerialNumber::from_slice(&bytes)
}

/// Converts a chrono `DateTime` to rcgen `OffsetDateTime`.
fn to_rcgen_time(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::Generation(format!("invalid timestamp: {e}")))
}

/// A CA certificate together with the key that signs for it.
pub struct CertificateAuthority {
    certificate: Certificate,
    key: PrivateKey,
    password: Option<Zeroizing<Vec<u8>>>,
}

impl CertificateAuthority {
    /// Generates a fresh key and a self-signed CA certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if key or certificate generation fails.
    pub fn generate(subject: &str, key_params: &KeyParams, options: &CaOptions) -> Result<Self> {
        info!(subject, "Creating new Certificate Authority");
        let key = generate_private_key(key_params)?;
        let password = key_params_password(key_params);
        let certificate = generate_ca(&key, password.as_deref().map(Vec::as_slice), subject, options)?;

        Ok(Self {
            certificate,
            key,
            password,
        })
    }

    /// Wraps an existing CA certificate and key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the certificate is not a CA or the key
    /// does not match it, and decoding errors for an unusable key.
    pub fn from_existing(
        certificate: Certificate,
        key: PrivateKey,
        password: Option<&[u8]>,
    ) -> Result<Self> {
        if !certificate.is_ca() {
            return Err(Error::Validation(format!(
                "'{}' is not a CA certificate",
                certificate.subject()
            )));
        }
        verify_key_pair(&certificate, &key, password)?;

        Ok(Self {
            certificate,
            key,
            password: password.map(|p| Zeroizing::new(p.to_vec())),
        })
    }

    /// Returns the CA certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns the CA private key.
    #[must_use]
    pub const fn key(&self) -> &PrivateKey {
        &self.key
    }

    /// Signs a CSR with this CA.
    ///
    /// # Errors
    ///
    /// See [`generate_certificate`].
    pub fn sign(&self, csr: &CertificateSigningRequest, options: &LeafOptions) -> Result<Certificate> {
        generate_certificate(
            csr,
            &self.certificate,
            &self.key,
            self.password.as_deref().map(Vec::as_slice),
            options,
        )
    }

    /// Generates a key and CSR for `request` and signs it in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if any generation step fails.
    pub fn issue(
        &self,
        request: &CsrRequest,
        key_params: &KeyParams,
        options: &LeafOptions,
    ) -> Result<(Certificate, PrivateKey)> {
        let key = generate_private_key(key_params)?;
        let password = key_params_password(key_params);
        let csr = generate_csr(&key, password.as_deref().map(Vec::as_slice), request)?;
        let certificate = self.sign(&csr, options)?;
        debug!(subject = %certificate.subject(), "Issued certificate with new key");
        Ok((certificate, key))
    }
}

fn key_params_password(params: &KeyParams) -> Option<Zeroizing<Vec<u8>>> {
    params.password_bytes().map(|p| Zeroizing::new(p.to_vec()))
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("certificate", &self.certificate.subject())
            .field("key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
