//! Certificate validation utilities.

use chrono::Utc;
use tracing::debug;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::keygen::{decode_private_key, public_key_bytes};
use crate::types::{Certificate, PrivateKey};

/// Validates a certificate against the CA certificate that issued it.
///
/// Checks the validity window, that the raw issuer name equals the CA's raw
/// subject name, and that the CA's key verifies the signature.
///
/// # Errors
///
/// Returns [`Error::Expired`], [`Error::NotYetValid`], [`Error::Validation`]
/// or [`Error::SignatureVerification`] for the first check that fails.
pub fn validate_certificate(cert: &Certificate, ca_cert: &Certificate) -> Result<()> {
    debug!(subject = %cert.subject(), "Validating certificate");

    if is_expired(cert) {
        return Err(Error::Expired);
    }
    if is_not_yet_valid(cert) {
        return Err(Error::NotYetValid);
    }
    if cert.issuer_name_der() != ca_cert.subject_name_der() {
        return Err(Error::Validation(format!(
            "issuer '{}' does not match CA subject '{}'",
            cert.issuer(),
            ca_cert.subject()
        )));
    }
    verify_signature(cert, ca_cert)?;

    debug!(subject = %cert.subject(), "Certificate validated");
    Ok(())
}

/// Validates a chain ordered from end entity to self-signed root.
///
/// # Errors
///
/// Returns [`Error::InvalidChain`] for an empty chain or a lone certificate
/// that is not self-issued, and any [`validate_certificate`] error otherwise.
pub fn validate_chain(chain: &[Certificate]) -> Result<()> {
    let Some(root) = chain.last() else {
        return Err(Error::InvalidChain("empty certificate chain".into()));
    };

    if chain.len() == 1 && !root.is_self_issued() {
        return Err(Error::InvalidChain(
            "single certificate in chain must be self-signed".into(),
        ));
    }

    for pair in chain.windows(2) {
        validate_certificate(&pair[0], &pair[1])?;
    }

    if !root.is_self_issued() {
        return Err(Error::Validation("root certificate is not self-signed".into()));
    }
    verify_signature(root, root)
}

/// Returns `true` once not-after has passed.
#[must_use]
pub fn is_expired(cert: &Certificate) -> bool {
    cert.not_after() < Utc::now()
}

/// Returns `true` while not-before is still in the future.
#[must_use]
pub fn is_not_yet_valid(cert: &Certificate) -> bool {
    cert.not_before() > Utc::now()
}

/// Returns `true` inside the validity window.
#[must_use]
pub fn is_valid_now(cert: &Certificate) -> bool {
    !is_expired(cert) && !is_not_yet_valid(cert)
}

/// Time left until not-after, or `None` if already expired.
#[must_use]
pub fn remaining_validity(cert: &Certificate) -> Option<chrono::Duration> {
    let now = Utc::now();
    (cert.not_after() > now).then(|| cert.not_after() - now)
}

/// Verifies that `issuer`'s public key signed `cert`.
///
/// # Errors
///
/// Returns [`Error::SignatureVerification`] if the signature does not verify.
pub fn verify_signature(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    let (_, parsed_cert) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;
    let (_, parsed_issuer) = X509Certificate::from_der(issuer.der())
        .map_err(|e| Error::Parse(format!("failed to parse issuer certificate: {e}")))?;

    parsed_cert
        .verify_signature(Some(parsed_issuer.public_key()))
        .map_err(|e| {
            Error::SignatureVerification(format!(
                "signature verification failed for '{}': {e:?}",
                cert.subject()
            ))
        })
}

/// Checks that `key` is the private half of the key certified by `cert`.
///
/// # Errors
///
/// Returns [`Error::Validation`] on mismatch and decoding errors if the key
/// cannot be opened.
pub fn verify_key_pair(cert: &Certificate, key: &PrivateKey, password: Option<&[u8]>) -> Result<()> {
    let decoded = decode_private_key(key, password)?;
    if public_key_bytes(&decoded)? != cert.public_key() {
        return Err(Error::Validation(format!(
            "private key does not match certificate '{}'",
            cert.subject()
        )));
    }
    Ok(())
}
