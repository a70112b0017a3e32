//! PKI error types.

use thiserror::Error;

/// Result type for PKI operations.
pub type Result<T> = std::result::Result<T, Error>;

/// PKI error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// A generation parameter violates its precondition (key size, exponent,
    /// subject, country, validity).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Key or certificate generation failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Malformed PEM, key, CSR or certificate input.
    #[error("parse failed: {0}")]
    Parse(String),

    /// The private key could not be decrypted with the supplied password,
    /// or a password was missing or unexpected.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Certificate validation failed.
    #[error("certificate validation failed: {0}")]
    Validation(String),

    /// Certificate has expired.
    #[error("certificate has expired")]
    Expired,

    /// Certificate not yet valid.
    #[error("certificate not yet valid")]
    NotYetValid,

    /// Invalid certificate chain.
    #[error("invalid certificate chain: {0}")]
    InvalidChain(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Subject Alternative Name error.
    #[error("SAN error: {0}")]
    San(String),

    /// PKCS#12 packaging or unpacking failed.
    #[error("pkcs12 error: {0}")]
    Pkcs12(String),
}

impl Error {
    /// Returns true for errors caused by bad caller input rather than by
    /// malformed data.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::InvalidParameter(_) | Self::San(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        let err = Error::InvalidParameter("key size must be at least 2048 bits".into());
        assert_eq!(
            err.to_string(),
            "invalid parameter: key size must be at least 2048 bits"
        );

        let err = Error::Decryption("bad password".into());
        assert_eq!(err.to_string(), "decryption failed: bad password");

        assert_eq!(Error::Expired.to_string(), "certificate has expired");
    }

    #[test]
    fn precondition_classification() {
        assert!(Error::InvalidParameter("x".into()).is_precondition());
        assert!(Error::San("x".into()).is_precondition());
        assert!(!Error::Parse("x".into()).is_precondition());
        assert!(!Error::Decryption("x".into()).is_precondition());
    }
}
