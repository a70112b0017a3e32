//! Certifier error types.

use std::path::PathBuf;

use thiserror::Error;

use magma_relation::CertificateKind;

/// Result type for certifier operations.
pub type Result<T> = std::result::Result<T, CertifierError>;

/// Errors raised by the certifier service and CLI.
#[derive(Debug, Error)]
pub enum CertifierError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid command-line argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A bundle file is missing while others exist.
    #[error("bundle in {dir} is incomplete: missing {file}")]
    IncompleteBundle {
        /// Certificates directory.
        dir: PathBuf,
        /// First missing file name.
        file: &'static str,
    },

    /// The kind cannot be renewed by the certifier.
    #[error("{0} material cannot be renewed by the certifier")]
    NotRenewable(CertificateKind),

    /// Reading or writing a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Output formatting failed.
    #[error("format error: {0}")]
    Format(String),

    /// Key, certificate or PFX generation failed.
    #[error(transparent)]
    Pki(#[from] magma_pki::Error),

    /// The distribution protocol failed.
    #[error(transparent)]
    Relation(#[from] magma_relation::Error),
}

impl CertifierError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<CertifierError> for magma_relation::Error {
    fn from(err: CertifierError) -> Self {
        match err {
            CertifierError::Pki(e) => Self::Pki(e),
            CertifierError::Relation(e) => e,
            other => Self::Material(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CertifierError::IncompleteBundle {
            dir: PathBuf::from("/var/opt/magma/certs"),
            file: "certifier.key",
        };
        assert_eq!(
            err.to_string(),
            "bundle in /var/opt/magma/certs is incomplete: missing certifier.key"
        );
        assert_eq!(
            CertifierError::NotRenewable(CertificateKind::SignedCsr).to_string(),
            "cert-csr material cannot be renewed by the certifier"
        );
    }

    #[test]
    fn pki_errors_stay_transparent() {
        let err = CertifierError::from(magma_pki::Error::InvalidParameter("key size".into()));
        assert_eq!(err.to_string(), "invalid parameter: key size");
    }

    #[test]
    fn converts_into_relation_errors() {
        let pki: magma_relation::Error =
            CertifierError::Pki(magma_pki::Error::Parse("bad csr".into())).into();
        assert!(matches!(pki, magma_relation::Error::Pki(_)));

        let other: magma_relation::Error = CertifierError::Config("no domain".into()).into();
        assert!(matches!(other, magma_relation::Error::Material(_)));
    }
}
