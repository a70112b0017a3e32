//! PKCS#12 (PFX) packaging of a certificate and its private key.

use p12_keystore::{KeyStore, KeyStoreEntry, PrivateKeyChain};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::DecodePrivateKey;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::keygen::{decode_private_key, pkcs8_der, subject_key_identifier};
use crate::types::{Certificate, PrivateKey};

/// A password-protected PFX container.
#[derive(Clone, PartialEq, Eq)]
pub struct Pkcs12Package {
    der: Vec<u8>,
}

impl Pkcs12Package {
    /// Wraps raw PFX bytes, e.g. read back from disk.
    #[must_use]
    pub const fn from_der(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// Returns the binary PFX encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }

    /// Consumes the package, returning the binary PFX encoding.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.der
    }
}

impl std::fmt::Debug for Pkcs12Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs12Package")
            .field("len", &self.der.len())
            .finish()
    }
}

/// The certificate and key recovered from a PFX container.
pub struct Pkcs12Contents {
    /// Friendly name of the key entry.
    pub friendly_name: String,
    /// The end-entity certificate.
    pub certificate: Certificate,
    private_key: Zeroizing<Vec<u8>>,
}

impl Pkcs12Contents {
    /// Unencrypted PKCS#8 DER of the private key.
    #[must_use]
    pub fn private_key_der(&self) -> &[u8] {
        &self.private_key
    }

    /// Converts the private key to an unencrypted `RSA PRIVATE KEY` PEM.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the stored key is not an RSA key.
    pub fn private_key(&self) -> Result<PrivateKey> {
        let key = RsaPrivateKey::from_pkcs8_der(&self.private_key)
            .map_err(|e| Error::Parse(format!("PFX key is not an RSA key: {e}")))?;
        let pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::Generation(format!("failed to encode private key: {e}")))?;
        PrivateKey::from_pem(pem.to_string())
    }
}

impl std::fmt::Debug for Pkcs12Contents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs12Contents")
            .field("friendly_name", &self.friendly_name)
            .field("certificate", &self.certificate.subject())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Bundles `certificate` and `key` into a PFX protected by `password`.
///
/// The friendly name is the certificate's RFC 4514 subject. The key must be
/// the private half of the certificate's public key; this is not checked and
/// a mismatched pair yields a package that consumers will refuse to load.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] for an empty password, decoding errors
/// if `key` cannot be opened with `key_password`, and [`Error::Pkcs12`] if
/// the container cannot be written.
pub fn generate_pfx_package(
    certificate: &Certificate,
    key: &PrivateKey,
    key_password: Option<&[u8]>,
    password: &str,
) -> Result<Pkcs12Package> {
    if password.is_empty() {
        return Err(Error::InvalidParameter("PFX password cannot be empty".into()));
    }

    let key_der = pkcs8_der(&decode_private_key(key, key_password)?)?;
    let cert = p12_keystore::Certificate::from_der(certificate.der())
        .map_err(|e| Error::Pkcs12(format!("failed to read certificate: {e}")))?;
    let local_key_id = subject_key_identifier(certificate.public_key());

    let mut keystore = KeyStore::new();
    let chain = PrivateKeyChain::new(key_der.as_slice(), local_key_id, vec![cert]);
    keystore.add_entry(certificate.subject(), KeyStoreEntry::PrivateKeyChain(chain));

    let der = keystore
        .writer(password)
        .write()
        .map_err(|e| Error::Pkcs12(format!("failed to write PFX: {e}")))?;

    info!(subject = %certificate.subject(), "Generated PFX package");

    Ok(Pkcs12Package { der })
}

/// Opens a PFX with `password` and returns its first key entry.
///
/// # Errors
///
/// Returns [`Error::Pkcs12`] if the password is wrong, the data is not a PFX,
/// or it holds no key with a certificate.
pub fn open_pfx_package(package: &Pkcs12Package, password: &str) -> Result<Pkcs12Contents> {
    let keystore = KeyStore::from_pkcs12(package.as_bytes(), password)
        .map_err(|e| Error::Pkcs12(format!("failed to open PFX: {e}")))?;

    let (alias, chain) = keystore
        .entries()
        .find_map(|(alias, entry)| match entry {
            KeyStoreEntry::PrivateKeyChain(chain) => Some((alias.clone(), chain)),
            _ => None,
        })
        .ok_or_else(|| Error::Pkcs12("PFX contains no private key".into()))?;

    let leaf = chain
        .chain()
        .first()
        .ok_or_else(|| Error::Pkcs12("PFX key has no certificate".into()))?;
    let certificate = Certificate::from_der(leaf.as_der())?;

    debug!(friendly_name = %alias, "Opened PFX package");

    Ok(Pkcs12Contents {
        friendly_name: alias,
        certificate,
        private_key: Zeroizing::new(chain.key().to_vec()),
    })
}
