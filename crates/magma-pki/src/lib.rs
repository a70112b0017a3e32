//! Certificate authority core for the Magma certifier.
//!
//! This crate produces the key material that the certifier hands out to
//! orchestrator services: RSA private keys, PKCS#10 signing requests,
//! self-signed CA certificates, CA-signed leaf certificates and PKCS#12
//! bundles. Every operation is synchronous and works on in-memory PEM/DER
//! values; nothing here touches the file system.
//!
//! # Example
//!
//! ```no_run
//! use magma_pki::{
//!     CaOptions, CsrRequest, KeyParams, LeafOptions, generate_ca, generate_certificate,
//!     generate_csr, generate_private_key, validate_certificate,
//! };
//!
//! let ca_key = generate_private_key(&KeyParams::new()).unwrap();
//! let ca = generate_ca(&ca_key, None, "rootca.magma.test", &CaOptions::default()).unwrap();
//!
//! let key = generate_private_key(&KeyParams::new()).unwrap();
//! let csr = generate_csr(&key, None, &CsrRequest::new("*.magma.test")).unwrap();
//! let leaf = generate_certificate(&csr, &ca, &ca_key, None, &LeafOptions::default()).unwrap();
//!
//! validate_certificate(&leaf, &ca).unwrap();
//! ```
//!
//! # Modules
//!
//! - [`keygen`] - RSA key generation and decoding
//! - [`csr`] - Certificate signing requests
//! - [`ca`] - CA and leaf certificate issuance
//! - [`pkcs12`] - PFX packaging
//! - [`validation`] - Certificate validation utilities
//! - [`types`] - Parsed certificate, CSR and key types
//! - [`error`] - Error types

#![forbid(unsafe_code)]

pub mod ca;
pub mod csr;
pub mod error;
pub mod keygen;
mod name;
mod pem;
pub mod pkcs12;
pub mod types;
pub mod validation;

pub use ca::{CaOptions, CertificateAuthority, LeafOptions, generate_ca, generate_certificate};
pub use csr::{CsrRequest, generate_csr};
pub use error::{Error, Result};
pub use keygen::{
    KeyParams, decode_private_key, generate_private_key, key_identifier_for, public_key_bytes,
    subject_key_identifier,
};
pub use pkcs12::{Pkcs12Contents, Pkcs12Package, generate_pfx_package, open_pfx_package};
pub use types::{
    Certificate, CertificateInfo, CertificateSigningRequest, PrivateKey, SubjectAltName,
};
pub use validation::{
    is_expired, is_not_yet_valid, is_valid_now, remaining_validity, validate_certificate,
    validate_chain, verify_key_pair, verify_signature,
};


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ENCRYPTED_KEY, KEY_PASSWORD};

    #[test]
    fn full_workflow() {
        // Root CA
        let root_key = generate_private_key(&KeyParams::new()).unwrap();
        let root = generate_ca(&root_key, None, "rootca.magma.test", &CaOptions::default()).unwrap();
        let authority = CertificateAuthority::from_existing(root.clone(), root_key, None).unwrap();

        // Controller leaf from an encrypted key
        let request = CsrRequest::new("*.magma.test").alt_name("api.magma.test");
        let csr = generate_csr(&ENCRYPTED_KEY, Some(KEY_PASSWORD), &request).unwrap();
        let leaf = authority
            .sign(&csr, &LeafOptions::default().alt_names(["*.magma.test"]))
            .unwrap();

        assert_eq!(leaf.issuer(), root.subject());
        assert_eq!(leaf.san(), &[SubjectAltName::Dns("*.magma.test".into())]);
        validate_certificate(&leaf, &root).unwrap();
        validate_chain(&[leaf.clone(), root]).unwrap();
        verify_key_pair(&leaf, &ENCRYPTED_KEY, Some(KEY_PASSWORD)).unwrap();

        // PFX
        let package = generate_pfx_package(&leaf, &ENCRYPTED_KEY, Some(KEY_PASSWORD), "magma").unwrap();
        let contents = open_pfx_package(&package, "magma").unwrap();
        assert_eq!(contents.friendly_name, leaf.subject());
        assert_eq!(contents.certificate, leaf);
        verify_key_pair(&leaf, &contents.private_key().unwrap(), None).unwrap();
    }

    #[test]
    fn certificate_info_serializes() {
        let ca = test_support::CA.certificate();
        let json = serde_json::to_value(ca.info()).unwrap();
        assert_eq!(json["subject"], "CN=rootca.magma.test,C=US");
        assert_eq!(json["is_ca"], true);
    }
}
