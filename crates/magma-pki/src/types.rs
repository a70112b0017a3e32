//! Core PKI types: private keys, CSRs and parsed certificates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::pem;

/// Subject Alternative Name types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectAltName {
    /// DNS name.
    Dns(String),
    /// IP address.
    Ip(std::net::IpAddr),
    /// Email address.
    Email(String),
    /// URI.
    Uri(String),
}

impl std::fmt::Display for SubjectAltName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dns(name) => write!(f, "DNS:{name}"),
            Self::Ip(ip) => write!(f, "IP:{ip}"),
            Self::Email(email) => write!(f, "email:{email}"),
            Self::Uri(uri) => write!(f, "URI:{uri}"),
        }
    }
}

/// A PEM-encoded RSA private key, optionally password-encrypted.
///
/// The key is opaque to most callers; it is decoded on demand by the
/// operations that sign with it. Unencrypted keys use the traditional
/// `RSA PRIVATE KEY` armor, encrypted keys use PKCS#8
/// `ENCRYPTED PRIVATE KEY`. Plain PKCS#8 `PRIVATE KEY` input is accepted too.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    pem: String,
}

impl PrivateKey {
    /// Wraps PEM text after checking that it carries a private key label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the text is not a PEM private key.
    pub fn from_pem(pem: impl Into<String>) -> Result<Self> {
        let pem = pem.into();
        let block = pem::decode(&pem)?;
        match block.label.as_str() {
            pem::RSA_PRIVATE_KEY | pem::PRIVATE_KEY | pem::ENCRYPTED_PRIVATE_KEY => Ok(Self { pem }),
            other => Err(Error::Parse(format!("not a private key PEM block: '{other}'"))),
        }
    }

    pub(crate) const fn from_pem_unchecked(pem: String) -> Self {
        Self { pem }
    }

    /// Returns the PEM text.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Returns the PEM text as bytes, ready to be written to a file.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.pem.as_bytes()
    }

    /// Returns true if the key is password-protected.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.pem.contains(pem::ENCRYPTED_PRIVATE_KEY)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("encrypted", &self.is_encrypted())
            .field("pem", &"[REDACTED]")
            .finish()
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            pem: self.pem.clone(),
        }
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.pem == other.pem
    }
}

impl Eq for PrivateKey {}

/// A parsed, signature-checked PKCS#10 certificate signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSigningRequest {
    pem: String,
    der: Vec<u8>,
    subject: String,
    common_name: Option<String>,
    san: Vec<SubjectAltName>,
    public_key: Vec<u8>,
}

impl CertificateSigningRequest {
    /// Parses a PEM CSR and verifies its self-signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed input and
    /// [`Error::SignatureVerification`] if the request is not signed by the
    /// key it carries.
    pub fn from_pem(pem_text: &str) -> Result<Self> {
        let der = pem::decode_expecting(pem_text, pem::CERTIFICATE_REQUEST)?;
        Self::from_der(&der)
    }

    /// Parses a DER CSR and verifies its self-signature.
    ///
    /// # Errors
    ///
    /// See [`CertificateSigningRequest::from_pem`].
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, csr) = X509CertificationRequest::from_der(der)
            .map_err(|e| Error::Parse(format!("failed to parse CSR: {e}")))?;

        csr.verify_signature()
            .map_err(|e| Error::SignatureVerification(format!("CSR self-signature: {e}")))?;

        let info = &csr.certification_request_info;
        let subject = rfc4514_string(&info.subject)?;
        let common_name = common_name(&info.subject);
        let public_key = info.subject_pki.subject_public_key.data.as_ref().to_vec();

        let mut san = Vec::new();
        if let Some(extensions) = csr.requested_extensions() {
            for extension in extensions {
                if let ParsedExtension::SubjectAlternativeName(names) = extension {
                    san.extend(convert_general_names(&names.general_names));
                }
            }
        }

        Ok(Self {
            pem: pem::encode(pem::CERTIFICATE_REQUEST, der),
            der: der.to_vec(),
            subject,
            common_name,
            san,
            public_key,
        })
    }

    /// Returns the PEM-encoded request.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Returns the DER-encoded request.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the RFC 4514 subject string.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the subject common name, if any.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Returns the alternative names requested in the CSR.
    #[must_use]
    pub fn san(&self) -> &[SubjectAltName] {
        &self.san
    }

    /// Returns the `RSAPublicKey` bytes carried by the request.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

/// A DER-encoded X.509 certificate with parsed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    pem: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    subject: String,
    issuer: String,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    common_name: Option<String>,
    serial: String,
    san: Vec<SubjectAltName>,
    is_ca: bool,
    basic_constraints_critical: bool,
    subject_key_id: Option<Vec<u8>>,
    authority_key_id: Option<Vec<u8>>,
    public_key: Vec<u8>,
}

impl Certificate {
    /// Parses a certificate from PEM text.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_pem(pem_text: &str) -> Result<Self> {
        let der = pem::decode_expecting(pem_text, pem::CERTIFICATE)?;
        Self::from_der(&der)
    }

    /// Parses a certificate from DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_before timestamp".into()))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_after timestamp".into()))?;

        let mut san = Vec::new();
        let mut is_ca = false;
        let mut basic_constraints_critical = false;
        let mut subject_key_id = None;
        let mut authority_key_id = None;

        for extension in cert.extensions() {
            match extension.parsed_extension() {
                ParsedExtension::SubjectAlternativeName(names) => {
                    san.extend(convert_general_names(&names.general_names));
                }
                ParsedExtension::BasicConstraints(constraints) => {
                    is_ca = constraints.ca;
                    basic_constraints_critical = extension.critical;
                }
                ParsedExtension::SubjectKeyIdentifier(id) => {
                    subject_key_id = Some(id.0.to_vec());
                }
                ParsedExtension::AuthorityKeyIdentifier(aki) => {
                    authority_key_id = aki.key_identifier.as_ref().map(|id| id.0.to_vec());
                }
                _ => {}
            }
        }

        Ok(Self {
            der: der.to_vec(),
            pem: pem::encode(pem::CERTIFICATE, der),
            not_before,
            not_after,
            subject: rfc4514_string(cert.subject())?,
            issuer: rfc4514_string(cert.issuer())?,
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            common_name: common_name(cert.subject()),
            serial: cert.raw_serial_as_string(),
            san,
            is_ca,
            basic_constraints_critical,
            subject_key_id,
            authority_key_id,
            public_key: cert.public_key().subject_public_key.data.as_ref().to_vec(),
        })
    }

    /// Returns the DER-encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the RFC 4514 subject string, e.g. `CN=rootca.magma.test,C=US`.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the RFC 4514 issuer string.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the DER-encoded subject name.
    #[must_use]
    pub fn subject_name_der(&self) -> &[u8] {
        &self.subject_raw
    }

    /// Returns the DER-encoded issuer name.
    #[must_use]
    pub fn issuer_name_der(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// Returns the subject common name, if any.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Returns the serial number as colon-separated hex.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the subject alternative names.
    #[must_use]
    pub fn san(&self) -> &[SubjectAltName] {
        &self.san
    }

    /// Returns true if basic constraints mark this certificate as a CA.
    #[must_use]
    pub const fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Returns true if the basic constraints extension is marked critical.
    #[must_use]
    pub const fn basic_constraints_critical(&self) -> bool {
        self.basic_constraints_critical
    }

    /// Returns the subject key identifier extension value.
    #[must_use]
    pub fn subject_key_id(&self) -> Option<&[u8]> {
        self.subject_key_id.as_deref()
    }

    /// Returns the key identifier of the authority key identifier extension.
    #[must_use]
    pub fn authority_key_id(&self) -> Option<&[u8]> {
        self.authority_key_id.as_deref()
    }

    /// Returns the `RSAPublicKey` bytes of the subject public key.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Returns true if subject and issuer names are identical.
    #[must_use]
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// Returns a serializable summary for display.
    #[must_use]
    pub fn info(&self) -> CertificateInfo {
        CertificateInfo {
            serial: self.serial.clone(),
            subject: self.subject.clone(),
            issuer: self.issuer.clone(),
            not_before: self.not_before,
            not_after: self.not_after,
            is_ca: self.is_ca,
            san: self.san.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Certificate metadata for display and auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Serial number (hex).
    pub serial: String,
    /// RFC 4514 subject.
    pub subject: String,
    /// RFC 4514 issuer.
    pub issuer: String,
    /// Not valid before.
    pub not_before: DateTime<Utc>,
    /// Not valid after.
    pub not_after: DateTime<Utc>,
    /// CA flag from basic constraints.
    pub is_ca: bool,
    /// Subject alternative names.
    pub san: Vec<String>,
}

/// Formats an X.509 name as an RFC 4514 string (last RDN first).
pub(crate) fn rfc4514_string(name: &X509Name<'_>) -> Result<String> {
    let mut rdns = Vec::new();
    for rdn in name.iter() {
        let mut attrs = Vec::new();
        for attr in rdn.iter() {
            let oid = attr.attr_type().to_id_string();
            let value = attr
                .as_str()
                .map_err(|e| Error::Parse(format!("non-string attribute {oid}: {e}")))?;
            attrs.push(format!("{}={}", attribute_short_name(&oid), escape_rfc4514(value)));
        }
        rdns.push(attrs.join("+"));
    }
    rdns.reverse();
    Ok(rdns.join(","))
}

fn attribute_short_name(oid: &str) -> &str {
    match oid {
        "2.5.4.3" => "CN",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.9" => "STREET",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "0.9.2342.19200300.100.1.1" => "UID",
        "0.9.2342.19200300.100.1.25" => "DC",
        other => other,
    }
}

fn escape_rfc4514(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == '#' || c == ' '))
            || (i == last && c == ' ');
        if needs_escape {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Extracts the common name from an X.509 name.
fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(String::from)
}

fn convert_general_names(names: &[GeneralName<'_>]) -> Vec<SubjectAltName> {
    names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(SubjectAltName::Dns((*dns).to_string())),
            GeneralName::IPAddress(ip_bytes) => parse_ip_bytes(ip_bytes).map(SubjectAltName::Ip),
            GeneralName::RFC822Name(email) => Some(SubjectAltName::Email((*email).to_string())),
            GeneralName::URI(uri) => Some(SubjectAltName::Uri((*uri).to_string())),
            _ => None,
        })
        .collect()
}

/// Parses IP address bytes into an `IpAddr`.
fn parse_ip_bytes(bytes: &[u8]) -> Option<std::net::IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(std::net::IpAddr::V4(std::net::Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use test_case::test_case;

    #[test_case("magma", "magma" ; "plain")]
    #[test_case("a,b", "a\\,b" ; "comma")]
    #[test_case("#tag", "\\#tag" ; "leading hash")]
    #[test_case(" lead", "\\ lead" ; "leading space")]
    #[test_case("trail ", "trail\\ " ; "trailing space")]
    #[test_case("x+y;z", "x\\+y\\;z" ; "plus and semicolon")]
    fn rfc4514_escaping(input: &str, expected: &str) {
        assert_eq!(escape_rfc4514(input), expected);
    }

    #[test]
    fn short_names_for_known_oids() {
        assert_eq!(attribute_short_name("2.5.4.3"), "CN");
        assert_eq!(attribute_short_name("2.5.4.6"), "C");
        assert_eq!(attribute_short_name("1.2.3.4"), "1.2.3.4");
    }

    #[test]
    fn private_key_rejects_certificate_pem() {
        let pem = pem::encode(pem::CERTIFICATE, &[1, 2, 3]);
        assert!(matches!(PrivateKey::from_pem(pem), Err(Error::Parse(_))));
    }

    #[test]
    fn private_key_accepts_key_labels() {
        for label in [pem::RSA_PRIVATE_KEY, pem::PRIVATE_KEY, pem::ENCRYPTED_PRIVATE_KEY] {
            let key = PrivateKey::from_pem(pem::encode(label, &[1, 2, 3])).unwrap();
            assert_eq!(key.is_encrypted(), label == pem::ENCRYPTED_PRIVATE_KEY);
        }
    }

    #[test]
    fn private_key_debug_redacted() {
        let key = PrivateKey::from_pem(pem::encode(pem::RSA_PRIVATE_KEY, &[7; 32])).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("BEGIN"));
    }

    #[test]
    fn certificate_rejects_garbage() {
        let pem = pem::encode(pem::CERTIFICATE, &[1, 2, 3, 4]);
        assert!(matches!(Certificate::from_pem(&pem), Err(Error::Parse(_))));
    }

    #[test]
    fn csr_rejects_certificate_label() {
        let pem = pem::encode(pem::CERTIFICATE, &[1, 2, 3, 4]);
        assert!(matches!(
            CertificateSigningRequest::from_pem(&pem),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn subject_alt_name_display() {
        assert_eq!(SubjectAltName::Dns("a.magma".into()).to_string(), "DNS:a.magma");
        assert_eq!(
            SubjectAltName::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).to_string(),
            "IP:10.0.0.1"
        );
    }

    #[test]
    fn subject_alt_name_serialization() {
        let san = SubjectAltName::Dns("example.com".into());
        let json = serde_json::to_string(&san).unwrap();
        let deserialized: SubjectAltName = serde_json::from_str(&json).unwrap();
        assert_eq!(san, deserialized);
    }
}
