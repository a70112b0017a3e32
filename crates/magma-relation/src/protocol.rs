//! Protocol descriptions: which fields each side of a relation writes.
//!
//! Every certificate kind the certifier distributes speaks the same protocol
//! and differs only in its relation name and field sets, so a [`Protocol`] is
//! plain data rather than a type per kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Bucket, Field, RelationId};

/// Field sets and relation name for one distribution protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    relation_name: String,
    provides: Vec<Field>,
    requests: Vec<Field>,
}

impl Protocol {
    /// Creates a protocol where the provider publishes `provides`.
    #[must_use]
    pub fn new(relation_name: impl Into<String>, provides: impl IntoIterator<Item = Field>) -> Self {
        Self {
            relation_name: relation_name.into(),
            provides: dedup(provides),
            requests: Vec::new(),
        }
    }

    /// Declares fields the requirer must publish before the provider acts.
    #[must_use]
    pub fn with_requests(mut self, requests: impl IntoIterator<Item = Field>) -> Self {
        self.requests = dedup(requests);
        self
    }

    /// The relation name, e.g. `cert-controller`.
    #[must_use]
    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    /// Fields the provider writes.
    #[must_use]
    pub fn provides(&self) -> &[Field] {
        &self.provides
    }

    /// Fields the requirer writes.
    #[must_use]
    pub fn requests(&self) -> &[Field] {
        &self.requests
    }

    /// Returns the provided fields when every one of them is non-empty.
    #[must_use]
    pub fn provided_material(&self, bucket: &Bucket) -> Option<Material> {
        collect(&self.provides, bucket)
    }

    /// Returns the request fields when every one of them is non-empty.
    #[must_use]
    pub fn request_material(&self, bucket: &Bucket) -> Option<Material> {
        collect(&self.requests, bucket)
    }

    /// Provided fields that `material` lacks.
    #[must_use]
    pub fn missing_provided(&self, material: &Material) -> Vec<Field> {
        self.provides
            .iter()
            .copied()
            .filter(|field| material.get(*field).is_none())
            .collect()
    }

    /// Builds the requirer notification for complete provider material.
    #[must_use]
    pub fn notification(&self, relation_id: RelationId, material: Material) -> Notification {
        if self.provides.contains(&Field::Certificate) {
            Notification::CertificateAvailable {
                relation_id,
                material,
            }
        } else {
            Notification::PrivateKeyAvailable {
                relation_id,
                material,
            }
        }
    }
}

fn dedup(fields: impl IntoIterator<Item = Field>) -> Vec<Field> {
    let mut out: Vec<Field> = Vec::new();
    for field in fields {
        if !out.contains(&field) {
            out.push(field);
        }
    }
    out
}

fn collect(fields: &[Field], bucket: &Bucket) -> Option<Material> {
    let mut material = Material::new();
    for field in fields {
        material.insert(*field, field.read(bucket)?);
    }
    Some(material)
}

/// The certificate kinds the certifier distributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateKind {
    /// Root CA certificate.
    RootCa,
    /// Controller wildcard certificate.
    Controller,
    /// Admin-operator client certificate and key.
    AdminOperator,
    /// Fluentd certificate and key.
    Fluentd,
    /// Bootstrapper private key.
    Bootstrapper,
    /// Certificates signed from a requirer-supplied CSR.
    SignedCsr,
}

impl CertificateKind {
    /// Every kind, in bundle order.
    pub const ALL: [Self; 6] = [
        Self::RootCa,
        Self::Controller,
        Self::AdminOperator,
        Self::Fluentd,
        Self::Bootstrapper,
        Self::SignedCsr,
    ];

    /// Relation name the kind is served on.
    #[must_use]
    pub const fn relation_name(self) -> &'static str {
        match self {
            Self::RootCa => "cert-root-ca",
            Self::Controller => "cert-controller",
            Self::AdminOperator => "cert-admin-operator",
            Self::Fluentd => "cert-fluentd",
            Self::Bootstrapper => "cert-bootstrapper",
            Self::SignedCsr => "cert-csr",
        }
    }

    /// Looks a kind up by relation name.
    #[must_use]
    pub fn from_relation_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.relation_name() == name)
    }

    /// The protocol this kind speaks.
    #[must_use]
    pub fn protocol(self) -> Protocol {
        let name = self.relation_name();
        match self {
            Self::RootCa | Self::Controller => Protocol::new(name, [Field::Certificate]),
            Self::AdminOperator | Self::Fluentd => {
                Protocol::new(name, [Field::Certificate, Field::PrivateKey])
            }
            Self::Bootstrapper => Protocol::new(name, [Field::PrivateKey]),
            Self::SignedCsr => Protocol::new(name, [Field::Certificate])
                .with_requests([Field::CertificateSigningRequest]),
        }
    }
}

impl std::fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.relation_name())
    }
}

/// PEM values keyed by field.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Material(BTreeMap<Field, String>);

impl Material {
    /// Creates empty material.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    /// Sets a field. Empty values are ignored.
    pub fn insert(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.0.remove(&field);
        } else {
            self.0.insert(field, value);
        }
    }

    /// Returns a field's value.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    /// The certificate field.
    #[must_use]
    pub fn certificate(&self) -> Option<&str> {
        self.get(Field::Certificate)
    }

    /// The private key field.
    #[must_use]
    pub fn private_key(&self) -> Option<&str> {
        self.get(Field::PrivateKey)
    }

    /// The CSR field.
    #[must_use]
    pub fn certificate_signing_request(&self) -> Option<&str> {
        self.get(Field::CertificateSigningRequest)
    }

    /// Iterates fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.0.iter().map(|(field, value)| (*field, value.as_str()))
    }

    /// Whether no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (field, value) in &self.0 {
            if *field == Field::PrivateKey {
                map.entry(field, &"[REDACTED]");
            } else {
                map.entry(field, &format_args!("<{} bytes>", value.len()));
            }
        }
        map.finish()
    }
}

/// Raised on the provider side when a requirer needs material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Relation to answer on.
    pub relation_id: RelationId,
    /// Relation name of the protocol.
    pub relation_name: String,
    /// Requirer-supplied request fields (empty for protocols without any).
    pub request: Material,
}

/// Raised on the requirer side when the provider's data is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A certificate (and, for paired protocols, its key) is available.
    CertificateAvailable {
        /// Relation the data arrived on.
        relation_id: RelationId,
        /// The provided fields.
        material: Material,
    },
    /// A private key is available.
    PrivateKeyAvailable {
        /// Relation the data arrived on.
        relation_id: RelationId,
        /// The provided fields.
        material: Material,
    },
}

impl Notification {
    /// Relation the material arrived on.
    #[must_use]
    pub const fn relation_id(&self) -> RelationId {
        match self {
            Self::CertificateAvailable { relation_id, .. }
            | Self::PrivateKeyAvailable { relation_id, .. } => *relation_id,
        }
    }

    /// The delivered material.
    #[must_use]
    pub const fn material(&self) -> &Material {
        match self {
            Self::CertificateAvailable { material, .. }
            | Self::PrivateKeyAvailable { material, .. } => material,
        }
    }

    /// The delivered certificate, if any.
    #[must_use]
    pub fn certificate(&self) -> Option<&str> {
        self.material().certificate()
    }

    /// The delivered private key, if any.
    #[must_use]
    pub fn private_key(&self) -> Option<&str> {
        self.material().private_key()
    }
}
