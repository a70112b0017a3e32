//! Identifiers and field names shared by both sides of a relation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// String-keyed data one side of a relation publishes to the other.
pub type Bucket = BTreeMap<String, String>;

/// Platform-assigned relation instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(u32);

impl RelationId {
    /// Wraps a raw relation id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which end of a relation a unit sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Serves certificate material.
    Provider,
    /// Consumes certificate material.
    Requirer,
}

impl Side {
    /// Returns the other end.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Provider => Self::Requirer,
            Self::Requirer => Self::Provider,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider => write!(f, "provider"),
            Self::Requirer => write!(f, "requirer"),
        }
    }
}

/// A well-known relation data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    /// PEM certificate.
    #[serde(rename = "certificate")]
    Certificate,
    /// PEM private key.
    #[serde(rename = "private_key")]
    PrivateKey,
    /// PEM certificate signing request.
    #[serde(rename = "certificate-signing-request")]
    CertificateSigningRequest,
}

impl Field {
    /// The key this field is stored under in a relation bucket.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::PrivateKey => "private_key",
            Self::CertificateSigningRequest => "certificate-signing-request",
        }
    }

    /// Reads this field from a bucket, treating an empty value as absent.
    #[must_use]
    pub fn read(self, bucket: &Bucket) -> Option<&str> {
        bucket
            .get(self.key())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Relation lifecycle events delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// The relation was established.
    Joined,
    /// The peer's bucket changed.
    Changed,
    /// The relation was removed.
    Broken,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Joined => write!(f, "relation-joined"),
            Self::Changed => write!(f, "relation-changed"),
            Self::Broken => write!(f, "relation-broken"),
        }
    }
}
