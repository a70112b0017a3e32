//! Error types for certificate distribution.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Field, RelationId};

/// Result type for distribution operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the distribution protocol.
///
/// A relation whose peer data is only partially populated is not an error;
/// the requirer simply produces no notification until it is complete.
#[derive(Debug, Error)]
pub enum Error {
    /// No relation with this id is known.
    #[error("unknown relation {0}")]
    UnknownRelation(RelationId),

    /// A relation with this id already exists.
    #[error("relation {0} already exists")]
    DuplicateRelation(RelationId),

    /// A provider tried to publish without every field its protocol provides.
    #[error("relation {relation_id}: material is missing {missing:?}")]
    IncompleteMaterial {
        /// Target relation.
        relation_id: RelationId,
        /// Provided fields that were absent or empty.
        missing: Vec<Field>,
    },

    /// The material source could not produce material for a request.
    #[error("material source failed: {0}")]
    Material(String),

    /// The consumer could not act on available material.
    #[error("consumer failed: {0}")]
    Consumer(String),

    /// A workload file operation failed.
    #[error("workload write to {path} failed: {source}")]
    Workload {
        /// Path inside the workload.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Protocol state could not be persisted.
    #[error("failed to persist state to {path}: {reason}")]
    Persistence {
        /// Snapshot file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Certificate machinery failed while serving a request.
    #[error(transparent)]
    Pki(#[from] magma_pki::Error),
}
