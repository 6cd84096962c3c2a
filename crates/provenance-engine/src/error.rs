//! Error types for the provenance engine

use thiserror::Error;

use crate::action::ActionId;
use crate::ids::{ObjectId, ObjectKind};

/// Result type alias using ProvenanceError
pub type Result<T> = std::result::Result<T, ProvenanceError>;

/// Errors that can occur in the provenance engine
#[derive(Debug, Error)]
pub enum ProvenanceError {
    /// A version was requested that has no corresponding action in the log
    #[error("Unknown version: {0}")]
    UnknownVersion(ActionId),

    /// A version range was requested whose start is not an ancestor of its end
    #[error("Version {ancestor} is not an ancestor of version {descendant}")]
    NotAnAncestor {
        ancestor: ActionId,
        descendant: ActionId,
    },

    /// A group boundary connection has no matching proxy port
    #[error("Malformed group boundary on module {group_id}: no {direction} proxy for port '{port}' ({spec})")]
    MalformedGroupBoundary {
        group_id: ObjectId,
        direction: &'static str,
        port: String,
        spec: String,
    },

    /// An abstraction reference points at a sub-log that does not exist
    #[error("Unknown abstraction: {0}")]
    UnknownAbstraction(ObjectId),

    /// An Add/Change introduced an id that is already live in the log
    #[error("Id collision: {kind} {id} is already in use")]
    IdCollision { kind: ObjectKind, id: ObjectId },

    /// An ephemeral id from group expansion reached the persisted log
    #[error("Scratch id {id} for {kind} cannot be stored in the log")]
    ScratchIdInLog { kind: ObjectKind, id: ObjectId },

    /// An object was attached to a parent of the wrong kind
    #[error("{kind} cannot be attached to {parent}")]
    InvalidParent { kind: ObjectKind, parent: String },

    /// The parent of an object does not exist in the workflow
    #[error("Missing parent {kind} {id}")]
    MissingParent { kind: ObjectKind, id: ObjectId },

    /// The target of a Delete/Change does not exist in the workflow
    #[error("Missing object {kind} {id}")]
    MissingObject { kind: ObjectKind, id: ObjectId },

    /// A tag name or tagged version is already taken
    #[error("Duplicate tag '{name}' for version {version}")]
    DuplicateTag { name: String, version: ActionId },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvenanceError {
    /// Create an id collision error
    pub fn collision(kind: ObjectKind, id: ObjectId) -> Self {
        Self::IdCollision { kind, id }
    }

    /// Create a missing object error
    pub fn missing(kind: ObjectKind, id: ObjectId) -> Self {
        Self::MissingObject { kind, id }
    }

    /// Create a missing parent error
    pub fn missing_parent(kind: ObjectKind, id: ObjectId) -> Self {
        Self::MissingParent { kind, id }
    }
}
