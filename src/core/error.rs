//! Error types for the PLM core
//!
//! Every rejected operation reports a specific kind plus the key involved,
//! so callers can tell a checkout conflict from a stale reference.

use miette::Diagnostic;
use thiserror::Error;

use crate::core::entity::RevisionStatus;
use crate::core::identity::IdParseError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, PlmError>;

/// The kind of entity named in an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Master,
    Revision,
    Iteration,
    ConfigurationItem,
    UsageLink,
    SubstituteLink,
    PathToPathLink,
    Path,
    Baseline,
    ProductInstance,
    ProductInstanceIteration,
    Effectivity,
    Attribute,
    File,
    DocumentLink,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Master => "master",
            EntityKind::Revision => "revision",
            EntityKind::Iteration => "iteration",
            EntityKind::ConfigurationItem => "configuration item",
            EntityKind::UsageLink => "usage link",
            EntityKind::SubstituteLink => "substitute link",
            EntityKind::PathToPathLink => "path-to-path link",
            EntityKind::Path => "path",
            EntityKind::Baseline => "baseline",
            EntityKind::ProductInstance => "product instance",
            EntityKind::ProductInstanceIteration => "product instance iteration",
            EntityKind::Effectivity => "effectivity",
            EntityKind::Attribute => "attribute",
            EntityKind::File => "file",
            EntityKind::DocumentLink => "document link",
        };
        f.write_str(name)
    }
}

/// Why a state transition or mutation was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("already checked out by {holder}")]
    AlreadyCheckedOut { holder: String },

    #[error("checked out by {holder}")]
    CheckedOutByOther { holder: String },

    #[error("not checked out")]
    NotCheckedOut,

    #[error("not the latest revision (latest is {latest})")]
    NotLatestRevision { latest: String },

    #[error("the first iteration cannot be discarded")]
    FirstIteration,

    #[error("iteration {iteration} is checked in and immutable")]
    IterationFrozen { iteration: u32 },

    #[error("invalid status transition: {from} → {to}")]
    InvalidTransition {
        from: RevisionStatus,
        to: RevisionStatus,
    },

    #[error("revision status is {status}, only work-in-progress revisions can be checked out")]
    RevisionNotWip { status: RevisionStatus },

    #[error("predecessor revision {version} is checked out")]
    PredecessorCheckedOut { version: String },

    #[error("revision has no iteration")]
    NoIteration,

    #[error("revision has no checked-in iteration to copy")]
    NoCheckedInIteration,

    #[error("revision is checked out by {holder}")]
    CheckedOut { holder: String },

    #[error("structure cycle through part {master}")]
    CyclicStructure { master: String },

    #[error("several substitutes selected for usage link {link}")]
    ConflictingSubstitutes { link: String },

    #[error("source and target are the same path")]
    SamePath,

    #[error("baseline {baseline} belongs to another configuration item")]
    ForeignBaseline { baseline: i64 },

    #[error("{kind} masters cannot carry a product structure")]
    NotAPart { kind: crate::core::identity::MasterKind },

    #[error("batch has {old} old links but {new} new links")]
    MismatchedBatch { old: usize, new: usize },
}

/// Errors produced by the PLM core
#[derive(Debug, Error, Diagnostic)]
pub enum PlmError {
    #[error("{entity} not found: {key}")]
    #[diagnostic(code(plm::not_found))]
    NotFound { entity: EntityKind, key: String },

    #[error("{entity} already exists: {key}")]
    #[diagnostic(code(plm::already_exists))]
    AlreadyExists { entity: EntityKind, key: String },

    #[error("Not allowed on {key}: {denial}")]
    #[diagnostic(code(plm::not_allowed))]
    NotAllowed { key: String, denial: Denial },

    #[error("{key} is still referenced by {referenced_by}")]
    #[diagnostic(
        code(plm::constraint_violation),
        help("remove or re-point the referencing entities first")
    )]
    ConstraintViolation { key: String, referenced_by: String },

    #[error("Invalid path '{path}': {reason}")]
    #[diagnostic(code(plm::invalid_path))]
    InvalidPath { path: String, reason: String },

    #[error("Invalid identifier: {0}")]
    #[diagnostic(code(plm::invalid_id))]
    InvalidId(#[from] IdParseError),

    #[error("Access denied for {user}: {action} on {key}")]
    #[diagnostic(code(plm::access_denied))]
    AccessDenied {
        user: String,
        action: String,
        key: String,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(plm::config))]
    Config { message: String },

    #[error("Blob store error for {full_name}: {message}")]
    #[diagnostic(code(plm::blob))]
    Blob { full_name: String, message: String },

    #[error("Database error: {0}")]
    #[diagnostic(code(plm::database))]
    Database(#[from] rusqlite::Error),

    #[error("Serialization failed: {0}")]
    #[diagnostic(code(plm::serialization))]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(plm::io))]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned by a panicking writer")]
    #[diagnostic(code(plm::lock_poisoned))]
    LockPoisoned,
}

impl PlmError {
    pub fn not_found(entity: EntityKind, key: impl std::fmt::Display) -> Self {
        PlmError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn already_exists(entity: EntityKind, key: impl std::fmt::Display) -> Self {
        PlmError::AlreadyExists {
            entity,
            key: key.to_string(),
        }
    }

    pub fn not_allowed(key: impl std::fmt::Display, denial: Denial) -> Self {
        PlmError::NotAllowed {
            key: key.to_string(),
            denial,
        }
    }

    pub fn constraint(key: impl std::fmt::Display, referenced_by: impl Into<String>) -> Self {
        PlmError::ConstraintViolation {
            key: key.to_string(),
            referenced_by: referenced_by.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlmError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, PlmError::AlreadyExists { .. })
    }

    pub fn is_not_allowed(&self) -> bool {
        matches!(self, PlmError::NotAllowed { .. })
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, PlmError::ConstraintViolation { .. })
    }

    /// The denial carried by a `NotAllowed` error
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            PlmError::NotAllowed { denial, .. } => Some(denial),
            _ => None,
        }
    }
}
