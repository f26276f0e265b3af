//! Error taxonomy for the registry core.
//!
//! Storage-level transient failures are marked retriable and retried in
//! place by the storage layer; every other kind propagates unchanged to the
//! orchestrator, which forwards it to the external HTTP collaborator via
//! the `http_status`/`error_code` mapping.

use thiserror::Error;

use crate::types::SchemaFormat;

/// Errors surfaced by the registry core.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("subject '{subject}' not found")]
    SubjectNotFound { subject: String },

    #[error("version {version} not found for subject '{subject}'")]
    VersionNotFound { subject: String, version: i32 },

    #[error("schema with id {id} not found")]
    SchemaNotFound { id: i64 },

    /// Lookup of schema *content* (by text, before an id is known) missed.
    #[error("schema not found under subject '{subject}'")]
    SchemaContentNotFound { subject: String },

    #[error("subject '{subject}' version {version} must be soft-deleted before permanent deletion")]
    VersionNotSoftDeleted { subject: String, version: i32 },

    #[error("subject '{subject}' must be soft-deleted before permanent deletion")]
    SubjectNotSoftDeleted { subject: String },

    #[error("subject '{subject}' is soft-deleted")]
    SubjectDeleted { subject: String },

    #[error("schema already registered under subject '{subject}' with id {id} as version {version}")]
    SchemaExists {
        subject: String,
        id: i64,
        version: i32,
    },

    #[error("schema is incompatible with an earlier schema: {}", messages.join("; "))]
    Incompatible { messages: Vec<String> },

    #[error("invalid {format} schema: {message}")]
    Parse {
        format: SchemaFormat,
        message: String,
    },

    #[error("subject '{subject}' is in read-only mode")]
    ReadOnlyMode { subject: String },

    #[error("subject '{subject}' is not in import mode")]
    NotInImportMode { subject: String },

    #[error("schema id {id} is already bound to a different schema in this context")]
    IdConflict { id: i64 },

    #[error("invalid schema reference '{name}': subject '{subject}' version {version} not found")]
    InvalidReference {
        name: String,
        subject: String,
        version: i32,
    },

    #[error("invalid schema version: {0}")]
    InvalidVersion(String),

    #[error("invalid compatibility level: {0}")]
    InvalidCompatibilityLevel(String),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("unknown schema format: {0}")]
    UnknownFormat(String),

    /// Deadlock, serialization failure, or other transient database error.
    /// The storage layer retries these with backoff before giving up.
    #[error("transient storage error: {0}")]
    Retriable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RegistryError {
    /// Returns `true` if the operation may be retried transparently.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }

    /// HTTP status the external REST collaborator maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SubjectNotFound { .. }
            | Self::VersionNotFound { .. }
            | Self::SchemaNotFound { .. }
            | Self::SchemaContentNotFound { .. }
            | Self::VersionNotSoftDeleted { .. }
            | Self::SubjectNotSoftDeleted { .. }
            | Self::SubjectDeleted { .. } => 404,
            Self::Incompatible { .. } | Self::IdConflict { .. } | Self::SchemaExists { .. } => 409,
            Self::Parse { .. }
            | Self::ReadOnlyMode { .. }
            | Self::NotInImportMode { .. }
            | Self::InvalidReference { .. }
            | Self::InvalidVersion(_)
            | Self::InvalidCompatibilityLevel(_)
            | Self::InvalidMode(_)
            | Self::UnknownFormat(_) => 422,
            Self::Retriable(_) | Self::Storage(_) => 500,
        }
    }

    /// Confluent-style error code carried in REST error bodies.
    pub fn error_code(&self) -> u32 {
        match self {
            Self::SubjectNotFound { .. } => 40401,
            Self::VersionNotFound { .. } => 40402,
            Self::SchemaNotFound { .. } | Self::SchemaContentNotFound { .. } => 40403,
            Self::SubjectDeleted { .. } => 40404,
            Self::SubjectNotSoftDeleted { .. } => 40405,
            Self::VersionNotSoftDeleted { .. } => 40407,
            Self::Incompatible { .. } => 40901,
            Self::SchemaExists { .. } => 40902,
            Self::IdConflict { .. } => 40903,
            Self::Parse { .. } => 42201,
            Self::InvalidVersion(_) => 42202,
            Self::InvalidCompatibilityLevel(_) => 42203,
            Self::InvalidReference { .. } => 42204,
            Self::ReadOnlyMode { .. } | Self::NotInImportMode { .. } | Self::InvalidMode(_) => {
                42205
            }
            Self::UnknownFormat(_) => 42206,
            Self::Retriable(_) | Self::Storage(_) => 50001,
        }
    }
}
