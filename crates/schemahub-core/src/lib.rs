//! # schemahub-core
//!
//! Core traits, types, and primitives shared across all Schemahub crates.
//! The format crates (avro/protobuf/json), the storage backends, and the
//! registry orchestrator are all built on top of the interfaces defined here.

pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod mode;
pub mod storage;
pub mod types;

pub use config::{CompatibilityLevel, SubjectConfig};
pub use context::{qualify_subject, split_qualified_subject, DEFAULT_CONTEXT, GLOBAL_SUBJECT};
pub use error::RegistryError;
pub use format::{
    canonical_json, sha256_hex, CompatReport, FormatRegistry, ReferenceMap, SchemaHandler,
};
pub use mode::Mode;
pub use storage::{ListSchemasParams, SchemaStore};
pub use types::{
    Metadata, NewSchema, Rule, RuleSet, SchemaFormat, SchemaRecord, SchemaReference,
    SubjectVersion, LATEST_VERSION,
};
