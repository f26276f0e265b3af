//! # schemahub-registry
//!
//! The registry orchestrator: applies mode enforcement, parsing,
//! normalization, and compatibility policy before delegating to a
//! `SchemaStore`. This is the surface external collaborators (the REST
//! layer, the CLI) consume.

pub mod observability;
mod registry;
mod request;

pub use observability::{init_tracing, LogConfig};
pub use registry::Registry;
pub use request::{CompatibilityResult, RegisterRequest, RegisterResponse};
