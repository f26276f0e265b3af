//! Format handler contract — parsing, fingerprinting, and compatibility
//! checking behind one trait per schema format.
//!
//! Concrete implementations live in `schemahub-avro`, `schemahub-protobuf`,
//! and `schemahub-json`. The orchestrator selects a handler by format tag
//! from a `FormatRegistry` populated at startup.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::types::SchemaFormat;

/// Resolved references for one schema: reference name → schema text.
/// Insertion order is preserved (proto imports are order-sensitive).
pub type ReferenceMap = IndexMap<String, String>;

/// Outcome of a compatibility check.
///
/// `messages` holds incompatibilities; the check passes iff it is empty.
/// `notices` holds findings that are reported but not breaking (e.g. a
/// protobuf package rename) and never affect the verdict.
#[derive(Debug, Clone, Default)]
pub struct CompatReport {
    pub messages: Vec<String>,
    pub notices: Vec<String>,
}

impl CompatReport {
    pub fn compatible() -> Self {
        Self::default()
    }

    pub fn incompatible(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            notices: Vec::new(),
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn notice(&mut self, message: impl Into<String>) {
        self.notices.push(message.into());
    }

    pub fn merge(&mut self, other: CompatReport) {
        self.messages.extend(other.messages);
        self.notices.extend(other.notices);
    }
}

/// Per-format parser, canonicalizer, and compatibility checker.
pub trait SchemaHandler: Send + Sync {
    fn format(&self) -> SchemaFormat;

    /// Parse-check the schema text, resolving references from `references`.
    /// Fails with `RegistryError::Parse` on invalid input.
    fn validate(&self, schema: &str, references: &ReferenceMap) -> Result<(), RegistryError>;

    /// Hex digest of the schema's canonical form. Two schemas equal under
    /// the format's canonical form produce the same string.
    fn fingerprint(&self, schema: &str, references: &ReferenceMap) -> Result<String, RegistryError>;

    /// Canonical rendering of the schema text, stored in place of the raw
    /// text when the subject config enables normalization.
    fn normalize(&self, schema: &str, references: &ReferenceMap) -> Result<String, RegistryError>;

    /// Decide whether `reader` (the proposed schema) can read data written
    /// by `writer` (an existing version).
    ///
    /// Structural issues never error: a parse failure of either side is
    /// reported as an incompatibility message.
    fn check(
        &self,
        reader: &str,
        reader_refs: &ReferenceMap,
        writer: &str,
        writer_refs: &ReferenceMap,
    ) -> CompatReport;
}

/// `format → handler` map populated at startup.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    handlers: HashMap<SchemaFormat, Arc<dyn SchemaHandler>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handler: Arc<dyn SchemaHandler>) {
        self.handlers.insert(handler.format(), handler);
    }

    pub fn get(&self, format: SchemaFormat) -> Result<&Arc<dyn SchemaHandler>, RegistryError> {
        self.handlers
            .get(&format)
            .ok_or_else(|| RegistryError::UnknownFormat(format.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// SHA-256 digest rendered as lowercase hex — the fingerprint encoding every
/// format handler uses.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Deterministic JSON rendering: object keys sorted, no whitespace.
/// Equal values always produce identical strings, independent of the key
/// order the client sent.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Display on Value produces compact JSON with escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}
