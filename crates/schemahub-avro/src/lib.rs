//! # schemahub-avro
//!
//! Avro format support: parsing (via `apache-avro`), Parsing Canonical Form
//! fingerprints, and the reader/writer resolution compatibility checker.

mod compat;

use apache_avro::schema::Schema;

use schemahub_core::{
    canonical_json, sha256_hex, CompatReport, ReferenceMap, RegistryError, SchemaFormat,
    SchemaHandler,
};

/// Avro handler registered under `SchemaFormat::Avro`.
#[derive(Debug, Default, Clone)]
pub struct AvroHandler;

impl AvroHandler {
    pub fn new() -> Self {
        Self
    }

    /// Parse `schema`, resolving named types defined by `references`.
    ///
    /// References are parsed together with the main document so that
    /// cross-document names resolve; the main schema is always the last
    /// entry of the list.
    fn parse(&self, schema: &str, references: &ReferenceMap) -> Result<Schema, RegistryError> {
        if references.is_empty() {
            return Schema::parse_str(schema).map_err(|e| parse_error(e.to_string()));
        }
        let mut texts: Vec<&str> = references.values().map(|s| s.as_str()).collect();
        texts.push(schema);
        let mut parsed = Schema::parse_list(&texts).map_err(|e| parse_error(e.to_string()))?;
        parsed
            .pop()
            .ok_or_else(|| parse_error("empty schema list".to_string()))
    }
}

fn parse_error(message: String) -> RegistryError {
    RegistryError::Parse {
        format: SchemaFormat::Avro,
        message,
    }
}

impl SchemaHandler for AvroHandler {
    fn format(&self) -> SchemaFormat {
        SchemaFormat::Avro
    }

    fn validate(&self, schema: &str, references: &ReferenceMap) -> Result<(), RegistryError> {
        self.parse(schema, references).map(|_| ())
    }

    fn fingerprint(&self, schema: &str, references: &ReferenceMap) -> Result<String, RegistryError> {
        let parsed = self.parse(schema, references)?;
        Ok(sha256_hex(parsed.canonical_form().as_bytes()))
    }

    /// Canonical re-serialization that keeps defaults and logical types
    /// (unlike Parsing Canonical Form, which strips them and is therefore
    /// only suitable for identity, not for storage).
    fn normalize(&self, schema: &str, references: &ReferenceMap) -> Result<String, RegistryError> {
        let parsed = self.parse(schema, references)?;
        let value = serde_json::to_value(&parsed).map_err(|e| parse_error(e.to_string()))?;
        Ok(canonical_json(&value))
    }

    fn check(
        &self,
        reader: &str,
        reader_refs: &ReferenceMap,
        writer: &str,
        writer_refs: &ReferenceMap,
    ) -> CompatReport {
        let reader = match self.parse(reader, reader_refs) {
            Ok(schema) => schema,
            Err(e) => return CompatReport::incompatible(format!("failed to parse new schema: {e}")),
        };
        let writer = match self.parse(writer, writer_refs) {
            Ok(schema) => schema,
            Err(e) => return CompatReport::incompatible(format!("failed to parse old schema: {e}")),
        };
        compat::Checker::new(&reader, &writer).run()
    }
}
