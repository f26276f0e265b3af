//! Request/response DTOs matching the Confluent REST vocabulary, so the
//! external HTTP collaborator can serialize them unchanged.

use serde::{Deserialize, Serialize};

use schemahub_core::{Metadata, RuleSet, SchemaFormat, SchemaReference};

/// Body of `POST /subjects/{subject}/versions` (and of the lookup and
/// compatibility-test calls, which share its shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub schema: String,
    /// Defaults to AVRO when omitted, per the wire contract.
    #[serde(rename = "schemaType", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SchemaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(rename = "ruleSet", default, skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<RuleSet>,
    /// `?normalize` query parameter; overrides the subject config.
    #[serde(skip)]
    pub normalize: Option<bool>,
}

impl RegisterRequest {
    pub fn new(schema: impl Into<String>, format: SchemaFormat) -> Self {
        Self {
            schema: schema.into(),
            schema_type: Some(format),
            ..Self::default()
        }
    }

    pub fn format(&self) -> SchemaFormat {
        self.schema_type.unwrap_or_default()
    }
}

/// Response of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: i64,
    pub version: i32,
}

/// Response of `POST /compatibility/subjects/{subject}/versions/…`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub is_compatible: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_confluent_body() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{
                "schema": "{\"type\":\"string\"}",
                "schemaType": "JSON",
                "references": [{"name": "base", "subject": "base-value", "version": 2}]
            }"#,
        )
        .unwrap();
        assert_eq!(req.format(), SchemaFormat::Json);
        assert_eq!(req.references[0].subject, "base-value");
        assert_eq!(req.normalize, None);
    }

    #[test]
    fn omitted_schema_type_defaults_to_avro() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"schema": "\"int\""}"#).unwrap();
        assert_eq!(req.format(), SchemaFormat::Avro);
    }
}
