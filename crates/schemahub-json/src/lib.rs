//! # schemahub-json
//!
//! JSON Schema (draft-07 level) format support: validation, sorted-key
//! canonical fingerprints, and the structural-subtyping compatibility
//! checker.

mod compat;

use serde_json::Value;
use std::collections::HashMap;

use schemahub_core::{
    canonical_json, sha256_hex, CompatReport, ReferenceMap, RegistryError, SchemaFormat,
    SchemaHandler,
};

/// JSON Schema handler registered under `SchemaFormat::Json`.
#[derive(Debug, Default, Clone)]
pub struct JsonSchemaHandler;

impl JsonSchemaHandler {
    pub fn new() -> Self {
        Self
    }
}

fn parse_error(message: String) -> RegistryError {
    RegistryError::Parse {
        format: SchemaFormat::Json,
        message,
    }
}

/// Parse schema text. A schema document is a JSON object or a boolean
/// (draft-07 allows `true`/`false` schemas).
fn parse(schema: &str) -> Result<Value, RegistryError> {
    let value: Value =
        serde_json::from_str(schema).map_err(|e| parse_error(e.to_string()))?;
    match value {
        Value::Object(_) | Value::Bool(_) => Ok(value),
        other => Err(parse_error(format!(
            "schema must be an object or boolean, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shallow keyword sanity checks on an object schema.
fn validate_keywords(value: &Value) -> Result<(), RegistryError> {
    let Value::Object(map) = value else {
        return Ok(());
    };
    if let Some(t) = map.get("type") {
        let ok = match t {
            Value::String(_) => true,
            Value::Array(items) => items.iter().all(|i| i.is_string()),
            _ => false,
        };
        if !ok {
            return Err(parse_error(
                "'type' must be a string or an array of strings".into(),
            ));
        }
    }
    if let Some(required) = map.get("required") {
        let ok = matches!(required, Value::Array(items) if items.iter().all(|i| i.is_string()));
        if !ok {
            return Err(parse_error("'required' must be an array of strings".into()));
        }
    }
    if let Some(props) = map.get("properties") {
        let Value::Object(props) = props else {
            return Err(parse_error("'properties' must be an object".into()));
        };
        for (name, sub) in props {
            validate_keywords(sub)
                .map_err(|e| parse_error(format!("property '{name}': {e}")))?;
        }
    }
    if let Some(Value::Object(defs)) = map.get("definitions") {
        for (name, sub) in defs {
            validate_keywords(sub)
                .map_err(|e| parse_error(format!("definition '{name}': {e}")))?;
        }
    }
    if let Some(items) = map.get("items") {
        match items {
            Value::Object(_) | Value::Bool(_) => validate_keywords(items)?,
            Value::Array(tuple) => {
                for sub in tuple {
                    validate_keywords(sub)?;
                }
            }
            _ => return Err(parse_error("'items' must be a schema or array".into())),
        }
    }
    Ok(())
}

/// Parse every referenced document up front.
fn parse_refs(references: &ReferenceMap) -> Result<HashMap<String, Value>, RegistryError> {
    let mut docs = HashMap::new();
    for (name, text) in references {
        let value =
            parse(text).map_err(|e| parse_error(format!("reference '{name}': {e}")))?;
        docs.insert(name.clone(), value);
    }
    Ok(docs)
}

impl SchemaHandler for JsonSchemaHandler {
    fn format(&self) -> SchemaFormat {
        SchemaFormat::Json
    }

    fn validate(&self, schema: &str, references: &ReferenceMap) -> Result<(), RegistryError> {
        let value = parse(schema)?;
        validate_keywords(&value)?;
        parse_refs(references).map(|_| ())
    }

    fn fingerprint(&self, schema: &str, _references: &ReferenceMap) -> Result<String, RegistryError> {
        let value = parse(schema)?;
        Ok(sha256_hex(canonical_json(&value).as_bytes()))
    }

    fn normalize(&self, schema: &str, _references: &ReferenceMap) -> Result<String, RegistryError> {
        let value = parse(schema)?;
        Ok(canonical_json(&value))
    }

    fn check(
        &self,
        reader: &str,
        reader_refs: &ReferenceMap,
        writer: &str,
        writer_refs: &ReferenceMap,
    ) -> CompatReport {
        let (reader, reader_docs) = match parse(reader).and_then(|v| {
            parse_refs(reader_refs).map(|docs| (v, docs))
        }) {
            Ok(parsed) => parsed,
            Err(e) => return CompatReport::incompatible(format!("failed to parse new schema: {e}")),
        };
        let (writer, writer_docs) = match parse(writer).and_then(|v| {
            parse_refs(writer_refs).map(|docs| (v, docs))
        }) {
            Ok(parsed) => parsed,
            Err(e) => return CompatReport::incompatible(format!("failed to parse old schema: {e}")),
        };
        compat::check(&reader, &reader_docs, &writer, &writer_docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> JsonSchemaHandler {
        JsonSchemaHandler::new()
    }

    fn refs() -> ReferenceMap {
        ReferenceMap::new()
    }

    fn check(new: &str, old: &str) -> CompatReport {
        handler().check(new, &refs(), old, &refs())
    }

    const PERSON_V1: &str = r#"{
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "age": {"type": "integer"}
        },
        "required": ["name"]
    }"#;

    #[test]
    fn fingerprint_is_key_order_independent() {
        let reordered = r#"{
            "required": ["name"],
            "properties": {
                "age": {"type": "integer"},
                "name": {"type": "string"}
            },
            "type": "object"
        }"#;
        let a = handler().fingerprint(PERSON_V1, &refs()).unwrap();
        let b = handler().fingerprint(reordered, &refs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn boolean_schemas_are_valid() {
        assert!(handler().validate("true", &refs()).is_ok());
        assert!(handler().validate("false", &refs()).is_ok());
        assert!(handler().validate("42", &refs()).is_err());
        assert!(handler().validate("[1]", &refs()).is_err());
    }

    #[test]
    fn malformed_keywords_are_parse_errors() {
        assert!(handler()
            .validate(r#"{"type": 12}"#, &refs())
            .is_err());
        assert!(handler()
            .validate(r#"{"required": "name"}"#, &refs())
            .is_err());
        assert!(handler()
            .validate(r#"{"properties": []}"#, &refs())
            .is_err());
    }

    #[test]
    fn added_optional_property_is_compatible() {
        let v2 = r#"{
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"},
                "email": {"type": "string"}
            },
            "required": ["name"]
        }"#;
        let report = check(v2, PERSON_V1);
        assert!(report.is_compatible(), "messages: {:?}", report.messages);
    }

    #[test]
    fn new_required_property_is_incompatible() {
        let v2 = r#"{
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            },
            "required": ["name", "age"]
        }"#;
        let report = check(v2, PERSON_V1);
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("age"));
    }

    #[test]
    fn narrowed_property_type_is_incompatible() {
        let v2 = r#"{
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "string"}
            },
            "required": ["name"]
        }"#;
        let report = check(v2, PERSON_V1);
        assert!(!report.is_compatible());
        assert!(report.messages.iter().any(|m| m.contains("age")));
    }

    #[test]
    fn integer_is_accepted_where_number_is_read() {
        let int_schema = r#"{"type": "integer"}"#;
        let num_schema = r#"{"type": "number"}"#;
        assert!(check(num_schema, int_schema).is_compatible());
        assert!(!check(int_schema, num_schema).is_compatible());
    }

    #[test]
    fn widened_enum_is_compatible_narrowed_is_not() {
        let narrow = r#"{"enum": ["red", "green"]}"#;
        let wide = r#"{"enum": ["red", "green", "blue"]}"#;
        assert!(check(wide, narrow).is_compatible());
        assert!(!check(narrow, wide).is_compatible());
    }

    #[test]
    fn tightened_additional_properties_is_incompatible() {
        let open = r#"{"type": "object", "properties": {"a": {"type": "string"}}}"#;
        let closed = r#"{
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": false
        }"#;
        assert!(!check(closed, open).is_compatible());
        assert!(check(open, closed).is_compatible());
    }

    #[test]
    fn tightened_bounds_are_incompatible() {
        let loose = r#"{"type": "integer", "minimum": 0}"#;
        let tight = r#"{"type": "integer", "minimum": 10}"#;
        assert!(!check(tight, loose).is_compatible());
        assert!(check(loose, tight).is_compatible());
    }

    #[test]
    fn parse_failure_reports_instead_of_erroring() {
        let report = check("{not json", r#"{"type": "object"}"#);
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("failed to parse new schema"));
    }
}
