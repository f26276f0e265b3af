//! # schemahub-protobuf
//!
//! Protobuf format support: a hand-written `.proto` parser, normalized
//! source fingerprints, and the wire-format compatibility checker.
//!
//! Imports resolve against the supplied reference map; the well-known
//! `google/protobuf` types are bundled and need no references.

pub mod ast;
mod compat;
pub mod parser;
mod wellknown;

use std::collections::{HashSet, VecDeque};

use ast::{FieldType, MessageDef, ProtoFile, TypeIndex};
use schemahub_core::{
    sha256_hex, CompatReport, ReferenceMap, RegistryError, SchemaFormat, SchemaHandler,
};

/// A parsed file together with the type index spanning it and everything it
/// imports.
pub(crate) struct Unit {
    pub file: ProtoFile,
    pub index: TypeIndex,
}

struct Loaded {
    unit: Unit,
    /// Resolved imports in first-seen declaration order.
    imports: Vec<ProtoFile>,
}

/// Protobuf handler registered under `SchemaFormat::Protobuf`.
#[derive(Debug, Default, Clone)]
pub struct ProtobufHandler;

impl ProtobufHandler {
    pub fn new() -> Self {
        Self
    }
}

fn parse_error(message: String) -> RegistryError {
    RegistryError::Parse {
        format: SchemaFormat::Protobuf,
        message,
    }
}

fn parse_source(source: &str) -> Result<ProtoFile, RegistryError> {
    parser::parse(source).map_err(|e| parse_error(e.to_string()))
}

fn load(schema: &str, references: &ReferenceMap) -> Result<Loaded, RegistryError> {
    let main = parse_source(schema)?;
    let mut index = TypeIndex::new();
    index.add_file(&main);

    let mut imports = Vec::new();
    let mut queue: VecDeque<String> = main.imports.iter().cloned().collect();
    let mut seen = HashSet::new();
    while let Some(path) = queue.pop_front() {
        if !seen.insert(path.clone()) {
            continue;
        }
        let source = references
            .get(&path)
            .map(String::as_str)
            .or_else(|| wellknown::get(&path))
            .ok_or_else(|| {
                parse_error(format!("import '{path}' is not among the references"))
            })?;
        let file = parse_source(source)?;
        index.add_file(&file);
        queue.extend(file.imports.iter().cloned());
        imports.push(file);
    }

    Ok(Loaded {
        unit: Unit { file: main, index },
        imports,
    })
}

/// Verify that every field type reference in the file resolves.
fn verify_resolvable(unit: &Unit) -> Result<(), RegistryError> {
    let mut scope: Vec<String> = unit
        .file
        .package
        .as_deref()
        .map(|p| p.split('.').map(String::from).collect())
        .unwrap_or_default();
    for message in &unit.file.messages {
        verify_message(message, &mut scope, unit)?;
    }
    Ok(())
}

fn verify_message(
    message: &MessageDef,
    scope: &mut Vec<String>,
    unit: &Unit,
) -> Result<(), RegistryError> {
    scope.push(message.name.clone());
    for field in &message.fields {
        verify_type(&field.ty, scope, unit, &message.name, &field.name)?;
    }
    for nested in &message.messages {
        verify_message(nested, scope, unit)?;
    }
    scope.pop();
    Ok(())
}

fn verify_type(
    ty: &FieldType,
    scope: &[String],
    unit: &Unit,
    message: &str,
    field: &str,
) -> Result<(), RegistryError> {
    match ty {
        FieldType::Named(name) => {
            if unit.index.resolve(name, scope).is_none() {
                return Err(parse_error(format!(
                    "field '{message}.{field}': unresolved type '{name}'"
                )));
            }
            Ok(())
        }
        FieldType::Map(key, value) => {
            verify_type(key, scope, unit, message, field)?;
            verify_type(value, scope, unit, message, field)
        }
        _ => Ok(()),
    }
}

impl SchemaHandler for ProtobufHandler {
    fn format(&self) -> SchemaFormat {
        SchemaFormat::Protobuf
    }

    fn validate(&self, schema: &str, references: &ReferenceMap) -> Result<(), RegistryError> {
        let loaded = load(schema, references)?;
        verify_resolvable(&loaded.unit)
    }

    /// Digest of the normalized source, with each resolved import's
    /// normalized content appended in declaration order.
    fn fingerprint(&self, schema: &str, references: &ReferenceMap) -> Result<String, RegistryError> {
        let loaded = load(schema, references)?;
        let mut canonical = loaded.unit.file.canonical();
        for import in &loaded.imports {
            canonical.push('\n');
            canonical.push_str(&import.canonical());
        }
        Ok(sha256_hex(canonical.as_bytes()))
    }

    fn normalize(&self, schema: &str, references: &ReferenceMap) -> Result<String, RegistryError> {
        let loaded = load(schema, references)?;
        Ok(loaded.unit.file.canonical())
    }

    fn check(
        &self,
        reader: &str,
        reader_refs: &ReferenceMap,
        writer: &str,
        writer_refs: &ReferenceMap,
    ) -> CompatReport {
        let reader = match load(reader, reader_refs) {
            Ok(loaded) => loaded.unit,
            Err(e) => return CompatReport::incompatible(format!("failed to parse new schema: {e}")),
        };
        let writer = match load(writer, writer_refs) {
            Ok(loaded) => loaded.unit,
            Err(e) => return CompatReport::incompatible(format!("failed to parse old schema: {e}")),
        };
        compat::check(&reader, &writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> ProtobufHandler {
        ProtobufHandler::new()
    }

    fn refs() -> ReferenceMap {
        ReferenceMap::new()
    }

    fn check(new: &str, old: &str) -> CompatReport {
        handler().check(new, &refs(), old, &refs())
    }

    #[test]
    fn fingerprint_ignores_comments_and_whitespace() {
        let a = handler()
            .fingerprint(
                "syntax = \"proto3\";\nmessage M {\n  int32 value = 1;\n}",
                &refs(),
            )
            .unwrap();
        let b = handler()
            .fingerprint(
                "// a counter\nsyntax = \"proto3\";   message M { int32 value = 1; /* tag one */ }",
                &refs(),
            )
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_sees_import_content() {
        let schema = r#"
            syntax = "proto3";
            import "common.proto";
            message Event { Common common = 1; }
        "#;
        let mut refs_v1 = ReferenceMap::new();
        refs_v1.insert(
            "common.proto".into(),
            "syntax = \"proto3\"; message Common { string id = 1; }".into(),
        );
        let mut refs_v2 = ReferenceMap::new();
        refs_v2.insert(
            "common.proto".into(),
            "syntax = \"proto3\"; message Common { string id = 1; int32 n = 2; }".into(),
        );
        let a = handler().fingerprint(schema, &refs_v1).unwrap();
        let b = handler().fingerprint(schema, &refs_v2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn well_known_imports_need_no_references() {
        let schema = r#"
            syntax = "proto3";
            import "google/protobuf/timestamp.proto";
            message Event { google.protobuf.Timestamp at = 1; }
        "#;
        assert!(handler().validate(schema, &refs()).is_ok());
    }

    #[test]
    fn missing_import_is_a_parse_error() {
        let schema = r#"
            syntax = "proto3";
            import "acme/common.proto";
            message Event { string id = 1; }
        "#;
        let err = handler().validate(schema, &refs()).unwrap_err();
        assert!(err.to_string().contains("acme/common.proto"));
    }

    #[test]
    fn unresolved_field_type_is_a_parse_error() {
        let schema = r#"syntax = "proto3"; message M { Missing x = 1; }"#;
        let err = handler().validate(schema, &refs()).unwrap_err();
        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn int32_to_sint32_is_wire_compatible() {
        let v1 = r#"syntax = "proto3"; message M { int32 value = 1; }"#;
        let v2 = r#"syntax = "proto3"; message M { sint32 value = 1; }"#;
        let report = check(v2, v1);
        assert!(report.is_compatible(), "messages: {:?}", report.messages);
    }

    #[test]
    fn int32_to_string_is_incompatible() {
        let v1 = r#"syntax = "proto3"; message M { int32 value = 1; }"#;
        let v2 = r#"syntax = "proto3"; message M { string value = 1; }"#;
        let report = check(v2, v1);
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("value"));
    }

    #[test]
    fn string_bytes_share_a_wire_kind() {
        let v1 = r#"syntax = "proto3"; message M { string value = 1; }"#;
        let v2 = r#"syntax = "proto3"; message M { bytes value = 1; }"#;
        assert!(check(v2, v1).is_compatible());
    }

    #[test]
    fn fixed_widths_do_not_mix() {
        let v1 = r#"syntax = "proto3"; message M { fixed32 value = 1; }"#;
        let v2 = r#"syntax = "proto3"; message M { fixed64 value = 1; }"#;
        assert!(!check(v2, v1).is_compatible());
        let v3 = r#"syntax = "proto3"; message M { sfixed32 value = 1; }"#;
        assert!(check(v3, v1).is_compatible());
    }

    #[test]
    fn plain_field_removal_is_compatible() {
        let v1 = r#"syntax = "proto3"; message M { int32 a = 1; string b = 2; }"#;
        let v2 = r#"syntax = "proto3"; message M { int32 a = 1; }"#;
        assert!(check(v2, v1).is_compatible());
    }

    #[test]
    fn oneof_field_removal_is_incompatible() {
        let v1 = r#"
            syntax = "proto3";
            message M {
                int32 id = 1;
                oneof payload {
                    string text = 2;
                    int32 number = 3;
                }
            }
        "#;
        let v2 = r#"
            syntax = "proto3";
            message M {
                int32 id = 1;
                oneof payload {
                    string text = 2;
                }
            }
        "#;
        let report = check(v2, v1);
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("oneof"));
    }

    #[test]
    fn new_required_field_is_incompatible() {
        let v1 = r#"syntax = "proto2"; message M { optional int32 a = 1; }"#;
        let v2 = r#"syntax = "proto2"; message M { optional int32 a = 1; required string b = 2; }"#;
        let report = check(v2, v1);
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("required"));
    }

    #[test]
    fn required_may_relax_but_not_tighten() {
        let required = r#"syntax = "proto2"; message M { required int32 a = 1; }"#;
        let optional = r#"syntax = "proto2"; message M { optional int32 a = 1; }"#;
        assert!(check(optional, required).is_compatible());
        assert!(!check(required, optional).is_compatible());
    }

    #[test]
    fn repeated_to_singular_only_for_length_delimited() {
        let rep_str = r#"syntax = "proto3"; message M { repeated string v = 1; }"#;
        let one_str = r#"syntax = "proto3"; message M { string v = 1; }"#;
        assert!(check(one_str, rep_str).is_compatible());
        // The reverse (singular → repeated) is always fine.
        assert!(check(rep_str, one_str).is_compatible());

        let rep_int = r#"syntax = "proto3"; message M { repeated int32 v = 1; }"#;
        let one_int = r#"syntax = "proto3"; message M { int32 v = 1; }"#;
        assert!(!check(one_int, rep_int).is_compatible());
        assert!(check(rep_int, one_int).is_compatible());
    }

    #[test]
    fn message_removal_is_incompatible_addition_is_not() {
        let v1 = r#"syntax = "proto3"; message A { int32 x = 1; } message B { int32 y = 1; }"#;
        let v2 = r#"syntax = "proto3"; message A { int32 x = 1; }"#;
        let report = check(v2, v1);
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("'B'"));
        assert!(check(v1, v2).is_compatible());
    }

    #[test]
    fn package_change_is_reported_but_not_breaking() {
        let v1 = r#"syntax = "proto3"; package a; message M { int32 x = 1; }"#;
        let v2 = r#"syntax = "proto3"; package b; message M { int32 x = 1; }"#;
        let report = check(v2, v1);
        assert!(report.is_compatible(), "messages: {:?}", report.messages);
        assert!(report.notices.iter().any(|n| n.contains("package")));
    }

    #[test]
    fn package_rename_does_not_break_internal_type_references() {
        let v1 = r#"
            syntax = "proto3"; package a;
            message Inner { int32 x = 1; }
            message Outer { Inner inner = 1; }
        "#;
        let v2 = r#"
            syntax = "proto3"; package b;
            message Inner { int32 x = 1; }
            message Outer { Inner inner = 1; }
        "#;
        assert!(check(v2, v1).is_compatible());
    }

    #[test]
    fn syntax_change_is_not_flagged() {
        let v1 = r#"syntax = "proto2"; message M { optional int32 a = 1; }"#;
        let v2 = r#"syntax = "proto3"; message M { int32 a = 1; }"#;
        assert!(check(v2, v1).is_compatible());
    }

    #[test]
    fn services_are_ignored_entirely() {
        let v1 = r#"
            syntax = "proto3";
            message Ping { string m = 1; }
            service Echo { rpc Send (Ping) returns (Ping); }
        "#;
        let v2 = r#"syntax = "proto3"; message Ping { string m = 1; }"#;
        let report = check(v2, v1);
        assert!(report.is_compatible());
        assert!(report.notices.is_empty());
    }

    #[test]
    fn enum_is_interchangeable_with_varint() {
        let with_enum = r#"
            syntax = "proto3";
            message M { Status s = 1; }
            enum Status { UNKNOWN = 0; OK = 1; }
        "#;
        let with_int = r#"syntax = "proto3"; message M { int32 s = 1; }"#;
        assert!(check(with_int, with_enum).is_compatible());
        assert!(check(with_enum, with_int).is_compatible());
    }

    #[test]
    fn enum_value_removal_is_compatible() {
        let v1 = r#"syntax = "proto3"; enum Status { UNKNOWN = 0; OK = 1; GONE = 2; }"#;
        let v2 = r#"syntax = "proto3"; enum Status { UNKNOWN = 0; OK = 1; }"#;
        let report = check(v2, v1);
        assert!(report.is_compatible());
        assert!(report.notices.iter().any(|n| n.contains("GONE")));
    }

    #[test]
    fn nested_messages_recurse() {
        let v1 = r#"
            syntax = "proto3";
            message Outer { message Inner { int32 x = 1; } Inner inner = 1; }
        "#;
        let v2 = r#"
            syntax = "proto3";
            message Outer { message Inner { string x = 1; } Inner inner = 1; }
        "#;
        let report = check(v2, v1);
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("Outer.Inner"));
    }

    #[test]
    fn parse_failure_reports_instead_of_erroring() {
        let ok = r#"syntax = "proto3"; message M { int32 a = 1; }"#;
        let report = check("message {", ok);
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("failed to parse new schema"));

        let report = check(ok, "message {");
        assert!(report.messages[0].contains("failed to parse old schema"));
    }
}
