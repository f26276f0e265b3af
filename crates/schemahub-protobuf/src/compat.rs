//! Wire-format compatibility rules.
//!
//! Decisions are over wire-type equivalence, not source syntax: fields are
//! matched by tag number, kinds are compared by their encoding, and
//! declarations with no wire effect (services, `syntax`, options) are
//! ignored. A package change is reported as a notice, never as a break.

use std::collections::HashMap;

use schemahub_core::CompatReport;

use crate::ast::{EnumDef, FieldDef, FieldType, Label, MessageDef, TypeKind};
use crate::Unit;

/// Encoding class of a field, with named types resolved.
#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Varint,
    Zigzag,
    Fixed32,
    Fixed64,
    LenDelim,
    Float,
    Double,
    Message(String),
    Enum(String),
    Map(Box<Kind>, Box<Kind>),
    Unresolved(String),
}

impl Kind {
    fn describe(&self) -> String {
        match self {
            Kind::Varint => "varint".into(),
            Kind::Zigzag => "zigzag varint".into(),
            Kind::Fixed32 => "32-bit fixed".into(),
            Kind::Fixed64 => "64-bit fixed".into(),
            Kind::LenDelim => "length-delimited".into(),
            Kind::Float => "float".into(),
            Kind::Double => "double".into(),
            Kind::Message(name) => format!("message '{name}'"),
            Kind::Enum(name) => format!("enum '{name}'"),
            Kind::Map(_, _) => "map".into(),
            Kind::Unresolved(name) => format!("unresolved '{name}'"),
        }
    }
}

/// A message flattened out of its nesting, keyed by package-relative path.
struct FlatMessage<'a> {
    def: &'a MessageDef,
    /// Resolution scope: package segments, then enclosing message names.
    scope: Vec<String>,
}

fn package_scope(unit: &Unit) -> Vec<String> {
    unit.file
        .package
        .as_deref()
        .map(|p| p.split('.').map(String::from).collect())
        .unwrap_or_default()
}

fn flatten<'a>(
    unit: &'a Unit,
) -> (
    HashMap<String, FlatMessage<'a>>,
    HashMap<String, &'a EnumDef>,
) {
    let mut messages = HashMap::new();
    let mut enums = HashMap::new();
    let scope = package_scope(unit);
    for e in &unit.file.enums {
        enums.insert(e.name.clone(), e);
    }
    for m in &unit.file.messages {
        flatten_message(m, "", &scope, &mut messages, &mut enums);
    }
    (messages, enums)
}

fn flatten_message<'a>(
    m: &'a MessageDef,
    prefix: &str,
    scope: &[String],
    messages: &mut HashMap<String, FlatMessage<'a>>,
    enums: &mut HashMap<String, &'a EnumDef>,
) {
    let rel = if prefix.is_empty() {
        m.name.clone()
    } else {
        format!("{prefix}.{}", m.name)
    };
    let mut inner_scope = scope.to_vec();
    inner_scope.push(m.name.clone());
    for e in &m.enums {
        enums.insert(format!("{rel}.{}", e.name), e);
    }
    for nested in &m.messages {
        flatten_message(nested, &rel, &inner_scope, messages, enums);
    }
    messages.insert(
        rel,
        FlatMessage {
            def: m,
            scope: inner_scope,
        },
    );
}

/// Strip the unit's own package prefix so that a pure package rename does
/// not read as a type change.
fn relative_name(fqn: &str, package: Option<&str>) -> String {
    if let Some(pkg) = package {
        if !pkg.is_empty() {
            if let Some(rest) = fqn.strip_prefix(pkg).and_then(|s| s.strip_prefix('.')) {
                return rest.to_string();
            }
        }
    }
    fqn.to_string()
}

fn classify(ty: &FieldType, scope: &[String], unit: &Unit) -> Kind {
    match ty {
        FieldType::Int32
        | FieldType::Int64
        | FieldType::Uint32
        | FieldType::Uint64
        | FieldType::Bool => Kind::Varint,
        FieldType::Sint32 | FieldType::Sint64 => Kind::Zigzag,
        FieldType::Fixed32 | FieldType::Sfixed32 => Kind::Fixed32,
        FieldType::Fixed64 | FieldType::Sfixed64 => Kind::Fixed64,
        FieldType::String | FieldType::Bytes => Kind::LenDelim,
        FieldType::Float => Kind::Float,
        FieldType::Double => Kind::Double,
        FieldType::Named(name) => match unit.index.resolve(name, scope) {
            Some((fqn, TypeKind::Message)) => {
                Kind::Message(relative_name(&fqn, unit.file.package.as_deref()))
            }
            Some((fqn, TypeKind::Enum)) => {
                Kind::Enum(relative_name(&fqn, unit.file.package.as_deref()))
            }
            None => Kind::Unresolved(name.clone()),
        },
        FieldType::Map(key, value) => Kind::Map(
            Box::new(classify(key, scope, unit)),
            Box::new(classify(value, scope, unit)),
        ),
    }
}

/// Allowed transitions between encoding classes. Enum fields are varints on
/// the wire, so enum ↔ any varint kind passes; same-kind message and enum
/// fields must keep their (package-relative) qualified name.
fn kinds_match(writer: &Kind, reader: &Kind) -> Result<(), String> {
    match (writer, reader) {
        (Kind::Varint, Kind::Varint)
        | (Kind::Zigzag, Kind::Zigzag)
        | (Kind::Fixed32, Kind::Fixed32)
        | (Kind::Fixed64, Kind::Fixed64)
        | (Kind::LenDelim, Kind::LenDelim)
        | (Kind::Float, Kind::Float)
        | (Kind::Double, Kind::Double) => Ok(()),
        // int32 ↔ sint32 both ride wire type 0.
        (Kind::Varint, Kind::Zigzag) | (Kind::Zigzag, Kind::Varint) => Ok(()),
        (Kind::Enum(_), Kind::Varint | Kind::Zigzag)
        | (Kind::Varint | Kind::Zigzag, Kind::Enum(_)) => Ok(()),
        (Kind::Enum(a), Kind::Enum(b)) => {
            if a == b {
                Ok(())
            } else {
                Err(format!("enum type changed from '{a}' to '{b}'"))
            }
        }
        (Kind::Message(a), Kind::Message(b)) => {
            if a == b {
                Ok(())
            } else {
                Err(format!("message type changed from '{a}' to '{b}'"))
            }
        }
        (Kind::Map(w_key, w_value), Kind::Map(r_key, r_value)) => {
            kinds_match(w_key, r_key)
                .and_then(|_| kinds_match(w_value, r_value))
                .map_err(|e| format!("map entry: {e}"))
        }
        (Kind::Unresolved(name), _) | (_, Kind::Unresolved(name)) => {
            Err(format!("unresolved type '{name}'"))
        }
        (w, r) => Err(format!(
            "wire kind changed from {} to {}",
            w.describe(),
            r.describe()
        )),
    }
}

/// Check whether `reader` (the proposed schema) can read data written under
/// `writer` (an existing version).
pub(crate) fn check(reader: &Unit, writer: &Unit) -> CompatReport {
    let mut report = CompatReport::compatible();

    if writer.file.package != reader.file.package {
        report.notice(format!(
            "package changed from '{}' to '{}'",
            writer.file.package.as_deref().unwrap_or(""),
            reader.file.package.as_deref().unwrap_or("")
        ));
    }
    // `syntax` changes produce identical wire bytes and are not flagged.

    let (writer_messages, writer_enums) = flatten(writer);
    let (reader_messages, reader_enums) = flatten(reader);

    let mut names: Vec<&String> = writer_messages.keys().collect();
    names.sort();
    for name in names {
        match reader_messages.get(name) {
            Some(reader_flat) => check_message(
                name,
                &writer_messages[name],
                reader_flat,
                writer,
                reader,
                &mut report,
            ),
            None => report.push(format!("message '{name}' was removed")),
        }
    }

    let mut enum_names: Vec<&String> = writer_enums.keys().collect();
    enum_names.sort();
    for name in enum_names {
        match reader_enums.get(name) {
            Some(reader_enum) => {
                // Removed values keep their numeric encoding on the wire;
                // report without breaking.
                let removed: Vec<&str> = writer_enums[name]
                    .values
                    .iter()
                    .filter(|(v, _)| !reader_enum.values.iter().any(|(r, _)| r == v))
                    .map(|(v, _)| v.as_str())
                    .collect();
                if !removed.is_empty() {
                    report.notice(format!(
                        "enum '{name}' removed values [{}]",
                        removed.join(", ")
                    ));
                }
            }
            // Enum definitions carry no wire structure of their own — a
            // removed enum reads as plain varints.
            None => report.notice(format!("enum '{name}' was removed")),
        }
    }

    report
}

fn check_message(
    path: &str,
    writer_flat: &FlatMessage<'_>,
    reader_flat: &FlatMessage<'_>,
    writer_unit: &Unit,
    reader_unit: &Unit,
    report: &mut CompatReport,
) {
    let writer_fields: HashMap<i32, &FieldDef> = writer_flat
        .def
        .fields
        .iter()
        .map(|f| (f.number, f))
        .collect();
    let reader_fields: HashMap<i32, &FieldDef> = reader_flat
        .def
        .fields
        .iter()
        .map(|f| (f.number, f))
        .collect();

    let mut numbers: Vec<i32> = writer_fields.keys().copied().collect();
    numbers.sort_unstable();
    for number in numbers {
        let w_field = writer_fields[&number];
        match reader_fields.get(&number) {
            Some(r_field) => check_field(path, w_field, r_field, writer_flat, reader_flat,
                writer_unit, reader_unit, report),
            None => {
                // Readers tolerate unknown fields — removal is fine unless
                // the field was a oneof member.
                if let Some(oneof) = w_field.oneof {
                    let oneof_name = writer_flat
                        .def
                        .oneofs
                        .get(oneof)
                        .map(String::as_str)
                        .unwrap_or("?");
                    report.push(format!(
                        "field '{path}.{}' (tag {number}) was removed from oneof '{oneof_name}'",
                        w_field.name
                    ));
                }
            }
        }
    }

    let mut added: Vec<i32> = reader_fields
        .keys()
        .filter(|n| !writer_fields.contains_key(*n))
        .copied()
        .collect();
    added.sort_unstable();
    for number in added {
        let r_field = reader_fields[&number];
        if r_field.label == Label::Required {
            report.push(format!(
                "new required field '{path}.{}' (tag {number})",
                r_field.name
            ));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn check_field(
    path: &str,
    w_field: &FieldDef,
    r_field: &FieldDef,
    writer_flat: &FlatMessage<'_>,
    reader_flat: &FlatMessage<'_>,
    writer_unit: &Unit,
    reader_unit: &Unit,
    report: &mut CompatReport,
) {
    let w_kind = classify(&w_field.ty, &writer_flat.scope, writer_unit);
    let r_kind = classify(&r_field.ty, &reader_flat.scope, reader_unit);

    if let Err(reason) = kinds_match(&w_kind, &r_kind) {
        report.push(format!(
            "field '{path}.{}' (tag {}): {reason}",
            w_field.name, w_field.number
        ));
        return;
    }

    // Cardinality transitions.
    let w_repeated = w_field.label == Label::Repeated;
    let r_repeated = r_field.label == Label::Repeated;
    if r_field.label == Label::Required && w_field.label != Label::Required {
        report.push(format!(
            "field '{path}.{}' (tag {}) became required",
            w_field.name, w_field.number
        ));
    } else if w_repeated && !r_repeated {
        // Singular length-delimited parsers accept the last repeated entry.
        let mergeable = matches!(w_kind, Kind::LenDelim | Kind::Message(_));
        if !mergeable {
            report.push(format!(
                "field '{path}.{}' (tag {}) changed from repeated to singular ({})",
                w_field.name,
                w_field.number,
                w_kind.describe()
            ));
        }
    }

    if w_field.name != r_field.name {
        report.notice(format!(
            "field tag {} renamed from '{path}.{}' to '{path}.{}'",
            w_field.number, w_field.name, r_field.name
        ));
    }
}
