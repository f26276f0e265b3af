//! Reader/writer resolution rules.
//!
//! The reader is the proposed (new) schema, the writer the existing one.
//! Rules follow Avro schema resolution: promotions widen, unions must keep
//! every writer branch readable, reader-only fields need defaults, and
//! named types must keep their names.

use std::collections::{HashMap, HashSet};

use apache_avro::schema::{Name, RecordField, Schema};
use schemahub_core::CompatReport;

type NameMap<'a> = HashMap<String, &'a Schema>;

/// Effective fullname of a named type.
fn fullname(name: &Name) -> String {
    match name.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{ns}.{}", name.name),
        _ => name.name.clone(),
    }
}

/// Index every named type reachable from `schema` by fullname, so that
/// `Schema::Ref` nodes can be chased during the walk.
fn collect_names<'a>(schema: &'a Schema, out: &mut NameMap<'a>) {
    match schema {
        Schema::Record { name, fields, .. } => {
            out.insert(fullname(name), schema);
            for field in fields {
                collect_names(&field.schema, out);
            }
        }
        Schema::Enum { name, .. } | Schema::Fixed { name, .. } => {
            out.insert(fullname(name), schema);
        }
        Schema::Array(inner) | Schema::Map(inner) => collect_names(inner, out),
        Schema::Union(union) => {
            for variant in union.variants() {
                collect_names(variant, out);
            }
        }
        Schema::Decimal { inner, .. } => collect_names(inner, out),
        _ => {}
    }
}

/// Wire-level primitive classes, with logical types mapped to their
/// underlying primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    Str,
}

fn primitive_kind(schema: &Schema) -> Option<Primitive> {
    Some(match schema {
        Schema::Null => Primitive::Null,
        Schema::Boolean => Primitive::Boolean,
        Schema::Int | Schema::Date | Schema::TimeMillis => Primitive::Int,
        Schema::Long
        | Schema::TimeMicros
        | Schema::TimestampMillis
        | Schema::TimestampMicros => Primitive::Long,
        Schema::Float => Primitive::Float,
        Schema::Double => Primitive::Double,
        Schema::Bytes => Primitive::Bytes,
        Schema::String | Schema::Uuid => Primitive::Str,
        _ => return None,
    })
}

/// Promotions permitted by Avro resolution: the reader type may widen the
/// writer type.
fn promotes(writer: Primitive, reader: Primitive) -> bool {
    use Primitive::*;
    matches!(
        (writer, reader),
        (Int, Long | Float | Double)
            | (Long, Float | Double)
            | (Float, Double)
            | (Str, Bytes)
            | (Bytes, Str)
    )
}

fn describe(schema: &Schema) -> String {
    match schema {
        Schema::Null => "null".into(),
        Schema::Boolean => "boolean".into(),
        Schema::Int => "int".into(),
        Schema::Long => "long".into(),
        Schema::Float => "float".into(),
        Schema::Double => "double".into(),
        Schema::Bytes => "bytes".into(),
        Schema::String => "string".into(),
        Schema::Uuid => "uuid".into(),
        Schema::Date => "date".into(),
        Schema::TimeMillis => "time-millis".into(),
        Schema::TimeMicros => "time-micros".into(),
        Schema::TimestampMillis => "timestamp-millis".into(),
        Schema::TimestampMicros => "timestamp-micros".into(),
        Schema::Duration => "duration".into(),
        Schema::Decimal { .. } => "decimal".into(),
        Schema::Array(_) => "array".into(),
        Schema::Map(_) => "map".into(),
        Schema::Union(_) => "union".into(),
        Schema::Record { name, .. } => format!("record '{}'", fullname(name)),
        Schema::Enum { name, .. } => format!("enum '{}'", fullname(name)),
        Schema::Fixed { name, .. } => format!("fixed '{}'", fullname(name)),
        Schema::Ref { name } => format!("'{}'", fullname(name)),
        #[allow(unreachable_patterns)]
        _ => "schema".into(),
    }
}

pub(crate) struct Checker<'a> {
    reader: &'a Schema,
    writer: &'a Schema,
    reader_names: NameMap<'a>,
    writer_names: NameMap<'a>,
    /// Record fullnames already under comparison — cycle guard for
    /// recursive schemas.
    visited: HashSet<String>,
}

impl<'a> Checker<'a> {
    pub fn new(reader: &'a Schema, writer: &'a Schema) -> Self {
        let mut reader_names = NameMap::new();
        let mut writer_names = NameMap::new();
        collect_names(reader, &mut reader_names);
        collect_names(writer, &mut writer_names);
        Self {
            reader,
            writer,
            reader_names,
            writer_names,
            visited: HashSet::new(),
        }
    }

    pub fn run(mut self) -> CompatReport {
        let mut report = CompatReport::compatible();
        self.can_read(self.reader, self.writer, &mut report);
        report
    }

    fn deref_reader(&self, schema: &'a Schema) -> &'a Schema {
        match schema {
            Schema::Ref { name } => self
                .reader_names
                .get(&fullname(name))
                .copied()
                .unwrap_or(schema),
            _ => schema,
        }
    }

    fn deref_writer(&self, schema: &'a Schema) -> &'a Schema {
        match schema {
            Schema::Ref { name } => self
                .writer_names
                .get(&fullname(name))
                .copied()
                .unwrap_or(schema),
            _ => schema,
        }
    }

    fn can_read(&mut self, reader: &'a Schema, writer: &'a Schema, report: &mut CompatReport) {
        let reader = self.deref_reader(reader);
        let writer = self.deref_writer(writer);

        if let Schema::Ref { name } = writer {
            report.push(format!("unresolved reference '{}'", fullname(name)));
            return;
        }
        if let Schema::Ref { name } = reader {
            report.push(format!("unresolved reference '{}'", fullname(name)));
            return;
        }

        // Every writer branch must be readable; this also covers the
        // union-to-union case.
        if let Schema::Union(writer_union) = writer {
            for branch in writer_union.variants() {
                self.can_read(reader, branch, report);
            }
            return;
        }
        // Writer is not a union: some reader branch must accept it.
        if let Schema::Union(reader_union) = reader {
            let accepted = reader_union
                .variants()
                .iter()
                .any(|branch| self.probe(branch, writer));
            if !accepted {
                report.push(format!(
                    "writer type {} is not a member of the reader union",
                    describe(writer)
                ));
            }
            return;
        }

        if let (Some(w), Some(r)) = (primitive_kind(writer), primitive_kind(reader)) {
            if w != r && !promotes(w, r) {
                report.push(format!(
                    "writer type {} cannot be read as {}",
                    describe(writer),
                    describe(reader)
                ));
            }
            return;
        }

        match (writer, reader) {
            (Schema::Array(w_items), Schema::Array(r_items)) => {
                self.can_read(r_items, w_items, report)
            }
            (Schema::Map(w_values), Schema::Map(r_values)) => {
                self.can_read(r_values, w_values, report)
            }
            (Schema::Decimal { inner: w_inner, .. }, Schema::Decimal { inner: r_inner, .. }) => {
                self.can_read(r_inner, w_inner, report)
            }
            (Schema::Duration, Schema::Duration) => {}
            (
                Schema::Fixed {
                    name: w_name,
                    size: w_size,
                    ..
                },
                Schema::Fixed {
                    name: r_name,
                    size: r_size,
                    ..
                },
            ) => {
                if fullname(w_name) != fullname(r_name) {
                    report.push(format!(
                        "fixed name changed from '{}' to '{}'",
                        fullname(w_name),
                        fullname(r_name)
                    ));
                } else if w_size != r_size {
                    report.push(format!(
                        "fixed '{}' size changed from {} to {}",
                        fullname(w_name),
                        w_size,
                        r_size
                    ));
                }
            }
            (
                Schema::Enum {
                    name: w_name,
                    symbols: w_symbols,
                    ..
                },
                Schema::Enum {
                    name: r_name,
                    symbols: r_symbols,
                    ..
                },
            ) => {
                if fullname(w_name) != fullname(r_name) {
                    report.push(format!(
                        "enum name changed from '{}' to '{}'",
                        fullname(w_name),
                        fullname(r_name)
                    ));
                    return;
                }
                let missing: Vec<&str> = w_symbols
                    .iter()
                    .filter(|s| !r_symbols.contains(s))
                    .map(|s| s.as_str())
                    .collect();
                if !missing.is_empty() {
                    report.push(format!(
                        "enum '{}' is missing writer symbols [{}]",
                        fullname(w_name),
                        missing.join(", ")
                    ));
                }
            }
            (Schema::Record { .. }, Schema::Record { .. }) => {
                self.check_record(reader, writer, report)
            }
            _ => report.push(format!(
                "writer type {} cannot be read as {}",
                describe(writer),
                describe(reader)
            )),
        }
    }

    fn check_record(&mut self, reader: &'a Schema, writer: &'a Schema, report: &mut CompatReport) {
        let (
            Schema::Record {
                name: w_name,
                fields: w_fields,
                ..
            },
            Schema::Record {
                name: r_name,
                fields: r_fields,
                ..
            },
        ) = (writer, reader)
        else {
            return;
        };

        let w_full = fullname(w_name);
        let r_full = fullname(r_name);
        if w_full != r_full {
            report.push(format!(
                "record name changed from '{w_full}' to '{r_full}'"
            ));
            return;
        }
        if !self.visited.insert(w_full.clone()) {
            return;
        }

        let writer_fields: HashMap<&str, &RecordField> =
            w_fields.iter().map(|f| (f.name.as_str(), f)).collect();

        for r_field in r_fields {
            match writer_fields.get(r_field.name.as_str()) {
                Some(w_field) => self.can_read(&r_field.schema, &w_field.schema, report),
                None if r_field.default.is_some() => {}
                None => report.push(format!(
                    "reader field '{}.{}' has no default value and is missing from the writer schema",
                    w_full, r_field.name
                )),
            }
        }
        // Writer-only fields are skipped by the reader and need no check.
    }

    /// Verdict-only probe used for union branch selection; discards
    /// messages and restores the cycle guard.
    fn probe(&mut self, reader: &'a Schema, writer: &'a Schema) -> bool {
        let saved = self.visited.clone();
        let mut scratch = CompatReport::compatible();
        self.can_read(reader, writer, &mut scratch);
        self.visited = saved;
        scratch.is_compatible()
    }
}
