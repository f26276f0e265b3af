//! Structural subtyping for JSON Schema (draft-07 level).
//!
//! `check(reader, writer)` asks: is every instance valid under the writer
//! (old) schema also valid under the reader (new) schema? Constraints the
//! reader adds narrow the accepted set and are incompatible; constraints it
//! drops widen it and are fine.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use schemahub_core::CompatReport;

/// Recursion bound for `$ref` chains and deeply nested schemas. Schemas
/// deeper than this are assumed compatible.
const MAX_DEPTH: usize = 64;

/// Keywords that constrain instances; a schema without any of them accepts
/// everything.
const CONSTRAINING: &[&str] = &[
    "type",
    "enum",
    "const",
    "required",
    "additionalProperties",
    "items",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
    "pattern",
    "allOf",
    "anyOf",
    "oneOf",
    "not",
];

const LOWER_BOUNDS: &[&str] = &[
    "minimum",
    "exclusiveMinimum",
    "minLength",
    "minItems",
    "minProperties",
];
const UPPER_BOUNDS: &[&str] = &[
    "maximum",
    "exclusiveMaximum",
    "maxLength",
    "maxItems",
    "maxProperties",
];

pub(crate) fn check(
    reader: &Value,
    reader_docs: &HashMap<String, Value>,
    writer: &Value,
    writer_docs: &HashMap<String, Value>,
) -> CompatReport {
    let checker = Checker {
        reader_root: reader,
        writer_root: writer,
        reader_docs,
        writer_docs,
    };
    let mut report = CompatReport::compatible();
    checker.accepts(reader, writer, "#", MAX_DEPTH, &mut report);
    report
}

struct Checker<'a> {
    reader_root: &'a Value,
    writer_root: &'a Value,
    reader_docs: &'a HashMap<String, Value>,
    writer_docs: &'a HashMap<String, Value>,
}

/// Evaluate a `#/...` JSON pointer against a document.
fn pointer<'v>(root: &'v Value, fragment: &str) -> Option<&'v Value> {
    let path = fragment.strip_prefix('#')?;
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for token in path.trim_start_matches('/').split('/') {
        let token = token.replace("~1", "/").replace("~0", "~");
        current = current.as_object()?.get(&token)?;
    }
    Some(current)
}

impl<'a> Checker<'a> {
    fn deref_reader(&self, schema: &'a Value) -> Option<&'a Value> {
        self.deref(schema, self.reader_root, self.reader_docs)
    }

    fn deref_writer(&self, schema: &'a Value) -> Option<&'a Value> {
        self.deref(schema, self.writer_root, self.writer_docs)
    }

    /// Chase a `$ref` one step: fragment pointers resolve against the own
    /// document, anything else against the registered references.
    fn deref(
        &self,
        schema: &'a Value,
        root: &'a Value,
        docs: &'a HashMap<String, Value>,
    ) -> Option<&'a Value> {
        let Some(reference) = schema.get("$ref").and_then(Value::as_str) else {
            return Some(schema);
        };
        if reference.starts_with('#') {
            pointer(root, reference)
        } else {
            docs.get(reference)
        }
    }

    fn accepts(
        &self,
        reader: &'a Value,
        writer: &'a Value,
        path: &str,
        depth: usize,
        report: &mut CompatReport,
    ) {
        if depth == 0 {
            return;
        }
        let Some(reader) = self.deref_reader(reader) else {
            report.push(format!("at '{path}': unresolved $ref in new schema"));
            return;
        };
        let Some(writer) = self.deref_writer(writer) else {
            report.push(format!("at '{path}': unresolved $ref in old schema"));
            return;
        };

        // Boolean schemas: `false` accepts nothing, `true` everything.
        match (writer, reader) {
            (Value::Bool(false), _) => return,
            (_, Value::Bool(true)) => return,
            (_, Value::Bool(false)) => {
                report.push(format!("at '{path}': schema narrowed to accept nothing"));
                return;
            }
            (Value::Bool(true), Value::Object(reader_map)) => {
                if CONSTRAINING.iter().any(|k| reader_map.contains_key(*k)) {
                    report.push(format!(
                        "at '{path}': constraints added to a previously unconstrained schema"
                    ));
                }
                return;
            }
            _ => {}
        }
        let (Some(writer_map), Some(reader_map)) = (writer.as_object(), reader.as_object()) else {
            return;
        };

        // Writer combinators: every alternative the writer accepted must
        // still be accepted.
        for keyword in ["anyOf", "oneOf"] {
            if let Some(Value::Array(branches)) = writer_map.get(keyword) {
                for (i, branch) in branches.iter().enumerate() {
                    self.accepts(reader, branch, &format!("{path}/{keyword}/{i}"), depth - 1, report);
                }
                return;
            }
        }
        if let Some(Value::Array(branches)) = writer_map.get("allOf") {
            // Instances satisfy every branch, so one accepting branch is
            // enough.
            let ok = branches
                .iter()
                .any(|branch| self.probe(reader, branch, depth - 1));
            if !ok {
                report.push(format!(
                    "at '{path}': no allOf branch of the old schema remains accepted"
                ));
            }
            return;
        }

        // Reader combinators: the writer's instances must fit some branch.
        for keyword in ["anyOf", "oneOf"] {
            if let Some(Value::Array(branches)) = reader_map.get(keyword) {
                let ok = branches
                    .iter()
                    .any(|branch| self.probe(branch, writer, depth - 1));
                if !ok {
                    report.push(format!(
                        "at '{path}': old schema matches no {keyword} branch of the new schema"
                    ));
                }
                return;
            }
        }
        if let Some(Value::Array(branches)) = reader_map.get("allOf") {
            for (i, branch) in branches.iter().enumerate() {
                self.accepts(branch, writer, &format!("{path}/allOf/{i}"), depth - 1, report);
            }
            return;
        }

        self.check_types(reader_map, writer_map, path, report);
        self.check_enum(reader_map, writer_map, path, report);
        self.check_bounds(reader_map, writer_map, path, report);
        self.check_pattern(reader_map, writer_map, path, report);
        self.check_object(reader_map, writer_map, path, depth, report);
        self.check_items(reader_map, writer_map, path, depth, report);
    }

    fn probe(&self, reader: &'a Value, writer: &'a Value, depth: usize) -> bool {
        let mut scratch = CompatReport::compatible();
        self.accepts(reader, writer, "#", depth, &mut scratch);
        scratch.is_compatible()
    }

    fn check_types(
        &self,
        reader: &serde_json::Map<String, Value>,
        writer: &serde_json::Map<String, Value>,
        path: &str,
        report: &mut CompatReport,
    ) {
        let Some(reader_types) = type_set(reader) else {
            return; // Reader accepts any type.
        };
        let writer_types = match type_set(writer) {
            Some(types) => types,
            None => {
                report.push(format!(
                    "at '{path}': type restricted to [{}] where the old schema accepted any type",
                    join(&reader_types)
                ));
                return;
            }
        };
        let narrowed: Vec<&str> = writer_types
            .iter()
            .filter(|t| {
                !(reader_types.contains(*t)
                    // Every integer is a number.
                    || (*t == "integer" && reader_types.contains("number")))
            })
            .map(|s| s.as_str())
            .collect();
        if !narrowed.is_empty() {
            report.push(format!(
                "at '{path}': type narrowed from [{}] to [{}]",
                join(&writer_types),
                join(&reader_types)
            ));
        }
    }

    fn check_enum(
        &self,
        reader: &serde_json::Map<String, Value>,
        writer: &serde_json::Map<String, Value>,
        path: &str,
        report: &mut CompatReport,
    ) {
        let Some(reader_values) = enum_values(reader) else {
            return;
        };
        match enum_values(writer) {
            None => report.push(format!(
                "at '{path}': enum constraint added where the old schema had none"
            )),
            Some(writer_values) => {
                let missing: Vec<String> = writer_values
                    .iter()
                    .filter(|v| !reader_values.contains(*v))
                    .map(|v| v.to_string())
                    .collect();
                if !missing.is_empty() {
                    report.push(format!(
                        "at '{path}': enum narrowed, removed values [{}]",
                        missing.join(", ")
                    ));
                }
            }
        }
    }

    fn check_bounds(
        &self,
        reader: &serde_json::Map<String, Value>,
        writer: &serde_json::Map<String, Value>,
        path: &str,
        report: &mut CompatReport,
    ) {
        for keyword in LOWER_BOUNDS {
            if let Some(r) = number(reader, keyword) {
                match number(writer, keyword) {
                    Some(w) if w >= r => {}
                    _ => report.push(format!("at '{path}': '{keyword}' tightened")),
                }
            }
        }
        for keyword in UPPER_BOUNDS {
            if let Some(r) = number(reader, keyword) {
                match number(writer, keyword) {
                    Some(w) if w <= r => {}
                    _ => report.push(format!("at '{path}': '{keyword}' tightened")),
                }
            }
        }
    }

    fn check_pattern(
        &self,
        reader: &serde_json::Map<String, Value>,
        writer: &serde_json::Map<String, Value>,
        path: &str,
        report: &mut CompatReport,
    ) {
        let reader_pattern = reader.get("pattern").and_then(Value::as_str);
        let writer_pattern = writer.get("pattern").and_then(Value::as_str);
        match (writer_pattern, reader_pattern) {
            (_, None) => {}
            (None, Some(_)) => {
                report.push(format!("at '{path}': 'pattern' constraint added"))
            }
            (Some(w), Some(r)) if w != r => {
                report.push(format!("at '{path}': 'pattern' changed from '{w}' to '{r}'"))
            }
            _ => {}
        }
    }

    fn check_object(
        &self,
        reader: &serde_json::Map<String, Value>,
        writer: &serde_json::Map<String, Value>,
        path: &str,
        depth: usize,
        report: &mut CompatReport,
    ) {
        let empty = serde_json::Map::new();
        let reader_props = reader
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let writer_props = writer
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        // Tightened `required`.
        for name in required_set(reader) {
            if !required_set(writer).contains(&name) {
                report.push(format!("at '{path}': property '{name}' is newly required"));
            }
        }

        // Common properties recurse; reader-only properties are the
        // added-optional case and pass.
        for (name, writer_prop) in writer_props {
            let prop_path = format!("{path}/properties/{name}");
            match reader_props.get(name) {
                Some(reader_prop) => {
                    self.accepts(reader_prop, writer_prop, &prop_path, depth - 1, report)
                }
                None => {
                    // Property dropped from the reader: instances still
                    // carry it, so the reader's additional-properties
                    // policy decides.
                    match reader.get("additionalProperties") {
                        Some(Value::Bool(false)) => report.push(format!(
                            "at '{prop_path}': property removed while additionalProperties is false"
                        )),
                        Some(additional @ Value::Object(_)) => {
                            self.accepts(additional, writer_prop, &prop_path, depth - 1, report)
                        }
                        _ => {}
                    }
                }
            }
        }

        // additionalProperties tightening.
        let writer_additional = writer.get("additionalProperties");
        let reader_additional = reader.get("additionalProperties");
        match (writer_additional, reader_additional) {
            (_, None) => {}
            (Some(Value::Bool(false)), _) => {}
            (None | Some(Value::Bool(true)), Some(Value::Bool(false))) => report.push(format!(
                "at '{path}': additionalProperties tightened from open to false"
            )),
            (None | Some(Value::Bool(true)), Some(Value::Object(_))) => report.push(format!(
                "at '{path}': additionalProperties constrained where the old schema was open"
            )),
            (Some(w), Some(r)) => {
                self.accepts(r, w, &format!("{path}/additionalProperties"), depth - 1, report)
            }
            _ => {}
        }
    }

    fn check_items(
        &self,
        reader: &serde_json::Map<String, Value>,
        writer: &serde_json::Map<String, Value>,
        path: &str,
        depth: usize,
        report: &mut CompatReport,
    ) {
        let items_path = format!("{path}/items");
        match (writer.get("items"), reader.get("items")) {
            (None, None) | (Some(_), None) => {}
            (None, Some(_)) => {
                report.push(format!("at '{items_path}': items constraint added"))
            }
            (Some(Value::Array(writer_tuple)), Some(Value::Array(reader_tuple))) => {
                for (i, (w, r)) in writer_tuple.iter().zip(reader_tuple).enumerate() {
                    self.accepts(r, w, &format!("{items_path}/{i}"), depth - 1, report);
                }
            }
            (Some(w), Some(r)) => self.accepts(r, w, &items_path, depth - 1, report),
        }
    }
}

fn type_set(map: &serde_json::Map<String, Value>) -> Option<BTreeSet<String>> {
    match map.get("type")? {
        Value::String(s) => Some(BTreeSet::from([s.clone()])),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
        ),
        _ => None,
    }
}

/// `const` reads as a single-value enum.
fn enum_values(map: &serde_json::Map<String, Value>) -> Option<Vec<Value>> {
    if let Some(Value::Array(values)) = map.get("enum") {
        return Some(values.clone());
    }
    map.get("const").map(|v| vec![v.clone()])
}

fn required_set(map: &serde_json::Map<String, Value>) -> BTreeSet<String> {
    match map.get("required") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn number(map: &serde_json::Map<String, Value>, keyword: &str) -> Option<f64> {
    map.get(keyword).and_then(Value::as_f64)
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(reader: &str, writer: &str) -> CompatReport {
        let reader: Value = serde_json::from_str(reader).unwrap();
        let writer: Value = serde_json::from_str(writer).unwrap();
        check(&reader, &HashMap::new(), &writer, &HashMap::new())
    }

    #[test]
    fn boolean_schema_rules() {
        assert!(run("true", r#"{"type": "string"}"#).is_compatible());
        assert!(run(r#"{"type": "string"}"#, "false").is_compatible());
        assert!(!run("false", r#"{"type": "string"}"#).is_compatible());
        assert!(!run(r#"{"type": "string"}"#, "true").is_compatible());
    }

    #[test]
    fn internal_refs_resolve() {
        let with_ref = r##"{
            "definitions": {"name": {"type": "string"}},
            "type": "object",
            "properties": {"name": {"$ref": "#/definitions/name"}}
        }"##;
        let inline = r#"{
            "type": "object",
            "properties": {"name": {"type": "string"}}
        }"#;
        assert!(run(with_ref, inline).is_compatible());
        assert!(run(inline, with_ref).is_compatible());
    }

    #[test]
    fn external_refs_resolve_via_reference_docs() {
        let mut docs = HashMap::new();
        docs.insert(
            "address.json".to_string(),
            serde_json::from_str::<Value>(r#"{"type": "object"}"#).unwrap(),
        );
        let reader: Value =
            serde_json::from_str(r#"{"properties": {"addr": {"$ref": "address.json"}}}"#).unwrap();
        let writer: Value =
            serde_json::from_str(r#"{"properties": {"addr": {"type": "object"}}}"#).unwrap();
        let report = check(&reader, &docs, &writer, &HashMap::new());
        assert!(report.is_compatible(), "messages: {:?}", report.messages);
    }

    #[test]
    fn unresolved_ref_is_reported() {
        let reader: Value =
            serde_json::from_str(r#"{"$ref": "missing.json"}"#).unwrap();
        let writer: Value = serde_json::from_str(r#"{"type": "string"}"#).unwrap();
        let report = check(&reader, &HashMap::new(), &writer, &HashMap::new());
        assert!(!report.is_compatible());
        assert!(report.messages[0].contains("unresolved $ref"));
    }

    #[test]
    fn writer_anyof_branches_must_all_fit() {
        let writer = r#"{"anyOf": [{"type": "string"}, {"type": "integer"}]}"#;
        let wide = r#"{"type": ["string", "integer"]}"#;
        let narrow = r#"{"type": "string"}"#;
        assert!(run(wide, writer).is_compatible());
        assert!(!run(narrow, writer).is_compatible());
    }

    #[test]
    fn reader_anyof_accepts_matching_branch() {
        let reader = r#"{"anyOf": [{"type": "string"}, {"type": "integer"}]}"#;
        assert!(run(reader, r#"{"type": "string"}"#).is_compatible());
        assert!(!run(reader, r#"{"type": "boolean"}"#).is_compatible());
    }

    #[test]
    fn recursive_schema_terminates() {
        let node = r##"{
            "type": "object",
            "properties": {
                "value": {"type": "integer"},
                "next": {"$ref": "#"}
            }
        }"##;
        assert!(run(node, node).is_compatible());
    }

    #[test]
    fn tuple_items_compare_elementwise() {
        let writer = r#"{"items": [{"type": "string"}, {"type": "integer"}]}"#;
        let ok = r#"{"items": [{"type": "string"}, {"type": "number"}]}"#;
        let bad = r#"{"items": [{"type": "integer"}, {"type": "integer"}]}"#;
        assert!(run(ok, writer).is_compatible());
        assert!(!run(bad, writer).is_compatible());
    }
}
