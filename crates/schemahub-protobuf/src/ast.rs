//! Parsed representation of a `.proto` file, plus the canonical rendering
//! used for fingerprinting.
//!
//! The canonical form discards comments, whitespace, and options without
//! wire effect (`packed` is kept: it changes the encoding of repeated
//! scalars in proto2). Declaration order is preserved.

use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Proto2,
    Proto3,
}

impl Syntax {
    pub fn as_str(&self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// proto3 implicit presence (no label keyword).
    Singular,
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Sfixed32,
    Fixed64,
    Sfixed64,
    Bool,
    Float,
    Double,
    String,
    Bytes,
    /// Message or enum reference, as written (resolved via `TypeIndex`).
    Named(String),
    Map(Box<FieldType>, Box<FieldType>),
}

impl FieldType {
    pub fn render(&self) -> String {
        match self {
            FieldType::Int32 => "int32".into(),
            FieldType::Int64 => "int64".into(),
            FieldType::Uint32 => "uint32".into(),
            FieldType::Uint64 => "uint64".into(),
            FieldType::Sint32 => "sint32".into(),
            FieldType::Sint64 => "sint64".into(),
            FieldType::Fixed32 => "fixed32".into(),
            FieldType::Sfixed32 => "sfixed32".into(),
            FieldType::Fixed64 => "fixed64".into(),
            FieldType::Sfixed64 => "sfixed64".into(),
            FieldType::Bool => "bool".into(),
            FieldType::Float => "float".into(),
            FieldType::Double => "double".into(),
            FieldType::String => "string".into(),
            FieldType::Bytes => "bytes".into(),
            FieldType::Named(name) => name.clone(),
            FieldType::Map(key, value) => format!("map<{}, {}>", key.render(), value.render()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub number: i32,
    pub label: Label,
    pub ty: FieldType,
    /// Index into the enclosing message's `oneofs` when the field belongs
    /// to a oneof.
    pub oneof: Option<usize>,
    /// Explicit `[packed = ...]` option; wire-affecting in proto2.
    pub packed: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<(String, i32)>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub oneofs: Vec<String>,
    pub messages: Vec<MessageDef>,
    pub enums: Vec<EnumDef>,
}

#[derive(Debug, Clone)]
pub struct ProtoFile {
    pub syntax: Syntax,
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub messages: Vec<MessageDef>,
    pub enums: Vec<EnumDef>,
}

impl ProtoFile {
    /// Deterministic source rendering for fingerprinting.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "syntax = \"{}\";", self.syntax.as_str());
        if let Some(pkg) = &self.package {
            let _ = writeln!(out, "package {pkg};");
        }
        for import in &self.imports {
            let _ = writeln!(out, "import \"{import}\";");
        }
        for e in &self.enums {
            render_enum(e, 0, &mut out);
        }
        for m in &self.messages {
            render_message(m, 0, &mut out);
        }
        out
    }
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn render_enum(e: &EnumDef, depth: usize, out: &mut String) {
    indent(depth, out);
    let _ = writeln!(out, "enum {} {{", e.name);
    for (name, number) in &e.values {
        indent(depth + 1, out);
        let _ = writeln!(out, "{name} = {number};");
    }
    indent(depth, out);
    out.push_str("}\n");
}

fn render_field(f: &FieldDef, depth: usize, out: &mut String) {
    indent(depth, out);
    let label = match f.label {
        Label::Singular => "",
        Label::Optional => "optional ",
        Label::Required => "required ",
        Label::Repeated => "repeated ",
    };
    let packed = match f.packed {
        Some(true) => " [packed = true]",
        Some(false) => " [packed = false]",
        None => "",
    };
    let _ = writeln!(
        out,
        "{label}{} {} = {}{packed};",
        f.ty.render(),
        f.name,
        f.number
    );
}

fn render_message(m: &MessageDef, depth: usize, out: &mut String) {
    indent(depth, out);
    let _ = writeln!(out, "message {} {{", m.name);
    for e in &m.enums {
        render_enum(e, depth + 1, out);
    }
    for nested in &m.messages {
        render_message(nested, depth + 1, out);
    }
    // Oneof members render inside their oneof block, in declaration order.
    for (index, oneof) in m.oneofs.iter().enumerate() {
        indent(depth + 1, out);
        let _ = writeln!(out, "oneof {oneof} {{");
        for f in m.fields.iter().filter(|f| f.oneof == Some(index)) {
            render_field(f, depth + 2, out);
        }
        indent(depth + 1, out);
        out.push_str("}\n");
    }
    for f in m.fields.iter().filter(|f| f.oneof.is_none()) {
        render_field(f, depth + 1, out);
    }
    indent(depth, out);
    out.push_str("}\n");
}

// ─── Type index ───────────────────────────────────────────────────────────────

/// Kind of a named type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Message,
    Enum,
}

/// Fully-qualified name → kind, across a file and everything it imports.
#[derive(Debug, Clone, Default)]
pub struct TypeIndex {
    types: HashMap<String, TypeKind>,
}

impl TypeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index all named types of `file` under its package.
    pub fn add_file(&mut self, file: &ProtoFile) {
        let prefix = file.package.clone().unwrap_or_default();
        for e in &file.enums {
            self.insert(&prefix, &e.name, TypeKind::Enum);
        }
        for m in &file.messages {
            self.add_message(&prefix, m);
        }
    }

    fn add_message(&mut self, prefix: &str, m: &MessageDef) {
        let fqn = join(prefix, &m.name);
        self.types.insert(fqn.clone(), TypeKind::Message);
        for e in &m.enums {
            self.insert(&fqn, &e.name, TypeKind::Enum);
        }
        for nested in &m.messages {
            self.add_message(&fqn, nested);
        }
    }

    fn insert(&mut self, prefix: &str, name: &str, kind: TypeKind) {
        self.types.insert(join(prefix, name), kind);
    }

    pub fn kind_of(&self, fqn: &str) -> Option<TypeKind> {
        self.types.get(fqn).copied()
    }

    /// Resolve a type reference the way protoc scopes names: a leading dot
    /// is absolute; otherwise the innermost enclosing scope wins.
    ///
    /// `scope` is the enclosing path (package segments then message names).
    pub fn resolve(&self, reference: &str, scope: &[String]) -> Option<(String, TypeKind)> {
        if let Some(absolute) = reference.strip_prefix('.') {
            return self
                .kind_of(absolute)
                .map(|kind| (absolute.to_string(), kind));
        }
        for depth in (0..=scope.len()).rev() {
            let prefix = scope[..depth].join(".");
            let candidate = join(&prefix, reference);
            if let Some(kind) = self.kind_of(&candidate) {
                return Some((candidate, kind));
            }
        }
        None
    }
}

pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> ProtoFile {
        ProtoFile {
            syntax: Syntax::Proto3,
            package: Some("acme.orders".into()),
            imports: vec![],
            messages: vec![MessageDef {
                name: "Order".into(),
                fields: vec![],
                oneofs: vec![],
                messages: vec![MessageDef {
                    name: "Line".into(),
                    ..MessageDef::default()
                }],
                enums: vec![EnumDef {
                    name: "Status".into(),
                    values: vec![("UNKNOWN".into(), 0)],
                }],
            }],
            enums: vec![],
        }
    }

    #[test]
    fn index_contains_nested_types() {
        let mut index = TypeIndex::new();
        index.add_file(&sample_file());
        assert_eq!(
            index.kind_of("acme.orders.Order"),
            Some(TypeKind::Message)
        );
        assert_eq!(
            index.kind_of("acme.orders.Order.Line"),
            Some(TypeKind::Message)
        );
        assert_eq!(
            index.kind_of("acme.orders.Order.Status"),
            Some(TypeKind::Enum)
        );
    }

    #[test]
    fn resolution_prefers_innermost_scope() {
        let mut index = TypeIndex::new();
        index.add_file(&sample_file());
        let scope = vec!["acme".into(), "orders".into(), "Order".into()];
        let (fqn, kind) = index.resolve("Status", &scope).unwrap();
        assert_eq!(fqn, "acme.orders.Order.Status");
        assert_eq!(kind, TypeKind::Enum);

        let (fqn, _) = index.resolve("Order.Line", &scope[..2]).unwrap();
        assert_eq!(fqn, "acme.orders.Order.Line");

        assert!(index.resolve(".Order", &scope).is_none(), "absolute miss");
        assert!(index.resolve(".acme.orders.Order", &scope).is_some());
    }
}
