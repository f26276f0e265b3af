//! Schema types — the stored representation of a registered schema version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RegistryError;

/// Sentinel version meaning "latest non-deleted version of the subject".
pub const LATEST_VERSION: i32 = -1;

/// Serialization format of a registered schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaFormat {
    /// Apache Avro. The default when a request omits `schemaType`.
    #[default]
    Avro,
    Protobuf,
    Json,
}

impl SchemaFormat {
    /// All supported formats, in the order the REST surface advertises them.
    pub fn all() -> [SchemaFormat; 3] {
        [SchemaFormat::Avro, SchemaFormat::Protobuf, SchemaFormat::Json]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaFormat::Avro => "AVRO",
            SchemaFormat::Protobuf => "PROTOBUF",
            SchemaFormat::Json => "JSON",
        }
    }
}

impl std::fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SchemaFormat {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVRO" => Ok(SchemaFormat::Avro),
            "PROTOBUF" => Ok(SchemaFormat::Protobuf),
            "JSON" => Ok(SchemaFormat::Json),
            other => Err(RegistryError::UnknownFormat(other.to_string())),
        }
    }
}

/// A named dependency from one schema to a specific version of another
/// subject within the same context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaReference {
    /// The name the referring schema uses (Avro fullname, proto import path,
    /// or JSON `$ref` target).
    pub name: String,
    /// Subject the referenced schema lives under.
    pub subject: String,
    /// Referenced version.
    pub version: i32,
}

/// Free-form metadata attached to a schema version.
///
/// The registry carries this opaquely; it only participates in the
/// idempotency comparison during registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensitive: Vec<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.properties.is_empty() && self.sensitive.is_empty()
    }

    /// Empty metadata and absent metadata compare equal during dedup.
    pub fn normalized(meta: Option<&Metadata>) -> Option<&Metadata> {
        meta.filter(|m| !m.is_empty())
    }
}

/// A single data-governance rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Migration and domain rules attached to a schema version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migration_rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_rules: Vec<Rule>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.migration_rules.is_empty() && self.domain_rules.is_empty()
    }

    /// Empty rule sets and absent rule sets compare equal during dedup.
    pub fn normalized(rules: Option<&RuleSet>) -> Option<&RuleSet> {
        rules.filter(|r| !r.is_empty())
    }
}

/// A stored schema version row.
///
/// `id` is the per-context global identifier of the schema *content* (shared
/// across subjects registering identical text); `(context, subject, version)`
/// identifies this particular row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub context: String,
    pub subject: String,
    pub version: i32,
    pub id: i64,
    #[serde(rename = "schemaType")]
    pub format: SchemaFormat,
    /// Raw schema text as submitted (or its normalized form, when the
    /// subject config requests normalization).
    pub schema: String,
    /// Canonical-form digest; equality defines content identity.
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SchemaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(rename = "ruleSet", default, skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<RuleSet>,
    #[serde(default)]
    pub deleted: bool,
    /// Unix timestamp (milliseconds) of row creation.
    pub created_at: i64,
}

/// Input to `SchemaStore::create_schema` — everything but the allocated
/// identifiers. The fingerprint is computed by the caller so the storage
/// layer stays format-agnostic.
#[derive(Debug, Clone)]
pub struct NewSchema {
    pub subject: String,
    pub format: SchemaFormat,
    pub schema: String,
    pub fingerprint: String,
    pub references: Vec<SchemaReference>,
    pub metadata: Option<Metadata>,
    pub rule_set: Option<RuleSet>,
}

/// A `(subject, version)` pair, as returned by id-to-versions lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectVersion {
    pub subject: String,
    pub version: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_roundtrip() {
        for fmt in SchemaFormat::all() {
            let parsed: SchemaFormat = fmt.as_str().parse().unwrap();
            assert_eq!(parsed, fmt);
        }
        assert!("THRIFT".parse::<SchemaFormat>().is_err());
    }

    #[test]
    fn format_serde_uses_confluent_names() {
        assert_eq!(
            serde_json::to_string(&SchemaFormat::Protobuf).unwrap(),
            "\"PROTOBUF\""
        );
        let fmt: SchemaFormat = serde_json::from_str("\"JSON\"").unwrap();
        assert_eq!(fmt, SchemaFormat::Json);
    }

    #[test]
    fn empty_metadata_normalizes_to_absent() {
        let empty = Metadata::default();
        assert!(Metadata::normalized(Some(&empty)).is_none());
        assert!(Metadata::normalized(None).is_none());

        let mut tagged = Metadata::default();
        tagged
            .properties
            .insert("owner".into(), "platform-team".into());
        assert!(Metadata::normalized(Some(&tagged)).is_some());
    }

    #[test]
    fn empty_rule_set_normalizes_to_absent() {
        let empty = RuleSet::default();
        assert!(RuleSet::normalized(Some(&empty)).is_none());

        let rules = RuleSet {
            domain_rules: vec![Rule {
                name: "encrypt-pii".into(),
                ..Rule::default()
            }],
            ..RuleSet::default()
        };
        assert!(RuleSet::normalized(Some(&rules)).is_some());
    }
}
