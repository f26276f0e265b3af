//! Bundled well-known Google types.
//!
//! These imports must resolve without the client supplying references, so
//! the registry carries the type definitions itself (comments and options
//! stripped; field layout matches the published descriptors).

/// Returns the source of a well-known import path, if bundled.
pub fn get(path: &str) -> Option<&'static str> {
    match path {
        "google/protobuf/any.proto" => Some(ANY),
        "google/protobuf/timestamp.proto" => Some(TIMESTAMP),
        "google/protobuf/duration.proto" => Some(DURATION),
        "google/protobuf/empty.proto" => Some(EMPTY),
        "google/protobuf/wrappers.proto" => Some(WRAPPERS),
        "google/protobuf/struct.proto" => Some(STRUCT),
        "google/protobuf/field_mask.proto" => Some(FIELD_MASK),
        _ => None,
    }
}

const ANY: &str = r#"
syntax = "proto3";
package google.protobuf;
message Any {
  string type_url = 1;
  bytes value = 2;
}
"#;

const TIMESTAMP: &str = r#"
syntax = "proto3";
package google.protobuf;
message Timestamp {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#;

const DURATION: &str = r#"
syntax = "proto3";
package google.protobuf;
message Duration {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#;

const EMPTY: &str = r#"
syntax = "proto3";
package google.protobuf;
message Empty {
}
"#;

const WRAPPERS: &str = r#"
syntax = "proto3";
package google.protobuf;
message DoubleValue {
  double value = 1;
}
message FloatValue {
  float value = 1;
}
message Int64Value {
  int64 value = 1;
}
message UInt64Value {
  uint64 value = 1;
}
message Int32Value {
  int32 value = 1;
}
message UInt32Value {
  uint32 value = 1;
}
message BoolValue {
  bool value = 1;
}
message StringValue {
  string value = 1;
}
message BytesValue {
  bytes value = 1;
}
"#;

const STRUCT: &str = r#"
syntax = "proto3";
package google.protobuf;
message Struct {
  map<string, Value> fields = 1;
}
message Value {
  oneof kind {
    NullValue null_value = 1;
    double number_value = 2;
    string string_value = 3;
    bool bool_value = 4;
    Struct struct_value = 5;
    ListValue list_value = 6;
  }
}
message ListValue {
  repeated Value values = 1;
}
enum NullValue {
  NULL_VALUE = 0;
}
"#;

const FIELD_MASK: &str = r#"
syntax = "proto3";
package google.protobuf;
message FieldMask {
  repeated string paths = 1;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_bundled_sources_parse() {
        for path in [
            "google/protobuf/any.proto",
            "google/protobuf/timestamp.proto",
            "google/protobuf/duration.proto",
            "google/protobuf/empty.proto",
            "google/protobuf/wrappers.proto",
            "google/protobuf/struct.proto",
            "google/protobuf/field_mask.proto",
        ] {
            let source = get(path).unwrap();
            let file = crate::parser::parse(source).unwrap();
            assert_eq!(file.package.as_deref(), Some("google.protobuf"));
        }
        assert!(get("google/protobuf/api.proto").is_none());
    }
}
