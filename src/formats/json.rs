//! JSON manifest patcher with ordered object preservation
//!
//! serde_json's default map type does not preserve key order, so this
//! module defines an explicit ordered association-list value type used for
//! every object in the document, nested ones included. Re-serialization
//! uses a fixed 2-space indent with no trailing newline and no HTML
//! escaping, keeping diffs limited to the patched version string.

use crate::config::RuleConfig;
use crate::domain::Package;
use crate::error::FormatError;
use crate::formats::FormatUpdater;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A JSON value that preserves object key order
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<JsonValue>),
    Object(JsonMap),
}

impl JsonValue {
    /// Returns the object map if this value is an object
    pub fn as_object_mut(&mut self) -> Option<&mut JsonMap> {
        match self {
            JsonValue::Object(map) => Some(map),
            _ => None,
        }
    }
}

/// An insertion-ordered key/value sequence backing JSON objects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonMap {
    entries: Vec<(String, JsonValue)>,
}

impl JsonMap {
    /// Creates an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true when a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Returns the value for a key
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value for a key
    pub fn get_mut(&mut self, key: &str) -> Option<&mut JsonValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Replaces the value for an existing key in place, or appends a new
    /// entry, preserving insertion order either way
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        let key = key.into();
        if let Some(existing) = self.get_mut(&key) {
            *existing = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Iterates entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl Serialize for JsonValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonValue::Null => serializer.serialize_unit(),
            JsonValue::Bool(b) => serializer.serialize_bool(*b),
            JsonValue::Number(n) => n.serialize(serializer),
            JsonValue::String(s) => serializer.serialize_str(s),
            JsonValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            JsonValue::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map.iter() {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for JsonValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = JsonValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("any JSON value")
            }

            fn visit_bool<E>(self, value: bool) -> Result<JsonValue, E> {
                Ok(JsonValue::Bool(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<JsonValue, E> {
                Ok(JsonValue::Number(value.into()))
            }

            fn visit_u64<E>(self, value: u64) -> Result<JsonValue, E> {
                Ok(JsonValue::Number(value.into()))
            }

            fn visit_f64<E: serde::de::Error>(self, value: f64) -> Result<JsonValue, E> {
                serde_json::Number::from_f64(value)
                    .map(JsonValue::Number)
                    .ok_or_else(|| E::custom("non-finite JSON number"))
            }

            fn visit_str<E>(self, value: &str) -> Result<JsonValue, E> {
                Ok(JsonValue::String(value.to_string()))
            }

            fn visit_string<E>(self, value: String) -> Result<JsonValue, E> {
                Ok(JsonValue::String(value))
            }

            fn visit_unit<E>(self) -> Result<JsonValue, E> {
                Ok(JsonValue::Null)
            }

            fn visit_none<E>(self) -> Result<JsonValue, E> {
                Ok(JsonValue::Null)
            }

            fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<JsonValue, D::Error> {
                JsonValue::deserialize(deserializer)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<JsonValue, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(JsonValue::Array(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<JsonValue, A::Error> {
                let mut map = JsonMap::new();
                while let Some((key, value)) = access.next_entry::<String, JsonValue>()? {
                    map.entries.push((key, value));
                }
                Ok(JsonValue::Object(map))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Parses JSON bytes into an ordered value
pub fn parse_json(content: &[u8]) -> Result<JsonValue, FormatError> {
    serde_json::from_slice(content).map_err(|e| FormatError::Json {
        message: e.to_string(),
    })
}

/// Serializes an ordered value with 2-space indent and no trailing newline
pub fn to_pretty_json(value: &JsonValue) -> Result<Vec<u8>, FormatError> {
    serde_json::to_string_pretty(value)
        .map(String::into_bytes)
        .map_err(|e| FormatError::Json {
            message: e.to_string(),
        })
}

/// Updater for JSON manifests (package.json, composer.json, ...)
#[derive(Debug)]
pub struct JsonUpdater;

impl FormatUpdater for JsonUpdater {
    fn update_version(
        &self,
        content: &[u8],
        package: &Package,
        rule: &RuleConfig,
        target: &str,
    ) -> Result<Vec<u8>, FormatError> {
        let mut document = parse_json(content)?;
        let root = document.as_object_mut().ok_or_else(|| FormatError::Json {
            message: "root value is not an object".to_string(),
        })?;

        let replacement = format!("{}{}", package.constraint, target);
        let mut found = false;

        for field in rule.fields.keys() {
            let Some(deps) = root.get_mut(field).and_then(JsonValue::as_object_mut) else {
                continue;
            };
            if deps.contains_key(&package.name) {
                deps.set(&package.name, JsonValue::String(replacement.clone()));
                found = true;
            }
        }

        if !found {
            return Err(FormatError::PackageNotFound {
                package: package.name.clone(),
                manifest: package.source.display().to_string(),
            });
        }

        to_pretty_json(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npm_rule() -> RuleConfig {
        let mut rule = RuleConfig {
            format: "json".to_string(),
            ..Default::default()
        };
        rule.fields
            .insert("dependencies".to_string(), "prod".to_string());
        rule.fields
            .insert("devDependencies".to_string(), "dev".to_string());
        rule
    }

    fn npm_package(name: &str, version: &str, constraint: &str) -> Package {
        Package::new(name, version, "npm", "package.json").with_constraint(constraint)
    }

    #[test]
    fn test_update_version_replaces_scalar() {
        let content = br#"{
  "name": "demo",
  "dependencies": {
    "lodash": "^4.17.21"
  }
}"#;
        let updated = JsonUpdater
            .update_version(content, &npm_package("lodash", "4.17.21", "^"), &npm_rule(), "4.18.0")
            .unwrap();
        let text = String::from_utf8(updated).unwrap();
        assert!(text.contains("\"lodash\": \"^4.18.0\""));
        assert!(!text.contains("4.17.21"));
    }

    #[test]
    fn test_update_version_preserves_key_order() {
        let content = br#"{
  "name": "demo",
  "version": "1.0.0",
  "dependencies": {
    "zod": "^3.0.0",
    "axios": "^1.0.0",
    "lodash": "^4.17.21"
  },
  "devDependencies": {
    "typescript": "^5.0.0"
  }
}"#;
        let updated = JsonUpdater
            .update_version(content, &npm_package("axios", "1.0.0", "^"), &npm_rule(), "1.5.0")
            .unwrap();
        let expected = String::from_utf8_lossy(content).replace("^1.0.0", "^1.5.0");
        assert_eq!(String::from_utf8(updated).unwrap(), expected);
    }

    #[test]
    fn test_update_version_all_matching_fields() {
        let content = br#"{
  "dependencies": {
    "typescript": "^4.0.0"
  },
  "devDependencies": {
    "typescript": "^4.0.0"
  }
}"#;
        let updated = JsonUpdater
            .update_version(
                content,
                &npm_package("typescript", "4.0.0", "^"),
                &npm_rule(),
                "5.0.0",
            )
            .unwrap();
        let text = String::from_utf8(updated).unwrap();
        assert_eq!(text.matches("^5.0.0").count(), 2);
    }

    #[test]
    fn test_update_version_not_found() {
        let content = br#"{"dependencies": {}}"#;
        let err = JsonUpdater
            .update_version(content, &npm_package("lodash", "1.0.0", "^"), &npm_rule(), "2.0.0")
            .unwrap_err();
        assert!(matches!(err, FormatError::PackageNotFound { .. }));
    }

    #[test]
    fn test_update_version_invalid_json() {
        let err = JsonUpdater
            .update_version(b"not json", &npm_package("lodash", "1.0.0", "^"), &npm_rule(), "2.0.0")
            .unwrap_err();
        assert!(matches!(err, FormatError::Json { .. }));
    }

    #[test]
    fn test_update_version_scoped_package() {
        let content = br#"{
  "dependencies": {
    "@types/node": "^20.0.0"
  }
}"#;
        let updated = JsonUpdater
            .update_version(
                content,
                &npm_package("@types/node", "20.0.0", "^"),
                &npm_rule(),
                "20.10.0",
            )
            .unwrap();
        assert!(String::from_utf8(updated)
            .unwrap()
            .contains("\"@types/node\": \"^20.10.0\""));
    }

    #[test]
    fn test_serialization_does_not_escape_html() {
        let content = br#"{
  "dependencies": {
    "demo": "^1.0.0"
  },
  "scripts": {
    "check": "test 1 < 2 && echo ok"
  }
}"#;
        let updated = JsonUpdater
            .update_version(content, &npm_package("demo", "1.0.0", "^"), &npm_rule(), "2.0.0")
            .unwrap();
        let text = String::from_utf8(updated).unwrap();
        assert!(text.contains("test 1 < 2 && echo ok"));
        assert!(!text.contains("\\u003c"));
    }

    #[test]
    fn test_serialization_no_trailing_newline() {
        let content = br#"{"dependencies": {"a": "1.0.0"}}"#;
        let updated = JsonUpdater
            .update_version(content, &npm_package("a", "1.0.0", ""), &npm_rule(), "2.0.0")
            .unwrap();
        assert!(!updated.ends_with(b"\n"));
    }

    #[test]
    fn test_nested_values_survive_round_trip() {
        let content = br#"{
  "config": {
    "nested": {
      "keep": [1, 2.5, true, null, "str"]
    }
  },
  "dependencies": {
    "a": "1.0.0"
  }
}"#;
        let updated = JsonUpdater
            .update_version(content, &npm_package("a", "1.0.0", ""), &npm_rule(), "2.0.0")
            .unwrap();
        let text = String::from_utf8(updated).unwrap();
        assert!(text.contains("\"keep\": ["));
        assert!(text.contains("2.5"));
        assert!(text.contains("null"));
    }

    #[test]
    fn test_json_map_set_preserves_position() {
        let mut map = JsonMap::new();
        map.set("first", JsonValue::String("1".to_string()));
        map.set("second", JsonValue::String("2".to_string()));
        map.set("first", JsonValue::String("updated".to_string()));

        let keys: Vec<&String> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["first", "second"]);
        assert_eq!(
            map.get("first"),
            Some(&JsonValue::String("updated".to_string()))
        );
    }
}
