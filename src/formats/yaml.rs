//! YAML manifest patcher
//!
//! Structurally the same algorithm as the JSON patcher: locate each
//! configured dependency field, locate the key equal to the package name,
//! replace the scalar with constraint+target. serde_yaml mappings keep
//! document order, so untouched entries serialize back in their original
//! positions. Field names may use dot-separated paths to reach nested
//! mappings (e.g. "tool.dependencies").

use crate::config::RuleConfig;
use crate::domain::Package;
use crate::error::FormatError;
use crate::formats::FormatUpdater;
use serde_yaml::Value;

/// Updater for YAML manifests (pubspec.yaml and similar)
#[derive(Debug)]
pub struct YamlUpdater;

impl FormatUpdater for YamlUpdater {
    fn update_version(
        &self,
        content: &[u8],
        package: &Package,
        rule: &RuleConfig,
        target: &str,
    ) -> Result<Vec<u8>, FormatError> {
        let mut document: Value =
            serde_yaml::from_slice(content).map_err(|e| FormatError::Yaml {
                message: e.to_string(),
            })?;

        let replacement = format!("{}{}", package.constraint, target);
        let mut found = false;

        for field in rule.fields.keys() {
            let Some(node) = nested_field_mut(&mut document, field) else {
                continue;
            };
            let Value::Mapping(deps) = node else {
                continue;
            };
            if deps.contains_key(package.name.as_str()) {
                deps.insert(
                    Value::String(package.name.clone()),
                    Value::String(replacement.clone()),
                );
                found = true;
            }
        }

        if !found {
            return Err(FormatError::PackageNotFound {
                package: package.name.clone(),
                manifest: package.source.display().to_string(),
            });
        }

        serde_yaml::to_string(&document)
            .map(String::into_bytes)
            .map_err(|e| FormatError::Yaml {
                message: e.to_string(),
            })
    }
}

/// Walks a dot-separated field path through nested mappings
fn nested_field_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Mapping(map) => {
                current = map.get_mut(part)?;
            }
            _ => return None,
        }
    }
    Some(current)
}
