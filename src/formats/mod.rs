//! Format-aware manifest patchers
//!
//! This module provides:
//! - FormatUpdater trait for patching a declared version in manifest bytes
//! - FormatRegistry mapping format keys to updaters, extensible at runtime
//! - Built-in updaters for JSON, YAML, XML and raw (regex) formats
//!
//! The registry is an explicit service owned by the caller and passed by
//! reference; registering a format for a key replaces any previous entry,
//! so exactly one updater exists per key at any time. No I/O happens while
//! the registry lock is held.

mod json;
mod raw;
mod xml;
mod yaml;

pub use json::{JsonMap, JsonUpdater, JsonValue};
pub use raw::RawUpdater;
pub use xml::{XmlNode, XmlUpdater};
pub use yaml::YamlUpdater;

use crate::config::RuleConfig;
use crate::domain::Package;
use crate::error::FormatError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Patches the declared version of a package inside manifest content.
pub trait FormatUpdater: Send + Sync + std::fmt::Debug {
    /// Returns the patched content, or an error when the package cannot be
    /// located or the content cannot be parsed.
    fn update_version(
        &self,
        content: &[u8],
        package: &Package,
        rule: &RuleConfig,
        target: &str,
    ) -> Result<Vec<u8>, FormatError>;
}

/// Registry of format updaters keyed by format string.
#[derive(Default)]
pub struct FormatRegistry {
    updaters: RwLock<HashMap<String, Arc<dyn FormatUpdater>>>,
}

impl FormatRegistry {
    /// Creates a registry with the built-in formats pre-registered
    pub fn new() -> Self {
        let registry = Self {
            updaters: RwLock::new(HashMap::new()),
        };
        registry.register("json", Arc::new(JsonUpdater));
        registry.register("yaml", Arc::new(YamlUpdater));
        registry.register("xml", Arc::new(XmlUpdater));
        registry.register("raw", Arc::new(RawUpdater));
        registry
    }

    /// Creates an empty registry with no formats registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers an updater for a format, replacing any previous entry
    pub fn register(&self, format: impl Into<String>, updater: Arc<dyn FormatUpdater>) {
        let mut updaters = self.updaters.write().expect("format registry poisoned");
        updaters.insert(format.into(), updater);
    }

    /// Returns the updater registered for a format, if any
    pub fn get(&self, format: &str) -> Option<Arc<dyn FormatUpdater>> {
        let updaters = self.updaters.read().expect("format registry poisoned");
        updaters.get(format).cloned()
    }

    /// Returns all registered format keys, sorted for stable diagnostics
    pub fn formats(&self) -> Vec<String> {
        let updaters = self.updaters.read().expect("format registry poisoned");
        let mut formats: Vec<String> = updaters.keys().cloned().collect();
        formats.sort();
        formats
    }

    /// Returns the updater for a format, or a classified unsupported error
    /// naming the registered set
    pub fn updater_for(&self, format: &str) -> Result<Arc<dyn FormatUpdater>, FormatError> {
        self.get(format).ok_or_else(|| FormatError::UnsupportedFormat {
            format: format.to_string(),
            registered: self.formats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NoopUpdater;

    impl FormatUpdater for NoopUpdater {
        fn update_version(
            &self,
            content: &[u8],
            _package: &Package,
            _rule: &RuleConfig,
            _target: &str,
        ) -> Result<Vec<u8>, FormatError> {
            Ok(content.to_vec())
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = FormatRegistry::new();
        assert_eq!(registry.formats(), vec!["json", "raw", "xml", "yaml"]);
    }

    #[test]
    fn test_get_unknown_format() {
        let registry = FormatRegistry::new();
        assert!(registry.get("toml").is_none());
    }

    #[test]
    fn test_updater_for_unknown_format_is_unsupported() {
        let registry = FormatRegistry::new();
        let err = registry.updater_for("toml").unwrap_err();
        assert!(err.is_unsupported());
        let msg = format!("{}", err);
        assert!(msg.contains("toml"));
        assert!(msg.contains("json"));
    }

    #[test]
    fn test_register_custom_format() {
        let registry = FormatRegistry::new();
        registry.register("noop", Arc::new(NoopUpdater));
        assert!(registry.get("noop").is_some());
        assert_eq!(
            registry.formats(),
            vec!["json", "noop", "raw", "xml", "yaml"]
        );
    }

    #[test]
    fn test_register_replaces_existing() {
        let registry = FormatRegistry::empty();
        registry.register("x", Arc::new(NoopUpdater));
        registry.register("x", Arc::new(NoopUpdater));
        assert_eq!(registry.formats(), vec!["x"]);
    }

    #[test]
    fn test_empty_registry_lists_nothing() {
        let registry = FormatRegistry::empty();
        assert!(registry.formats().is_empty());
        assert!(registry.updater_for("json").is_err());
    }
}
