//! Package snapshot structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// An observed snapshot of a declared dependency.
///
/// Instances are created by the caller (manifest scanning is outside this
/// crate's scope) and never mutated by the update engine, except that drift
/// correction may refresh the copy held inside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name as declared in the manifest
    pub name: String,
    /// Declared version (without constraint prefix)
    pub version: String,
    /// Version constraint operator (e.g. "^", "~", "==", ">=")
    #[serde(default)]
    pub constraint: String,
    /// Dependency type ("prod", "dev", ...)
    #[serde(default)]
    pub dep_type: String,
    /// Owning package manager (e.g. "npm", "composer", "nuget", "pip")
    #[serde(default)]
    pub package_type: String,
    /// Rule id from configuration that governs this package
    pub rule: String,
    /// Manifest file the package was declared in
    pub source: PathBuf,
    /// Currently installed version, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    /// Optional group label for batched updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Package {
    /// Creates a new package snapshot
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        rule: impl Into<String>,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            constraint: String::new(),
            dep_type: "prod".to_string(),
            package_type: String::new(),
            rule: rule.into(),
            source: source.into(),
            installed_version: None,
            group: None,
        }
    }

    /// Sets the constraint operator (builder pattern)
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }

    /// Sets the dependency type (builder pattern)
    pub fn with_dep_type(mut self, dep_type: impl Into<String>) -> Self {
        self.dep_type = dep_type.into();
        self
    }

    /// Sets the package manager name (builder pattern)
    pub fn with_package_type(mut self, package_type: impl Into<String>) -> Self {
        self.package_type = package_type.into();
        self
    }

    /// Sets the installed version (builder pattern)
    pub fn with_installed_version(mut self, installed: impl Into<String>) -> Self {
        self.installed_version = Some(installed.into());
        self
    }

    /// Sets the group label (builder pattern)
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Returns a key that uniquely identifies this package within a run
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.rule, self.package_type, self.dep_type, self.name
        )
    }

    /// Returns "name (package_type/rule)" for error messages
    pub fn describe(&self) -> String {
        format!("{} ({}/{})", self.name, self.package_type, self.rule)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}{}", self.name, self.constraint, self.version)
    }
}
