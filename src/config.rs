//! Configuration model and loading
//!
//! Configuration is read from a YAML file. Each rule describes one package
//! manager: which manifest format it uses, which dependency fields to
//! patch, how to extract versions from raw text, which lock files belong
//! to it, and the command that regenerates the lock file after a manifest
//! change. Package-level overrides can replace the lock command, its
//! environment, group, or timeout for individual packages.

use crate::domain::Package;
use crate::error::{ConfigError, UpdateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Base directory updates are executed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Per-ecosystem rule configurations, keyed by rule id
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,

    /// Named package groups shared across rules
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, GroupConfig>,

    /// System test suite run after updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_tests: Option<SystemTestsConfig>,
}

impl Config {
    /// Returns the rule configuration for a package, if present
    pub fn rule_for(&self, package: &Package) -> Option<&RuleConfig> {
        self.rules.get(&package.rule)
    }
}

/// Configuration for a single package manager rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Package manager name (e.g. "npm", "composer", "nuget", "pip")
    #[serde(default)]
    pub manager: String,

    /// Manifest format key: "json", "yaml", "xml" or "raw"
    pub format: String,

    /// Dependency field name to dependency type ("prod"/"dev") mapping
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Regex or attribute extraction settings for raw and XML formats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionConfig>,

    /// Lock command configuration for this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateCommandConfig>,

    /// Lock file glob patterns, snapshotted before updates for rollback
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lock_files: Vec<LockFileConfig>,

    /// Per-package overrides of the update configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub package_overrides: BTreeMap<String, PackageOverrideConfig>,

    /// Per-package settings outside of groups
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, PackageSettings>,

    /// Named groups local to this rule
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, GroupConfig>,
}

impl RuleConfig {
    /// Returns true when the package must be updated together with all of
    /// its transitive dependencies (composer's -W flag or equivalent).
    ///
    /// The setting can come from the package's own entry or from any group
    /// the package belongs to.
    pub fn should_update_with_all_dependencies(&self, package: &str) -> bool {
        if let Some(settings) = self.packages.get(package) {
            if settings.with_all_dependencies {
                return true;
            }
        }
        self.groups.values().any(|group| {
            group.with_all_dependencies && group.packages.iter().any(|p| p == package)
        })
    }
}

/// Per-package settings at the rule level
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageSettings {
    /// Update this package together with all of its dependencies
    #[serde(default)]
    pub with_all_dependencies: bool,
}

/// Named group of packages sharing one lock command invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Package names belonging to this group
    #[serde(default)]
    pub packages: Vec<String>,

    /// Apply the with-all-dependencies flag to the whole group
    #[serde(default)]
    pub with_all_dependencies: bool,
}

/// Extraction settings for version patching
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Regex with named groups for raw-format extraction.
    ///
    /// Recognized groups: `name` (or `n`), `version` (or `version_alt`),
    /// and optionally `constraint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Slash-separated element path for XML node lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// XML attribute holding the package name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_attr: Option<String>,

    /// XML attribute holding the package version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_attr: Option<String>,
}

/// Lock file patterns for a rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockFileConfig {
    /// Glob patterns resolved relative to the update scope directory
    #[serde(default)]
    pub files: Vec<String>,
}

/// Lock command configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCommandConfig {
    /// Multiline command template. Placeholders: {{package}}, {{version}},
    /// {{constraint}}, {{with_all_deps_flag}}.
    #[serde(default)]
    pub commands: String,

    /// Environment variables set while executing the commands
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Group label for batching packages under one lock invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Command timeout in seconds; 0 disables the timeout
    #[serde(default)]
    pub timeout_seconds: u64,
}

/// Per-package override of the update configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageOverrideConfig {
    /// Update configuration overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateOverrideConfig>,
}

/// Fields of [`UpdateCommandConfig`] that can be overridden per package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOverrideConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// System test suite configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemTestsConfig {
    /// Tests executed in declaration order
    #[serde(default)]
    pub tests: Vec<SystemTestConfig>,

    /// Abort the update when a test without continue_on_fail fails.
    /// Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_fail: Option<bool>,

    /// When the suite runs relative to updates. Defaults to after each
    /// package or group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_mode: Option<SystemTestRunMode>,
}

impl SystemTestsConfig {
    /// Returns the effective stop-on-fail setting
    pub fn is_stop_on_fail(&self) -> bool {
        self.stop_on_fail.unwrap_or(true)
    }

    /// Returns the effective run mode
    pub fn effective_run_mode(&self) -> SystemTestRunMode {
        self.run_mode.unwrap_or(SystemTestRunMode::AfterEach)
    }
}

/// When system tests run relative to updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemTestRunMode {
    /// Run after each package or group update
    AfterEach,
    /// Run once after all updates complete
    AfterAll,
}

/// A single named system test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemTestConfig {
    /// Display name for the test
    pub name: String,

    /// Multiline command string to execute
    #[serde(default)]
    pub commands: String,

    /// Environment variables for the test commands
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Timeout in seconds; 0 uses the suite default
    #[serde(default)]
    pub timeout_seconds: u64,

    /// A failure of this test is advisory rather than fatal
    #[serde(default)]
    pub continue_on_fail: bool,
}

/// Loads the configuration from a YAML file
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Resolves the effective update configuration for a package.
///
/// Starts from the rule's base update configuration and applies any
/// package-specific overrides for commands, environment, group and
/// timeout. A missing rule is a hard error; a rule without an update
/// configuration is classified unsupported so the orchestrator skips the
/// package instead of aborting the batch.
pub fn resolve_update_config(
    package: &Package,
    cfg: &Config,
) -> Result<UpdateCommandConfig, UpdateError> {
    let rule = cfg.rules.get(&package.rule).ok_or(UpdateError::MissingRule {
        rule: package.rule.clone(),
    })?;

    let base = rule.update.as_ref().ok_or_else(|| {
        UpdateError::unsupported(format!("update configuration missing for {}", package.rule))
    })?;

    let mut effective = base.clone();

    if let Some(override_cfg) = rule
        .package_overrides
        .get(&package.name)
        .and_then(|o| o.update.as_ref())
    {
        if let Some(commands) = &override_cfg.commands {
            effective.commands = commands.trim().to_string();
        }
        if let Some(env) = &override_cfg.env {
            effective.env = env.clone();
        }
        if let Some(group) = &override_cfg.group {
            effective.group = Some(group.trim().to_string());
        }
        if let Some(timeout) = override_cfg.timeout_seconds {
            effective.timeout_seconds = timeout;
        }
    }

    Ok(effective)
}
