//! Update plan and result structures

use super::{Package, UpdateStatus};
use crate::config::UpdateCommandConfig;
use crate::error::UpdateError;
use crate::systemtest::SystemTestResult;
use std::sync::Arc;

/// Outcome of an update attempt for a single package.
///
/// One result is recorded per input plan, regardless of outcome. Errors are
/// reference-counted so a single group-level failure can be attached to
/// every affected member.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    /// The package the attempt applies to
    pub package: Package,
    /// The target version of the attempt
    pub target: String,
    /// Terminal or transient status of the attempt
    pub status: UpdateStatus,
    /// Error attached to the attempt, if any
    pub error: Option<Arc<UpdateError>>,
    /// Group label the package was batched under
    pub group: String,
    /// Newer versions known to be available (hints for display)
    pub available: Vec<String>,
    /// System test outcome attached to this attempt, if tests ran
    pub system_test_result: Option<SystemTestResult>,
}

impl UpdateResult {
    /// Creates a planned result for a package and target version
    pub fn planned(package: Package, target: impl Into<String>) -> Self {
        let group = package.group.clone().unwrap_or_default();
        Self {
            package,
            target: target.into(),
            status: UpdateStatus::Planned,
            error: None,
            group,
            available: Vec::new(),
            system_test_result: None,
        }
    }

    /// Attaches an error and a status in one step
    pub fn fail_with(&mut self, status: UpdateStatus, error: Arc<UpdateError>) {
        self.status = status;
        self.error = Some(error);
    }

    /// Returns the error message, or an empty string when no error is set
    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default()
    }
}

/// A proposed update for a single package, carrying its rollback target.
#[derive(Debug, Clone)]
pub struct PlannedUpdate {
    /// Effective update command configuration, if the rule provides one
    pub update_cfg: Option<UpdateCommandConfig>,
    /// The result record for this plan
    pub result: UpdateResult,
    /// The version rollback would restore; mutated only by drift correction
    pub original: String,
    /// Key used to batch consecutive plans into one lock invocation
    pub group_key: String,
}

impl PlannedUpdate {
    /// Creates a plan with the package's declared version as rollback target
    pub fn new(
        update_cfg: Option<UpdateCommandConfig>,
        result: UpdateResult,
        group_key: impl Into<String>,
    ) -> Self {
        let original = result.package.version.clone();
        Self {
            update_cfg,
            result,
            original,
            group_key: group_key.into(),
        }
    }
}

/// Version state captured before an update, for later validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSnapshot {
    /// Declared version at capture time
    pub version: String,
    /// Installed version at capture time, if known
    pub installed: Option<String>,
}

/// Captures a baseline snapshot of declared and installed versions.
pub fn snapshot_versions(packages: &[Package]) -> std::collections::HashMap<String, VersionSnapshot> {
    packages
        .iter()
        .map(|p| {
            (
                p.key(),
                VersionSnapshot {
                    version: p.version.clone(),
                    installed: p.installed_version.clone(),
                },
            )
        })
        .collect()
}
