//! Update status constants

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a package within an update attempt.
///
/// Transitions are monotonic per attempt: a plan enters execution as
/// `Planned` and ends as `Updated` or `Failed`. `NotConfigured` and
/// `Floating` are never promoted to `Updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    /// The update is planned but not yet applied
    Planned,
    /// The package was successfully updated
    Updated,
    /// The update attempt failed
    Failed,
    /// The package is already at the target version
    UpToDate,
    /// No update configuration exists for the package
    NotConfigured,
    /// The declared version is a floating constraint and cannot be pinned
    Floating,
    /// A configuration error prevented planning the update
    ConfigError,
    /// Available versions could not be summarized for the package
    SummarizeError,
}

impl UpdateStatus {
    /// Returns the canonical display string
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Planned => "Planned",
            UpdateStatus::Updated => "Updated",
            UpdateStatus::Failed => "Failed",
            UpdateStatus::UpToDate => "UpToDate",
            UpdateStatus::NotConfigured => "NotConfigured",
            UpdateStatus::Floating => "Floating",
            UpdateStatus::ConfigError => "ConfigError",
            UpdateStatus::SummarizeError => "SummarizeError",
        }
    }

    /// Returns true if the plan should be skipped without patching
    pub fn should_skip_update(&self) -> bool {
        matches!(
            self,
            UpdateStatus::UpToDate
                | UpdateStatus::NotConfigured
                | UpdateStatus::Floating
                | UpdateStatus::ConfigError
                | UpdateStatus::SummarizeError
        )
    }

    /// Returns true if the package should be reported to the unsupported tracker
    pub fn should_track_unsupported(&self) -> bool {
        matches!(self, UpdateStatus::NotConfigured | UpdateStatus::Floating)
    }

    /// Returns true if a group failure may overwrite this status.
    ///
    /// NotConfigured, ConfigError and SummarizeError describe why a plan
    /// never entered execution; a later group error must not mask them.
    pub fn can_fail_with_group(&self) -> bool {
        !matches!(
            self,
            UpdateStatus::NotConfigured | UpdateStatus::ConfigError | UpdateStatus::SummarizeError
        )
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", UpdateStatus::Updated), "Updated");
        assert_eq!(format!("{}", UpdateStatus::NotConfigured), "NotConfigured");
    }

    #[test]
    fn test_should_skip_update() {
        assert!(UpdateStatus::Floating.should_skip_update());
        assert!(UpdateStatus::NotConfigured.should_skip_update());
        assert!(UpdateStatus::UpToDate.should_skip_update());
        assert!(!UpdateStatus::Planned.should_skip_update());
        assert!(!UpdateStatus::Failed.should_skip_update());
    }

    #[test]
    fn test_should_track_unsupported() {
        assert!(UpdateStatus::NotConfigured.should_track_unsupported());
        assert!(UpdateStatus::Floating.should_track_unsupported());
        assert!(!UpdateStatus::Planned.should_track_unsupported());
        assert!(!UpdateStatus::Failed.should_track_unsupported());
    }

    #[test]
    fn test_can_fail_with_group() {
        assert!(UpdateStatus::Planned.can_fail_with_group());
        assert!(UpdateStatus::Updated.can_fail_with_group());
        assert!(UpdateStatus::Floating.can_fail_with_group());
        assert!(!UpdateStatus::NotConfigured.can_fail_with_group());
        assert!(!UpdateStatus::ConfigError.can_fail_with_group());
        assert!(!UpdateStatus::SummarizeError.can_fail_with_group());
    }
}
