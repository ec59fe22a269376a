//! Transactional update engine
//!
//! This module provides:
//! - Atomic file I/O with permission and ownership preservation
//! - Multi-file backup and forced restore for rollback
//! - The single-package patch → lock → rollback flow
//! - Grouped orchestration with one shared lock command per group
//! - Drift validation against live package state

pub mod atomic;
pub mod backup;
mod context;
mod drift;
mod group;
mod plan;
mod single;

pub use atomic::{
    atomic_write, write_file_preserving_permissions, write_file_with_mode, FilePermissions,
    DEFAULT_FILE_MODE,
};
pub use backup::{backup_files, lock_file_paths, restore_backups, FileBackup};
pub use context::{
    ExecutionCallbacks, PackageUpdater, ProgressReporter, ReloadFn, SystemTestFailure,
    UnsupportedTracker, UpdateContext,
};
pub use drift::{rollback_plans, validate_pre_update_state, verify_rollback_drift, versions_match};
pub use group::{process_grouped_plans, summarize_group_failure};
pub use plan::{resolve_plans, sort_plans};
pub use single::{run_group_lock_command, update_declared_version, update_package, ManifestUpdater};
