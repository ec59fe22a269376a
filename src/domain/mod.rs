//! Core domain types for update operations
//!
//! This module provides:
//! - Package: an immutable observed snapshot of a declared dependency
//! - UpdateStatus: the closed set of terminal and transient plan states
//! - UpdateResult / PlannedUpdate: per-package outcome and rollback state

mod package;
mod plan;
mod status;

pub use package::Package;
pub use plan::{snapshot_versions, PlannedUpdate, UpdateResult, VersionSnapshot};
pub use status::UpdateStatus;
