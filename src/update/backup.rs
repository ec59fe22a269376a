//! Multi-file snapshot and restore for rollback
//!
//! Backups use all-or-nothing semantics: either every existing path is
//! captured, or the call fails with zero backups, so rollback is never
//! attempted against an incomplete set. Missing paths are silently
//! skipped. Restore is forced: each snapshot's content and mode are
//! written back regardless of the file's current state, and per-file
//! errors are accumulated rather than aborting the remaining restores.

use crate::config::RuleConfig;
use crate::error::UpdateError;
use crate::update::atomic::{write_file_with_mode, FilePermissions, DEFAULT_FILE_MODE};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of one file taken before mutation
#[derive(Debug, Clone)]
pub struct FileBackup {
    /// Path the snapshot restores to
    pub path: PathBuf,
    /// Full file content at capture time
    pub content: Vec<u8>,
    /// Permission bits at capture time
    pub mode: u32,
}

/// Reads and stores the content of files for potential rollback.
///
/// Missing paths are skipped. Any existing-but-unreadable path aborts the
/// whole call without partial state.
pub fn backup_files(paths: &[PathBuf]) -> Result<Vec<FileBackup>, UpdateError> {
    let mut backups = Vec::with_capacity(paths.len());

    for path in paths {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(UpdateError::io(
                    "failed to back up (atomic backup aborted)",
                    path,
                    e,
                ))
            }
        };

        let mode = match FilePermissions::capture(path) {
            Ok(permissions) => permissions.mode,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "unable to stat file for backup, using default permissions"
                );
                DEFAULT_FILE_MODE
            }
        };

        backups.push(FileBackup {
            path: path.clone(),
            content,
            mode,
        });
    }

    Ok(backups)
}

/// Restores files from their backups after a failed update.
///
/// Returns every restore error; an empty vector means all snapshots were
/// written back successfully.
pub fn restore_backups(backups: &[FileBackup]) -> Vec<UpdateError> {
    let mut errors = Vec::new();
    for backup in backups {
        match write_file_with_mode(&backup.path, &backup.content, backup.mode) {
            Ok(()) => {
                tracing::debug!(path = %backup.path.display(), "restored from backup");
            }
            Err(e) => {
                errors.push(UpdateError::execution(format!(
                    "failed to restore {}: {}",
                    backup.path.display(),
                    e
                )));
            }
        }
    }
    errors
}

/// Expands the rule's lock-file glob patterns relative to the scope directory
pub fn lock_file_paths(rule: &RuleConfig, scope_dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for lock_cfg in &rule.lock_files {
        for pattern in &lock_cfg.files {
            let full_pattern = scope_dir.join(pattern);
            let Some(pattern_str) = full_pattern.to_str() else {
                continue;
            };
            if let Ok(matches) = glob::glob(pattern_str) {
                paths.extend(matches.flatten());
            }
        }
    }
    paths
}
