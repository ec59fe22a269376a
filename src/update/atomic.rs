//! Atomic file writes with permission and ownership preservation
//!
//! Writes go to a sibling temp file (`<name>.<16-hex-random>.tmp`) that is
//! renamed over the target, so readers never observe a partial file. The
//! target's writability is checked before writing because rename is a
//! directory operation and can bypass the target's permission bits on some
//! platforms. Permission and ownership drift after a write is detected and
//! reported as a warning, never as an error.

use crate::error::UpdateError;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Mode used for files that do not exist yet
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Captured permission and ownership state of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePermissions {
    /// Permission bits
    pub mode: u32,
    /// Owning uid/gid; `None` on platforms without POSIX ownership
    pub owner: Option<(u32, u32)>,
}

impl FilePermissions {
    /// Captures the current permissions and ownership of a file
    pub fn capture(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            mode: permission_bits(&metadata),
            owner: file_ownership(&metadata),
        })
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        DEFAULT_FILE_MODE
    }
}

#[cfg(unix)]
fn file_ownership(metadata: &fs::Metadata) -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.uid(), metadata.gid()))
}

#[cfg(not(unix))]
fn file_ownership(_metadata: &fs::Metadata) -> Option<(u32, u32)> {
    None
}

#[cfg(unix)]
fn restore_ownership(path: &Path, owner: (u32, u32)) -> std::io::Result<()> {
    std::os::unix::fs::chown(path, Some(owner.0), Some(owner.1))
}

#[cfg(not(unix))]
fn restore_ownership(_path: &Path, _owner: (u32, u32)) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn is_owner_writable(mode: u32) -> bool {
    mode & 0o200 != 0
}

/// Generates the random suffix for sibling temp files
fn temp_suffix() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(".{}.tmp", hex)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", file_name, temp_suffix()))
}

/// Writes content atomically via a sibling temp file and rename.
///
/// Fails fast with a read-only error when the target exists without
/// owner-write permission. On rename failure the temp file is removed on a
/// best-effort basis and the rename error is returned.
pub fn atomic_write(path: &Path, content: &[u8], mode: u32) -> Result<(), UpdateError> {
    if let Ok(permissions) = FilePermissions::capture(path) {
        if !is_owner_writable(permissions.mode) {
            return Err(UpdateError::ReadOnly {
                path: path.to_path_buf(),
            });
        }
    }

    let temp_path = temp_path_for(path);
    fs::write(&temp_path, content)
        .map_err(|e| UpdateError::io("failed to write temp file", &temp_path, e))?;
    if let Err(e) = set_mode(&temp_path, mode) {
        tracing::warn!(path = %temp_path.display(), error = %e, "unable to set temp file mode");
    }

    if let Err(rename_err) = fs::rename(&temp_path, path) {
        if let Err(cleanup_err) = fs::remove_file(&temp_path) {
            tracing::warn!(
                path = %temp_path.display(),
                error = %cleanup_err,
                "failed to clean up temp file"
            );
        }
        return Err(UpdateError::io(
            "failed to rename temp file over",
            path,
            rename_err,
        ));
    }

    Ok(())
}

/// Writes content atomically while preserving the target's current
/// permissions and ownership. New files receive `default_mode`.
pub fn write_file_preserving_permissions(
    path: &Path,
    content: &[u8],
    default_mode: u32,
) -> Result<(), UpdateError> {
    let original = FilePermissions::capture(path).ok();
    let mode = original.map(|p| p.mode).unwrap_or(default_mode);

    atomic_write(path, content, mode)?;

    if let Some(owner) = original.and_then(|p| p.owner) {
        if let Err(e) = restore_ownership(path, owner) {
            // chown fails for non-privileged processes; the write itself succeeded
            tracing::warn!(path = %path.display(), error = %e, "unable to preserve file ownership");
        }
    }

    verify_permissions(path, original);
    Ok(())
}

/// Writes content atomically with a forced mode, for restoring backups.
pub fn write_file_with_mode(path: &Path, content: &[u8], mode: u32) -> Result<(), UpdateError> {
    let original = FilePermissions::capture(path).ok();

    atomic_write(path, content, mode)?;
    if let Err(e) = set_mode(path, mode) {
        tracing::warn!(path = %path.display(), error = %e, "unable to restore file mode");
    }

    if let Some(owner) = original.and_then(|p| p.owner) {
        if let Err(e) = restore_ownership(path, owner) {
            tracing::warn!(path = %path.display(), error = %e, "unable to preserve file ownership");
        }
    }
    Ok(())
}

fn verify_permissions(path: &Path, original: Option<FilePermissions>) {
    let Some(original) = original else { return };
    let current = match FilePermissions::capture(path) {
        Ok(current) => current,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unable to verify permissions after write");
            return;
        }
    };

    if current.mode != original.mode {
        tracing::warn!(
            path = %path.display(),
            original = format_args!("{:o}", original.mode),
            current = format_args!("{:o}", current.mode),
            "file permissions changed"
        );
    }
    if let (Some(orig), Some(cur)) = (original.owner, current.owner) {
        if orig != cur {
            tracing::warn!(
                path = %path.display(),
                original = format_args!("{}:{}", orig.0, orig.1),
                current = format_args!("{}:{}", cur.0, cur.1),
                "file ownership changed"
            );
        }
    }
}

/// Returns the file's modification time, if it can be read
pub fn capture_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
