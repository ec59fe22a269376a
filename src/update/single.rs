//! Single-package update flow
//!
//! The flow for one package: resolve the effective update configuration,
//! read the manifest into memory, snapshot lock files, patch the declared
//! version through the format registry, write atomically preserving
//! permissions, run the lock command, and on lock failure restore the
//! manifest and lock files before returning the original lock error.
//! Rollback failures are logged, never allowed to mask the trigger.

use crate::config::{resolve_update_config, Config, RuleConfig, UpdateCommandConfig};
use crate::domain::Package;
use crate::error::UpdateError;
use crate::exec::{build_replacements, CommandExecutor};
use crate::formats::FormatRegistry;
use crate::update::atomic::{
    capture_mtime, write_file_preserving_permissions, DEFAULT_FILE_MODE,
};
use crate::update::backup::{backup_files, lock_file_paths, restore_backups};
use crate::update::context::PackageUpdater;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Production implementation of the package updater boundary.
///
/// Holds the format registry and command executor; the same instance is
/// reused for forward updates and rollback.
pub struct ManifestUpdater {
    registry: Arc<FormatRegistry>,
    executor: Arc<dyn CommandExecutor>,
}

impl ManifestUpdater {
    /// Creates an updater over the given registry and executor
    pub fn new(registry: Arc<FormatRegistry>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { registry, executor }
    }
}

impl PackageUpdater for ManifestUpdater {
    fn update(
        &self,
        package: &Package,
        target: &str,
        cfg: &Config,
        work_dir: &Path,
        dry_run: bool,
        skip_lock: bool,
    ) -> Result<(), UpdateError> {
        update_package(
            &self.registry,
            self.executor.as_ref(),
            package,
            target,
            cfg,
            work_dir,
            dry_run,
            skip_lock,
        )
    }
}

/// Resolves the manifest path against the working directory
fn manifest_path(package: &Package, work_dir: &Path) -> PathBuf {
    if package.source.is_absolute() {
        package.source.clone()
    } else {
        work_dir.join(&package.source)
    }
}

/// Returns the directory lock commands run in and lock globs resolve from
fn scope_dir(manifest: &Path, cfg: &Config, work_dir: &Path) -> PathBuf {
    if let Some(parent) = manifest.parent() {
        if !parent.as_os_str().is_empty() {
            return parent.to_path_buf();
        }
    }
    if let Some(working_dir) = &cfg.working_dir {
        if !working_dir.as_os_str().is_empty() {
            return working_dir.clone();
        }
    }
    if work_dir.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        work_dir.to_path_buf()
    }
}

/// Attempts to update a package to the target version.
///
/// When `dry_run` is set no files are written and no commands run; when
/// `skip_lock` is set the manifest is patched without running the lock
/// command.
#[allow(clippy::too_many_arguments)]
pub fn update_package(
    registry: &FormatRegistry,
    executor: &dyn CommandExecutor,
    package: &Package,
    target: &str,
    cfg: &Config,
    work_dir: &Path,
    dry_run: bool,
    skip_lock: bool,
) -> Result<(), UpdateError> {
    let effective = resolve_update_config(package, cfg)?;
    let rule = cfg.rules.get(&package.rule).ok_or(UpdateError::MissingRule {
        rule: package.rule.clone(),
    })?;

    let manifest = manifest_path(package, work_dir);
    let scope = scope_dir(&manifest, cfg, work_dir);

    // Kept in memory for rollback
    let original_content = fs::read(&manifest)
        .map_err(|e| UpdateError::io("failed to read", &manifest, e))?;

    let mut lock_backups = Vec::new();
    if !dry_run && !skip_lock {
        let paths = lock_file_paths(rule, &scope);
        if !paths.is_empty() {
            match backup_files(&paths) {
                Ok(backups) => {
                    tracing::debug!(count = backups.len(), "backed up lock files for rollback");
                    lock_backups = backups;
                }
                Err(e) => {
                    // The in-memory manifest backup still allows a partial rollback
                    tracing::warn!(error = %e, "failed to back up lock files");
                }
            }
        }
    }

    let with_all_deps = rule.should_update_with_all_dependencies(&package.name);

    tracing::debug!(
        package = %package.name,
        from = %package.version,
        to = %target,
        source = %manifest.display(),
        "updating declared version"
    );
    update_declared_version(registry, package, &manifest, rule, target, dry_run)?;

    if dry_run || skip_lock {
        return Ok(());
    }

    if let Err(lock_err) = run_lock_command(
        executor,
        &effective,
        package,
        target,
        &scope,
        with_all_deps,
    ) {
        tracing::debug!(package = %package.name, error = %lock_err, "lock command failed, rolling back");
        if let Err(restore_err) =
            write_file_preserving_permissions(&manifest, &original_content, DEFAULT_FILE_MODE)
        {
            tracing::warn!(
                path = %manifest.display(),
                error = %restore_err,
                "manifest restore failed during rollback"
            );
        }
        for err in restore_backups(&lock_backups) {
            tracing::warn!(error = %err, "lock file restore failed during rollback");
        }
        return Err(lock_err);
    }

    Ok(())
}

/// Patches the declared version in the manifest file via the registry.
///
/// Preserves a trailing newline if the original content had one and warns
/// when the file changed on disk between read and write (detection only;
/// last writer wins).
pub fn update_declared_version(
    registry: &FormatRegistry,
    package: &Package,
    manifest: &Path,
    rule: &RuleConfig,
    target: &str,
    dry_run: bool,
) -> Result<(), UpdateError> {
    let read_mtime = capture_mtime(manifest);

    let content =
        fs::read(manifest).map_err(|e| UpdateError::io("failed to read", manifest, e))?;

    let updater = registry.updater_for(&rule.format)?;
    let mut updated = updater.update_version(&content, package, rule, target)?;

    if content.last() == Some(&b'\n') && updated.last() != Some(&b'\n') {
        updated.push(b'\n');
    }

    if dry_run {
        return Ok(());
    }

    if let (Some(before), Some(now)) = (read_mtime, capture_mtime(manifest)) {
        if before != now {
            tracing::warn!(
                path = %manifest.display(),
                "file was modified by another process during update"
            );
        }
    }

    write_file_preserving_permissions(manifest, &updated, DEFAULT_FILE_MODE)
}

/// Runs the lock command for a single package
fn run_lock_command(
    executor: &dyn CommandExecutor,
    effective: &UpdateCommandConfig,
    package: &Package,
    version: &str,
    scope: &Path,
    with_all_deps: bool,
) -> Result<(), UpdateError> {
    if effective.commands.trim().is_empty() {
        return Err(UpdateError::unsupported(format!(
            "lock update missing for {}",
            package.rule
        )));
    }

    let replacements =
        build_replacements(&package.name, version, &package.constraint, with_all_deps);
    tracing::debug!(package = %package.name, dir = %scope.display(), "running lock command");
    executor.execute(
        &effective.commands,
        &effective.env,
        scope,
        effective.timeout_seconds,
        &replacements,
    )?;
    Ok(())
}

/// Runs the lock command once for a group of packages.
///
/// Package-specific placeholders substitute to empty strings; the
/// with-all-dependencies flag is the group-wide OR across members.
pub fn run_group_lock_command(
    executor: &dyn CommandExecutor,
    cfg: &UpdateCommandConfig,
    work_dir: &Path,
    with_all_deps: bool,
) -> Result<(), UpdateError> {
    if cfg.commands.trim().is_empty() {
        return Err(UpdateError::unsupported("no lock command configured"));
    }

    tracing::debug!(with_all_deps, "running group lock command");
    let replacements = build_replacements("", "", "", with_all_deps);
    executor.execute(
        &cfg.commands,
        &cfg.env,
        work_dir,
        cfg.timeout_seconds,
        &replacements,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
  "dependencies": {
    "lodash": "^4.17.21"
  }
}"#;

    fn npm_config() -> Config {
        let mut cfg = Config::default();
        let mut rule = RuleConfig {
            manager: "npm".to_string(),
            format: "json".to_string(),
            ..Default::default()
        };
        rule.fields
            .insert("dependencies".to_string(), "prod".to_string());
        rule.lock_files = vec![crate::config::LockFileConfig {
            files: vec!["package-lock.json".to_string()],
        }];
        rule.update = Some(UpdateCommandConfig {
            commands: "npm install {{package}}@{{version}}".to_string(),
            ..Default::default()
        });
        cfg.rules.insert("npm".to_string(), rule);
        cfg
    }

    fn npm_package(dir: &TempDir) -> Package {
        Package::new(
            "lodash",
            "4.17.21",
            "npm",
            dir.path().join("package.json"),
        )
        .with_constraint("^")
        .with_package_type("npm")
    }

    fn write_project(dir: &TempDir) {
        fs::write(dir.path().join("package.json"), MANIFEST).unwrap();
        fs::write(dir.path().join("package-lock.json"), "{\"old\": true}").unwrap();
    }

    fn ok_executor(counter: &'static AtomicUsize) -> Arc<dyn CommandExecutor> {
        Arc::new(
            move |_c: &str,
                  _e: &BTreeMap<String, String>,
                  _d: &Path,
                  _t: u64,
                  _r: &HashMap<String, String>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ExecError>(Vec::new())
            },
        )
    }

    fn failing_executor() -> Arc<dyn CommandExecutor> {
        Arc::new(
            |_c: &str,
             _e: &BTreeMap<String, String>,
             _d: &Path,
             _t: u64,
             _r: &HashMap<String, String>| {
                Err::<Vec<u8>, _>(ExecError::CommandFailed {
                    message: "lock exploded".to_string(),
                })
            },
        )
    }

    #[test]
    fn test_update_package_patches_and_locks() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let dir = TempDir::new().unwrap();
        write_project(&dir);
        let cfg = npm_config();
        let registry = FormatRegistry::new();
        let executor = ok_executor(&CALLS);

        update_package(
            &registry,
            executor.as_ref(),
            &npm_package(&dir),
            "4.18.0",
            &cfg,
            dir.path(),
            false,
            false,
        )
        .unwrap();

        let content = fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert!(content.contains("^4.18.0"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_package_preserves_trailing_newline() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), format!("{}\n", MANIFEST)).unwrap();
        let cfg = npm_config();
        let registry = FormatRegistry::new();

        update_package(
            &registry,
            ok_executor(&CALLS).as_ref(),
            &npm_package(&dir),
            "4.18.0",
            &cfg,
            dir.path(),
            false,
            true,
        )
        .unwrap();

        let content = fs::read(dir.path().join("package.json")).unwrap();
        assert_eq!(content.last(), Some(&b'\n'));
    }

    #[test]
    fn test_update_package_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        write_project(&dir);
        let cfg = npm_config();
        let registry = FormatRegistry::new();

        update_package(
            &registry,
            failing_executor().as_ref(),
            &npm_package(&dir),
            "4.18.0",
            &cfg,
            dir.path(),
            true,
            false,
        )
        .unwrap();

        let content = fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert_eq!(content, MANIFEST);
    }

    #[test]
    fn test_update_package_skip_lock_runs_no_command() {
        let dir = TempDir::new().unwrap();
        write_project(&dir);
        let cfg = npm_config();
        let registry = FormatRegistry::new();

        // The failing executor proves the lock command never runs
        update_package(
            &registry,
            failing_executor().as_ref(),
            &npm_package(&dir),
            "4.18.0",
            &cfg,
            dir.path(),
            false,
            true,
        )
        .unwrap();

        let content = fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert!(content.contains("^4.18.0"));
    }

    #[test]
    fn test_update_package_rolls_back_on_lock_failure() {
        let dir = TempDir::new().unwrap();
        write_project(&dir);
        let cfg = npm_config();
        let registry = FormatRegistry::new();

        let err = update_package(
            &registry,
            failing_executor().as_ref(),
            &npm_package(&dir),
            "4.18.0",
            &cfg,
            dir.path(),
            false,
            false,
        )
        .unwrap_err();

        assert!(err.to_string().contains("lock exploded"));
        let manifest = fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert_eq!(manifest, MANIFEST);
        let lock = fs::read_to_string(dir.path().join("package-lock.json")).unwrap();
        assert_eq!(lock, "{\"old\": true}");
    }

    #[cfg(unix)]
    #[test]
    fn test_update_package_rollback_preserves_manifest_mode() {
        use std::os::unix::fs::PermissionsExt;

        for mode in [0o600u32, 0o644, 0o700, 0o755, 0o640] {
            let dir = TempDir::new().unwrap();
            write_project(&dir);
            let manifest = dir.path().join("package.json");
            fs::set_permissions(&manifest, fs::Permissions::from_mode(mode)).unwrap();
            let cfg = npm_config();
            let registry = FormatRegistry::new();

            let result = update_package(
                &registry,
                failing_executor().as_ref(),
                &npm_package(&dir),
                "4.18.0",
                &cfg,
                dir.path(),
                false,
                false,
            );
            assert!(result.is_err());

            let current = fs::metadata(&manifest).unwrap().permissions().mode() & 0o777;
            assert_eq!(current, mode, "mode {:o} not restored", mode);
            assert_eq!(fs::read_to_string(&manifest).unwrap(), MANIFEST);
        }
    }

    #[test]
    fn test_update_package_unknown_rule() {
        let dir = TempDir::new().unwrap();
        write_project(&dir);
        let cfg = Config::default();
        let registry = FormatRegistry::new();

        let err = update_package(
            &registry,
            failing_executor().as_ref(),
            &npm_package(&dir),
            "4.18.0",
            &cfg,
            dir.path(),
            false,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, UpdateError::MissingRule { .. }));
    }

    #[test]
    fn test_update_package_missing_update_config_is_unsupported() {
        let dir = TempDir::new().unwrap();
        write_project(&dir);
        let mut cfg = npm_config();
        cfg.rules.get_mut("npm").unwrap().update = None;
        let registry = FormatRegistry::new();

        let err = update_package(
            &registry,
            failing_executor().as_ref(),
            &npm_package(&dir),
            "4.18.0",
            &cfg,
            dir.path(),
            false,
            false,
        )
        .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_update_package_empty_lock_command_is_unsupported() {
        let dir = TempDir::new().unwrap();
        write_project(&dir);
        let mut cfg = npm_config();
        cfg.rules.get_mut("npm").unwrap().update = Some(UpdateCommandConfig::default());
        let registry = FormatRegistry::new();

        let err = update_package(
            &registry,
            failing_executor().as_ref(),
            &npm_package(&dir),
            "4.18.0",
            &cfg,
            dir.path(),
            false,
            false,
        )
        .unwrap_err();
        assert!(err.is_unsupported());
        // The manifest was patched before the lock step was classified
        // unsupported; rollback restored it
        let manifest = fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert_eq!(manifest, MANIFEST);
    }

    #[test]
    fn test_run_group_lock_command_requires_commands() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let err = run_group_lock_command(
            ok_executor(&CALLS).as_ref(),
            &UpdateCommandConfig::default(),
            Path::new("."),
            false,
        )
        .unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_group_lock_command_invokes_executor_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let cfg = UpdateCommandConfig {
            commands: "npm install".to_string(),
            ..Default::default()
        };
        run_group_lock_command(ok_executor(&CALLS).as_ref(), &cfg, Path::new("."), true).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
