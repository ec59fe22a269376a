//! Shared state and boundaries for update orchestration
//!
//! This module provides:
//! - PackageUpdater: the uniform boundary used for forward updates and
//!   rollback (rollback re-invokes it with the original version)
//! - UnsupportedTracker: caller-provided sink for packages that cannot
//!   be updated
//! - ProgressReporter: counter incremented once per processed plan
//! - ExecutionCallbacks: result-ready and system-test-failure hooks
//! - UpdateContext: per-invocation configuration, flags and accumulated
//!   failures, threaded through the orchestrator

use crate::config::Config;
use crate::domain::{Package, UpdateResult};
use crate::error::UpdateError;
use crate::exec::CommandExecutor;
use crate::systemtest::{SystemTestResult, SystemTestRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Updates one package to a target version.
///
/// The same boundary serves forward updates and rollback; rollback calls
/// it with the plan's original version as the target. Closures with the
/// matching signature implement the trait, which keeps orchestrator tests
/// free of real file and process work.
pub trait PackageUpdater: Send + Sync {
    fn update(
        &self,
        package: &Package,
        target: &str,
        cfg: &Config,
        work_dir: &Path,
        dry_run: bool,
        skip_lock: bool,
    ) -> Result<(), UpdateError>;
}

impl<F> PackageUpdater for F
where
    F: Fn(&Package, &str, &Config, &Path, bool, bool) -> Result<(), UpdateError> + Send + Sync,
{
    fn update(
        &self,
        package: &Package,
        target: &str,
        cfg: &Config,
        work_dir: &Path,
        dry_run: bool,
        skip_lock: bool,
    ) -> Result<(), UpdateError> {
        self(package, target, cfg, work_dir, dry_run, skip_lock)
    }
}

/// Re-reads live package state for drift detection.
///
/// Absence is tolerated everywhere: drift checks silently pass when no
/// reload function is configured.
pub type ReloadFn<'a> = Box<dyn Fn() -> anyhow::Result<Vec<Package>> + Send + Sync + 'a>;

/// Records packages that cannot be updated, with a human-readable reason
pub trait UnsupportedTracker {
    fn add(&mut self, package: &Package, reason: String);
}

/// Counter incremented exactly once per processed plan
pub trait ProgressReporter {
    fn increment(&self);
}

/// A recorded system test failure for later display
#[derive(Debug, Clone)]
pub struct SystemTestFailure {
    /// Package name, or "group" for group-scoped test runs
    pub pkg_name: String,
    /// True when the failure vetoed the update
    pub is_critical: bool,
    /// Full suite result including captured output
    pub result: SystemTestResult,
}

/// Callbacks invoked during plan execution
#[derive(Default)]
pub struct ExecutionCallbacks<'cb> {
    /// Called once per terminal plan result
    pub on_result_ready: Option<Box<dyn FnMut(&UpdateResult, bool) + 'cb>>,
    /// Called for each recorded system test failure
    pub on_system_test_failure: Option<Box<dyn FnMut(&SystemTestFailure) + 'cb>>,
    /// Derives the reason string reported to the unsupported tracker
    pub derive_unsupported_reason: Option<Box<dyn Fn(&Package, Option<&UpdateError>) -> String + 'cb>>,
}

impl<'cb> ExecutionCallbacks<'cb> {
    /// Creates callbacks with no hooks installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Invokes the result-ready hook, if installed
    pub fn result_ready(&mut self, result: &UpdateResult, dry_run: bool) {
        if let Some(hook) = self.on_result_ready.as_mut() {
            hook(result, dry_run);
        }
    }

    /// Invokes the system-test-failure hook, if installed
    pub fn system_test_failure(&mut self, failure: &SystemTestFailure) {
        if let Some(hook) = self.on_system_test_failure.as_mut() {
            hook(failure);
        }
    }

    /// Derives the unsupported reason for a package
    pub fn unsupported_reason(&self, package: &Package, error: Option<&UpdateError>) -> String {
        match self.derive_unsupported_reason.as_ref() {
            Some(derive) => derive(package, error),
            None => error
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("no update configuration for {}", package.rule)),
        }
    }
}

/// Per-invocation state threaded through update orchestration
pub struct UpdateContext<'a> {
    /// Loaded configuration
    pub cfg: &'a Config,
    /// Base directory updates execute from
    pub work_dir: PathBuf,

    /// Plan and report changes without touching files or running commands
    pub dry_run: bool,
    /// Keep processing remaining plans after a failure
    pub continue_on_error: bool,
    /// Patch manifests without running lock commands
    pub skip_lock: bool,
    /// Skip the configured system test suite
    pub skip_system_tests: bool,

    /// Boundary used for forward updates and rollback
    pub updater: Arc<dyn PackageUpdater>,
    /// Executor used for group-level lock commands
    pub executor: Arc<dyn CommandExecutor>,
    /// Live-state reload for drift detection
    pub reload: Option<ReloadFn<'a>>,
    /// Configured system test runner
    pub system_tests: Option<SystemTestRunner>,
    /// Sink for packages that cannot be updated
    pub unsupported: Option<&'a mut dyn UnsupportedTracker>,

    /// Failures accumulated across the invocation
    pub failures: Vec<String>,
}

impl<'a> UpdateContext<'a> {
    /// Creates a context with default flags
    pub fn new(
        cfg: &'a Config,
        work_dir: impl Into<PathBuf>,
        updater: Arc<dyn PackageUpdater>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            cfg,
            work_dir: work_dir.into(),
            dry_run: false,
            continue_on_error: false,
            skip_lock: false,
            skip_system_tests: false,
            updater,
            executor,
            reload: None,
            system_tests: None,
            unsupported: None,
            failures: Vec::new(),
        }
    }

    /// Sets the execution flags (builder pattern)
    pub fn with_flags(mut self, dry_run: bool, continue_on_error: bool, skip_lock: bool) -> Self {
        self.dry_run = dry_run;
        self.continue_on_error = continue_on_error;
        self.skip_lock = skip_lock;
        self
    }

    /// Sets the reload function (builder pattern)
    pub fn with_reload(mut self, reload: ReloadFn<'a>) -> Self {
        self.reload = Some(reload);
        self
    }

    /// Sets the system test runner (builder pattern)
    pub fn with_system_tests(mut self, runner: SystemTestRunner) -> Self {
        self.system_tests = Some(runner);
        self
    }

    /// Sets the skip-system-tests flag (builder pattern)
    pub fn with_skip_system_tests(mut self, skip: bool) -> Self {
        self.skip_system_tests = skip;
        self
    }

    /// Sets the unsupported tracker (builder pattern)
    pub fn with_unsupported_tracker(mut self, tracker: &'a mut dyn UnsupportedTracker) -> Self {
        self.unsupported = Some(tracker);
        self
    }

    /// Records a failure for end-of-run reporting
    pub fn append_failure(&mut self, message: impl Into<String>) {
        self.failures.push(message.into());
    }

    /// Reports a package to the unsupported tracker, if one is configured
    pub fn track_unsupported(&mut self, package: &Package, reason: String) {
        if let Some(tracker) = self.unsupported.as_mut() {
            tracker.add(package, reason);
        }
    }

    /// Returns true when system tests should run after each package or group
    pub fn should_run_system_tests_after_each(&self) -> bool {
        !self.skip_system_tests
            && self
                .system_tests
                .as_ref()
                .is_some_and(|runner| runner.should_run_after_each())
    }
}
