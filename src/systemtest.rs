//! System test execution for gating updates
//!
//! Runs the caller-configured test suite through the injected command
//! executor and classifies failures: a failing test without
//! `continue_on_fail` is critical and (when the suite stops on failure)
//! vetoes the update; other failures are advisory and only recorded.

use crate::config::{SystemTestConfig, SystemTestRunMode, SystemTestsConfig};
use crate::exec::CommandExecutor;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default per-test timeout (5 minutes)
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Phase label for tests run after each package or group update
pub const PHASE_AFTER_EACH: &str = "after_each";

/// Phase label for tests run once after all updates
pub const PHASE_AFTER_ALL: &str = "after_all";

/// Outcome of a single system test
#[derive(Debug, Clone)]
pub struct TestOutcome {
    /// Configured test name
    pub name: String,
    /// Whether the test commands exited successfully
    pub passed: bool,
    /// Wall-clock duration of the test
    pub duration: Duration,
    /// Captured stdout of the test commands
    pub output: String,
    /// Failure message when the test did not pass
    pub error: Option<String>,
    /// A failure of this test is advisory rather than fatal
    pub continue_on_fail: bool,
}

/// Aggregate result of one suite execution
#[derive(Debug, Clone, Default)]
pub struct SystemTestResult {
    /// Phase the suite ran in
    pub phase: String,
    /// Per-test outcomes in execution order
    pub tests: Vec<TestOutcome>,
    /// Total wall-clock duration of the suite
    pub total_duration: Duration,
}

impl SystemTestResult {
    /// Returns true when every test passed
    pub fn passed(&self) -> bool {
        self.tests.iter().all(|t| t.passed)
    }

    /// Returns the number of passing tests
    pub fn passed_count(&self) -> usize {
        self.tests.iter().filter(|t| t.passed).count()
    }

    /// Returns true when a test without continue_on_fail failed
    pub fn has_critical_failure(&self) -> bool {
        self.tests.iter().any(|t| !t.passed && !t.continue_on_fail)
    }

    /// Returns a one-line pass/fail summary
    pub fn summary(&self) -> String {
        format!("{}/{} tests passed", self.passed_count(), self.tests.len())
    }

    /// Formats failed tests for compact display
    pub fn format_failures(&self) -> String {
        let mut out = String::new();
        for test in self.tests.iter().filter(|t| !t.passed) {
            let _ = writeln!(
                out,
                "  {} ({:.1?}): {}",
                test.name,
                test.duration,
                test.error.as_deref().unwrap_or("failed")
            );
        }
        out
    }
}

/// Executes configured system tests
pub struct SystemTestRunner {
    cfg: Option<SystemTestsConfig>,
    work_dir: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    no_timeout: bool,
}

impl SystemTestRunner {
    /// Creates a runner for the given configuration and working directory
    pub fn new(
        cfg: Option<SystemTestsConfig>,
        work_dir: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            cfg,
            work_dir: work_dir.into(),
            executor,
            no_timeout: false,
        }
    }

    /// Disables timeout enforcement for all tests (builder pattern)
    pub fn with_no_timeout(mut self, no_timeout: bool) -> Self {
        self.no_timeout = no_timeout;
        self
    }

    /// Returns true when at least one test is configured
    pub fn has_tests(&self) -> bool {
        self.cfg.as_ref().is_some_and(|c| !c.tests.is_empty())
    }

    /// Returns true when a critical failure should veto the update
    pub fn stop_on_fail(&self) -> bool {
        self.cfg.as_ref().map_or(true, |c| c.is_stop_on_fail())
    }

    /// Returns true when the suite runs after each package or group update
    pub fn should_run_after_each(&self) -> bool {
        self.has_tests()
            && self
                .cfg
                .as_ref()
                .is_some_and(|c| c.effective_run_mode() == SystemTestRunMode::AfterEach)
    }

    /// Returns true when the suite runs once after all updates
    pub fn should_run_after_all(&self) -> bool {
        self.has_tests()
            && self
                .cfg
                .as_ref()
                .is_some_and(|c| c.effective_run_mode() == SystemTestRunMode::AfterAll)
    }

    /// Runs the suite after a package or group update
    pub fn run_after_update(&self) -> SystemTestResult {
        self.run_tests(PHASE_AFTER_EACH)
    }

    /// Runs the suite as final validation after all updates
    pub fn run_validation(&self) -> SystemTestResult {
        self.run_tests(PHASE_AFTER_ALL)
    }

    fn run_tests(&self, phase: &str) -> SystemTestResult {
        let mut result = SystemTestResult {
            phase: phase.to_string(),
            ..Default::default()
        };
        let Some(cfg) = &self.cfg else {
            return result;
        };

        let start = Instant::now();
        for test in &cfg.tests {
            let outcome = self.run_single_test(test);
            if outcome.passed {
                tracing::debug!(test = %outcome.name, duration = ?outcome.duration, "system test passed");
            } else {
                tracing::warn!(
                    test = %outcome.name,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "system test failed"
                );
            }
            result.tests.push(outcome);
        }
        result.total_duration = start.elapsed();
        result
    }

    fn run_single_test(&self, test: &SystemTestConfig) -> TestOutcome {
        let mut timeout = test.timeout_seconds;
        if timeout == 0 {
            timeout = DEFAULT_TIMEOUT_SECONDS;
        }
        if self.no_timeout {
            timeout = 0;
        }

        let start = Instant::now();
        let execution = self.executor.execute(
            &test.commands,
            &test.env,
            Path::new(&self.work_dir),
            timeout,
            &HashMap::new(),
        );
        let duration = start.elapsed();

        match execution {
            Ok(output) => TestOutcome {
                name: test.name.clone(),
                passed: true,
                duration,
                output: String::from_utf8_lossy(&output).to_string(),
                error: None,
                continue_on_fail: test.continue_on_fail,
            },
            Err(err) => TestOutcome {
                name: test.name.clone(),
                passed: false,
                duration,
                output: String::new(),
                error: Some(format!("{}: {}", test.name, err)),
                continue_on_fail: test.continue_on_fail,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn suite(tests: Vec<SystemTestConfig>) -> SystemTestsConfig {
        SystemTestsConfig {
            tests,
            stop_on_fail: None,
            run_mode: None,
        }
    }

    fn test_cfg(name: &str, continue_on_fail: bool) -> SystemTestConfig {
        SystemTestConfig {
            name: name.to_string(),
            commands: name.to_string(),
            continue_on_fail,
            ..Default::default()
        }
    }

    fn failing_executor() -> Arc<dyn CommandExecutor> {
        Arc::new(
            |_c: &str,
             _e: &BTreeMap<String, String>,
             _d: &Path,
             _t: u64,
             _r: &HashMap<String, String>| {
                Err::<Vec<u8>, _>(ExecError::CommandFailed {
                    message: "boom".to_string(),
                })
            },
        )
    }

    fn passing_executor() -> Arc<dyn CommandExecutor> {
        Arc::new(
            |_c: &str,
             _e: &BTreeMap<String, String>,
             _d: &Path,
             _t: u64,
             _r: &HashMap<String, String>| { Ok::<_, ExecError>(b"ok".to_vec()) },
        )
    }

    #[test]
    fn test_runner_without_config() {
        let runner = SystemTestRunner::new(None, ".", passing_executor());
        assert!(!runner.has_tests());
        assert!(runner.stop_on_fail());
        assert!(!runner.should_run_after_each());
        assert!(runner.run_after_update().tests.is_empty());
    }

    #[test]
    fn test_run_after_update_collects_outcomes() {
        let cfg = suite(vec![test_cfg("lint", false), test_cfg("unit", false)]);
        let runner = SystemTestRunner::new(Some(cfg), ".", passing_executor());
        let result = runner.run_after_update();
        assert_eq!(result.phase, PHASE_AFTER_EACH);
        assert_eq!(result.tests.len(), 2);
        assert!(result.passed());
        assert_eq!(result.passed_count(), 2);
        assert!(!result.has_critical_failure());
    }

    #[test]
    fn test_failed_test_is_critical_without_continue_on_fail() {
        let cfg = suite(vec![test_cfg("unit", false)]);
        let runner = SystemTestRunner::new(Some(cfg), ".", failing_executor());
        let result = runner.run_after_update();
        assert!(!result.passed());
        assert!(result.has_critical_failure());
        assert!(result.tests[0].error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn test_failed_test_with_continue_on_fail_is_advisory() {
        let cfg = suite(vec![test_cfg("flaky", true)]);
        let runner = SystemTestRunner::new(Some(cfg), ".", failing_executor());
        let result = runner.run_after_update();
        assert!(!result.passed());
        assert!(!result.has_critical_failure());
    }

    #[test]
    fn test_summary_and_failure_formatting() {
        let cfg = suite(vec![test_cfg("unit", false), test_cfg("lint", true)]);
        let runner = SystemTestRunner::new(Some(cfg), ".", failing_executor());
        let result = runner.run_after_update();
        assert_eq!(result.summary(), "0/2 tests passed");
        let failures = result.format_failures();
        assert!(failures.contains("unit"));
        assert!(failures.contains("lint"));
    }

    #[test]
    fn test_run_mode_selection() {
        let mut cfg = suite(vec![test_cfg("unit", false)]);
        cfg.run_mode = Some(SystemTestRunMode::AfterAll);
        let runner = SystemTestRunner::new(Some(cfg), ".", passing_executor());
        assert!(!runner.should_run_after_each());
        assert!(runner.should_run_after_all());
        assert_eq!(runner.run_validation().phase, PHASE_AFTER_ALL);
    }

    #[test]
    fn test_default_timeout_applied() {
        static SEEN_TIMEOUT: AtomicUsize = AtomicUsize::new(0);
        let executor = Arc::new(
            |_c: &str,
             _e: &BTreeMap<String, String>,
             _d: &Path,
             timeout: u64,
             _r: &HashMap<String, String>| {
                SEEN_TIMEOUT.store(timeout as usize, Ordering::SeqCst);
                Ok::<_, ExecError>(Vec::new())
            },
        );
        let cfg = suite(vec![test_cfg("unit", false)]);
        let runner = SystemTestRunner::new(Some(cfg), ".", executor);
        runner.run_after_update();
        assert_eq!(
            SEEN_TIMEOUT.load(Ordering::SeqCst),
            DEFAULT_TIMEOUT_SECONDS as usize
        );
    }

    #[test]
    fn test_no_timeout_overrides_test_timeout() {
        static SEEN_TIMEOUT: AtomicUsize = AtomicUsize::new(99);
        let executor = Arc::new(
            |_c: &str,
             _e: &BTreeMap<String, String>,
             _d: &Path,
             timeout: u64,
             _r: &HashMap<String, String>| {
                SEEN_TIMEOUT.store(timeout as usize, Ordering::SeqCst);
                Ok::<_, ExecError>(Vec::new())
            },
        );
        let mut test = test_cfg("unit", false);
        test.timeout_seconds = 42;
        let runner =
            SystemTestRunner::new(Some(suite(vec![test])), ".", executor).with_no_timeout(true);
        runner.run_after_update();
        assert_eq!(SEEN_TIMEOUT.load(Ordering::SeqCst), 0);
    }
}
