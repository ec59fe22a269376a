//! CLI argument parsing and the update entry point

use crate::config::load_config;
use crate::domain::{Package, UpdateStatus};
use crate::error::UpdateError;
use crate::exec::ShellExecutor;
use crate::formats::FormatRegistry;
use crate::progress::Progress;
use crate::systemtest::SystemTestRunner;
use crate::update::{
    process_grouped_plans, resolve_plans, sort_plans, ExecutionCallbacks, ManifestUpdater,
    UnsupportedTracker, UpdateContext,
};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

/// Exit code when every attempted update succeeded
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when some updates succeeded and some failed
pub const EXIT_PARTIAL_FAILURE: i32 = 1;
/// Exit code when all attempted updates failed or a fatal error occurred
pub const EXIT_FAILURE: i32 = 2;

/// Transactional dependency updater
#[derive(Parser, Debug, Clone)]
#[command(
    name = "uplock",
    version,
    about = "Patch manifest versions, regenerate lock files, roll back on failure"
)]
pub struct CliArgs {
    /// Packages to update as name@current=target specs
    /// (e.g. lodash@^4.17.21=4.18.0)
    #[arg(required = true)]
    pub packages: Vec<String>,

    /// Rule id from the configuration governing these packages
    #[arg(short, long)]
    pub rule: String,

    /// Manifest file the packages are declared in
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Configuration file path
    #[arg(short, long, default_value = "uplock.yaml")]
    pub config: PathBuf,

    /// Working directory updates execute from
    #[arg(short = 'C', long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Show what would be updated without making changes
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Keep processing remaining packages after a failure
    #[arg(long)]
    pub continue_on_error: bool,

    /// Patch manifests without running lock commands
    #[arg(long)]
    pub skip_lock: bool,

    /// Skip the configured system test suite
    #[arg(long)]
    pub skip_system_tests: bool,

    /// Disable command timeouts
    #[arg(long)]
    pub no_timeout: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(long)]
    pub verbose: bool,
}

/// A parsed name@current=target spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub constraint: String,
    pub current: String,
    pub target: String,
}

/// Parses a package spec of the form `name@current=target`, where the
/// current version may carry a constraint prefix (`lodash@^4.17.21=4.18.0`)
pub fn parse_package_spec(spec: &str) -> Result<PackageSpec, String> {
    let (name, versions) = spec
        .rsplit_once('@')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("invalid package spec '{spec}': expected name@current=target"))?;

    let (current_spec, target) = versions
        .split_once('=')
        .ok_or_else(|| format!("invalid package spec '{spec}': missing '=target'"))?;

    if current_spec.is_empty() || target.is_empty() {
        return Err(format!(
            "invalid package spec '{spec}': current and target versions are required"
        ));
    }

    let split = current_spec
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(current_spec.len());
    let (constraint, current) = current_spec.split_at(split);

    Ok(PackageSpec {
        name: name.to_string(),
        constraint: constraint.to_string(),
        current: current.to_string(),
        target: target.to_string(),
    })
}

/// Collects unsupported packages for end-of-run display
#[derive(Default)]
struct UnsupportedReport {
    entries: Vec<(String, String)>,
}

impl UnsupportedTracker for UnsupportedReport {
    fn add(&mut self, package: &Package, reason: String) {
        self.entries.push((package.name.clone(), reason));
    }
}

fn status_label(status: UpdateStatus) -> String {
    let label = status.to_string();
    match status {
        UpdateStatus::Updated => label.green().to_string(),
        UpdateStatus::Failed | UpdateStatus::ConfigError => label.red().to_string(),
        UpdateStatus::Planned => label.yellow().to_string(),
        _ => label.dimmed().to_string(),
    }
}

/// Runs the update flow and returns the process exit code
pub fn run(args: CliArgs) -> anyhow::Result<i32> {
    let mut cfg = load_config(&args.config)?;
    if args.no_timeout {
        for rule in cfg.rules.values_mut() {
            if let Some(update) = rule.update.as_mut() {
                update.timeout_seconds = 0;
            }
        }
    }

    let manager = cfg
        .rules
        .get(&args.rule)
        .map(|rule| rule.manager.clone())
        .unwrap_or_default();

    let mut requests = Vec::new();
    for raw in &args.packages {
        let spec = parse_package_spec(raw).map_err(UpdateError::execution)?;
        let package = Package::new(&spec.name, &spec.current, &args.rule, &args.manifest)
            .with_constraint(&spec.constraint)
            .with_package_type(&manager);
        requests.push((package, spec.target));
    }

    let mut plans = resolve_plans(requests, &cfg);
    sort_plans(&mut plans);

    let registry = Arc::new(FormatRegistry::new());
    let executor = Arc::new(ShellExecutor::new());
    let updater = Arc::new(ManifestUpdater::new(registry, executor.clone()));

    let system_tests = cfg.system_tests.clone().map(|tests_cfg| {
        SystemTestRunner::new(Some(tests_cfg), &args.work_dir, executor.clone())
            .with_no_timeout(args.no_timeout)
    });

    let mut unsupported = UnsupportedReport::default();
    let mut ctx = UpdateContext::new(&cfg, &args.work_dir, updater, executor)
        .with_flags(args.dry_run, args.continue_on_error, args.skip_lock)
        .with_skip_system_tests(args.skip_system_tests)
        .with_unsupported_tracker(&mut unsupported);
    if let Some(runner) = system_tests {
        ctx.system_tests = Some(runner);
    }

    let progress = Progress::new(plans.len() as u64, !args.quiet && !args.verbose);
    let quiet = args.quiet;
    let mut callbacks = ExecutionCallbacks::new();
    callbacks.on_result_ready = Some(Box::new(move |result, dry_run| {
        if quiet {
            return;
        }
        let arrow = if dry_run { "would update" } else { "->" };
        let line = format!(
            "{:<14} {} {} {} {}",
            status_label(result.status),
            result.package.name,
            result.package.version,
            arrow,
            result.target
        );
        if result.error.is_some() {
            println!("{}: {}", line, result.error_message());
        } else {
            println!("{}", line);
        }
    }));

    let mut results = Vec::new();
    process_grouped_plans(
        &mut ctx,
        &mut plans,
        &mut results,
        Some(&progress),
        &mut callbacks,
    );
    progress.finish_and_clear();

    let failures = std::mem::take(&mut ctx.failures);
    drop(callbacks);
    drop(ctx);

    if !args.quiet {
        for (name, reason) in &unsupported.entries {
            eprintln!("{} {}: {}", "skipped".dimmed(), name, reason);
        }
        for failure in &failures {
            eprintln!("{} {}", "error:".red(), failure);
        }
    }

    let failed = results
        .iter()
        .filter(|r| matches!(r.status, UpdateStatus::Failed | UpdateStatus::ConfigError))
        .count();
    let succeeded = results
        .iter()
        .filter(|r| matches!(r.status, UpdateStatus::Updated | UpdateStatus::Planned))
        .count();

    Ok(if failed == 0 {
        EXIT_SUCCESS
    } else if succeeded > 0 {
        EXIT_PARTIAL_FAILURE
    } else {
        EXIT_FAILURE
    })
}
