//! Grouped update orchestration
//!
//! Plans are processed in consecutive runs sharing a group key. A run with
//! multiple members uses the group-lock strategy: every member's manifest
//! is patched with lock commands suppressed, then exactly one shared lock
//! command runs for the group. Single-member runs (and dry-run/skip-lock
//! invocations) fall back to the per-package strategy where each member
//! goes through the full single-package flow.
//!
//! Exactly one result is recorded and one progress increment fires per
//! processed plan, regardless of outcome. On a group-level error every
//! applied plan is rolled back to its original version and the group
//! failure is attached to every member that entered execution.

use crate::domain::{PlannedUpdate, UpdateResult, UpdateStatus};
use crate::error::UpdateError;
use crate::update::context::{
    ExecutionCallbacks, ProgressReporter, SystemTestFailure, UpdateContext,
};
use crate::update::drift::{rollback_plans, validate_pre_update_state, verify_rollback_drift};
use crate::update::single::run_group_lock_command;
use std::sync::Arc;

/// Processes all plans, batching consecutive runs that share a group key.
///
/// Plans must already be sorted so members of a group are adjacent (see
/// [`crate::update::sort_plans`]).
pub fn process_grouped_plans(
    ctx: &mut UpdateContext<'_>,
    plans: &mut [PlannedUpdate],
    results: &mut Vec<UpdateResult>,
    progress: Option<&dyn ProgressReporter>,
    callbacks: &mut ExecutionCallbacks<'_>,
) {
    if plans.is_empty() {
        return;
    }
    tracing::debug!(count = plans.len(), "processing plans for update");

    let mut start = 0;
    while start < plans.len() {
        let mut end = start + 1;
        while end < plans.len() && plans[end].group_key == plans[start].group_key {
            end += 1;
        }
        let halted = process_group(ctx, &mut plans[start..end], results, progress, callbacks);
        if halted {
            tracing::debug!(remaining = plans.len() - end, "halting after failure");
            return;
        }
        start = end;
    }
}

/// Outcome of processing one group
struct GroupOutcome {
    /// Combined group-level error, if any member failed
    error: Option<UpdateError>,
    /// True when remaining plans must not be attempted
    halted: bool,
}

/// Processes a single group of plans with rollback support.
///
/// Returns true when remaining groups must not be attempted (a failure
/// with continue-on-error disabled).
fn process_group(
    ctx: &mut UpdateContext<'_>,
    plans: &mut [PlannedUpdate],
    results: &mut Vec<UpdateResult>,
    progress: Option<&dyn ProgressReporter>,
    callbacks: &mut ExecutionCallbacks<'_>,
) -> bool {
    if plans.is_empty() {
        return false;
    }

    let use_group_lock = plans.len() > 1;
    let group_cfg = if use_group_lock {
        plans.iter().find_map(|p| p.update_cfg.clone())
    } else {
        None
    };

    let mut applied: Vec<usize> = Vec::new();
    let mut test_failures: Vec<SystemTestFailure> = Vec::new();

    let outcome = if use_group_lock && !ctx.dry_run && !ctx.skip_lock {
        GroupOutcome {
            error: process_group_with_group_lock(
                ctx,
                plans,
                group_cfg.as_ref(),
                &mut applied,
                results,
                progress,
                callbacks,
                &mut test_failures,
            ),
            halted: false,
        }
    } else {
        process_group_per_package(
            ctx,
            plans,
            &mut applied,
            results,
            progress,
            callbacks,
            &mut test_failures,
        )
    };

    let failed = outcome.error.is_some();
    if let Some(group_err) = outcome.error {
        if !ctx.dry_run && use_group_lock {
            let shared = Arc::new(group_err);
            if let Err(rollback_err) = rollback_plans(plans, &applied, ctx, &shared) {
                tracing::warn!(error = %rollback_err, "rollback completed with errors");
            }
            summarize_group_failure(plans, &shared);
        }
    }

    for failure in &test_failures {
        callbacks.system_test_failure(failure);
    }

    outcome.halted || (failed && !ctx.continue_on_error)
}

/// Marks every plan in a failed group as Failed, attaching the group error
/// to plans without one. Plans that never entered execution because of
/// configuration problems keep their status.
pub fn summarize_group_failure(plans: &mut [PlannedUpdate], group_error: &Arc<UpdateError>) {
    for plan in plans.iter_mut() {
        if !plan.result.status.can_fail_with_group() {
            continue;
        }
        plan.result.status = UpdateStatus::Failed;
        if plan.result.error.is_none() {
            plan.result.error = Some(Arc::clone(group_error));
        }
    }
}

/// Attaches an error to a result and classifies its status.
///
/// Unsupported errors mark the plan NotConfigured; anything else marks it
/// Failed and records a context failure.
fn handle_update_error(
    ctx: &mut UpdateContext<'_>,
    result: &mut UpdateResult,
    error: UpdateError,
) -> Arc<UpdateError> {
    let shared = Arc::new(error);
    if shared.is_unsupported() {
        result.fail_with(UpdateStatus::NotConfigured, Arc::clone(&shared));
    } else {
        result.fail_with(UpdateStatus::Failed, Arc::clone(&shared));
        ctx.append_failure(format!("{}: {}", result.package.describe(), shared));
    }
    shared
}

/// Records a terminal plan exactly once: unsupported tracking, result
/// append, progress increment and the result-ready callback.
fn emit_plan(
    ctx: &mut UpdateContext<'_>,
    plan: &PlannedUpdate,
    results: &mut Vec<UpdateResult>,
    progress: Option<&dyn ProgressReporter>,
    callbacks: &mut ExecutionCallbacks<'_>,
) {
    if plan.result.status.should_track_unsupported() {
        let reason = callbacks.unsupported_reason(&plan.result.package, plan.result.error.as_deref());
        ctx.track_unsupported(&plan.result.package, reason);
    }
    results.push(plan.result.clone());
    if let Some(progress) = progress {
        progress.increment();
    }
    callbacks.result_ready(&plan.result, ctx.dry_run);
}

/// Processes a group using one shared lock command for all members
#[allow(clippy::too_many_arguments)]
fn process_group_with_group_lock(
    ctx: &mut UpdateContext<'_>,
    plans: &mut [PlannedUpdate],
    group_cfg: Option<&crate::config::UpdateCommandConfig>,
    applied: &mut Vec<usize>,
    results: &mut Vec<UpdateResult>,
    progress: Option<&dyn ProgressReporter>,
    callbacks: &mut ExecutionCallbacks<'_>,
    test_failures: &mut Vec<SystemTestFailure>,
) -> Option<UpdateError> {
    let Some(group_cfg) = group_cfg else {
        let shared = Arc::new(UpdateError::execution(
            "no update configuration found for grouped packages; \
             ensure at least one package has a valid update config",
        ));
        for idx in 0..plans.len() {
            if plans[idx].result.status.can_fail_with_group() {
                plans[idx]
                    .result
                    .fail_with(UpdateStatus::Failed, Arc::clone(&shared));
            }
            emit_plan(ctx, &plans[idx], results, progress, callbacks);
        }
        ctx.append_failure(shared.to_string());
        return Some(UpdateError::execution(shared.to_string()));
    };

    let mut emitted = vec![false; plans.len()];
    let mut error_messages: Vec<String> = Vec::new();

    for idx in 0..plans.len() {
        if plans[idx].result.status.should_skip_update() {
            emit_plan(ctx, &plans[idx], results, progress, callbacks);
            emitted[idx] = true;
            continue;
        }

        if !ctx.dry_run {
            validate_pre_update_state(&mut plans[idx], ctx.reload.as_deref());
        }

        let package = plans[idx].result.package.clone();
        let target = plans[idx].result.target.clone();
        let update_result =
            ctx.updater
                .update(&package, &target, ctx.cfg, &ctx.work_dir, ctx.dry_run, true);

        match update_result {
            Err(error) => {
                let shared = handle_update_error(ctx, &mut plans[idx].result, error);
                if !shared.is_unsupported() {
                    error_messages.push(shared.to_string());
                }
            }
            Ok(()) => applied.push(idx),
        }
    }

    if !applied.is_empty() && error_messages.is_empty() && !ctx.dry_run {
        let with_all_deps = applied.iter().any(|&idx| {
            let package = &plans[idx].result.package;
            ctx.cfg
                .rules
                .get(&package.rule)
                .is_some_and(|rule| rule.should_update_with_all_dependencies(&package.name))
        });

        if let Err(lock_err) =
            run_group_lock_command(ctx.executor.as_ref(), group_cfg, &ctx.work_dir, with_all_deps)
        {
            ctx.append_failure(format!("group lock failed: {}", lock_err));
            let shared = Arc::new(lock_err);
            for &idx in applied.iter() {
                plans[idx]
                    .result
                    .fail_with(UpdateStatus::Failed, Arc::clone(&shared));
            }
            error_messages.push(shared.to_string());
        }
    }

    if error_messages.is_empty() {
        for &idx in applied.iter() {
            plans[idx].result.status = if ctx.dry_run {
                UpdateStatus::Planned
            } else {
                UpdateStatus::Updated
            };
            plans[idx].result.error = None;
        }
    }

    if ctx.should_run_system_tests_after_each() && error_messages.is_empty() && !applied.is_empty()
    {
        if let Some(message) = run_group_system_tests(ctx, plans, applied, test_failures) {
            error_messages.push(message);
        }
    }

    for idx in 0..plans.len() {
        if !emitted[idx] {
            emit_plan(ctx, &plans[idx], results, progress, callbacks);
            emitted[idx] = true;
        }
    }

    if error_messages.is_empty() {
        None
    } else {
        Some(UpdateError::execution(error_messages.join("; ")))
    }
}

/// Processes each group member through the full single-package flow
#[allow(clippy::too_many_arguments)]
fn process_group_per_package(
    ctx: &mut UpdateContext<'_>,
    plans: &mut [PlannedUpdate],
    applied: &mut Vec<usize>,
    results: &mut Vec<UpdateResult>,
    progress: Option<&dyn ProgressReporter>,
    callbacks: &mut ExecutionCallbacks<'_>,
    test_failures: &mut Vec<SystemTestFailure>,
) -> GroupOutcome {
    let mut error_messages: Vec<String> = Vec::new();

    for idx in 0..plans.len() {
        if plans[idx].result.status.should_skip_update() {
            emit_plan(ctx, &plans[idx], results, progress, callbacks);
            continue;
        }

        if !ctx.dry_run {
            validate_pre_update_state(&mut plans[idx], ctx.reload.as_deref());
        }

        let package = plans[idx].result.package.clone();
        let target = plans[idx].result.target.clone();
        let update_result = ctx.updater.update(
            &package,
            &target,
            ctx.cfg,
            &ctx.work_dir,
            ctx.dry_run,
            ctx.skip_lock,
        );

        if let Err(error) = update_result {
            let shared = handle_update_error(ctx, &mut plans[idx].result, error);
            let unsupported = shared.is_unsupported();
            if !unsupported {
                error_messages.push(shared.to_string());
            }
            emit_plan(ctx, &plans[idx], results, progress, callbacks);
            // Unattempted plans are only short-circuited when
            // continue-on-error is disabled
            if !ctx.continue_on_error && !unsupported {
                return GroupOutcome {
                    error: Some(UpdateError::execution(error_messages.join("; "))),
                    halted: true,
                };
            }
            continue;
        }

        applied.push(idx);
        plans[idx].result.status = if ctx.dry_run {
            UpdateStatus::Planned
        } else {
            UpdateStatus::Updated
        };
        plans[idx].result.error = None;

        if ctx.should_run_system_tests_after_each() {
            run_package_system_tests(ctx, &mut plans[idx], &mut error_messages, test_failures);
        }

        emit_plan(ctx, &plans[idx], results, progress, callbacks);
    }

    let error = if error_messages.is_empty() {
        None
    } else {
        Some(UpdateError::execution(error_messages.join("; ")))
    };
    GroupOutcome {
        error,
        halted: false,
    }
}

/// Runs the system test suite once for a group of applied plans.
///
/// Returns the fatal error message when a critical failure vetoes the
/// group; advisory failures are recorded and do not produce an error.
fn run_group_system_tests(
    ctx: &mut UpdateContext<'_>,
    plans: &mut [PlannedUpdate],
    applied: &[usize],
    test_failures: &mut Vec<SystemTestFailure>,
) -> Option<String> {
    let (result, stop_on_fail) = {
        let runner = ctx.system_tests.as_ref()?;
        (runner.run_after_update(), runner.stop_on_fail())
    };

    for &idx in applied {
        plans[idx].result.system_test_result = Some(result.clone());
    }

    let is_critical = result.has_critical_failure() && stop_on_fail;
    if is_critical {
        let error = Arc::new(UpdateError::SystemTests {
            summary: result.summary(),
        });
        for &idx in applied {
            plans[idx]
                .result
                .fail_with(UpdateStatus::Failed, Arc::clone(&error));
        }
        ctx.append_failure(error.to_string());
        return Some(error.to_string());
    }

    if !result.passed() {
        test_failures.push(SystemTestFailure {
            pkg_name: "group".to_string(),
            is_critical: false,
            result,
        });
    }
    None
}

/// Runs the system test suite after a single package update, rolling the
/// package back when a critical failure vetoes it. Rollback failures are
/// recorded in addition to, never instead of, the test failure.
fn run_package_system_tests(
    ctx: &mut UpdateContext<'_>,
    plan: &mut PlannedUpdate,
    error_messages: &mut Vec<String>,
    test_failures: &mut Vec<SystemTestFailure>,
) {
    let Some((result, stop_on_fail)) = ctx
        .system_tests
        .as_ref()
        .map(|runner| (runner.run_after_update(), runner.stop_on_fail()))
    else {
        return;
    };

    plan.result.system_test_result = Some(result.clone());
    let is_critical = result.has_critical_failure() && stop_on_fail;

    if is_critical {
        let package = plan.result.package.clone();
        tracing::warn!(
            package = %package.name,
            summary = %result.summary(),
            "system tests failed, rolling back"
        );

        let rollback = ctx.updater.update(
            &package,
            &plan.original,
            ctx.cfg,
            &ctx.work_dir,
            ctx.dry_run,
            ctx.skip_lock,
        );
        match rollback {
            Err(e) => {
                ctx.append_failure(format!("{}: rollback failed: {}", package.name, e));
            }
            Ok(()) => {
                if !ctx.dry_run {
                    if let Some(reload) = ctx.reload.as_deref() {
                        if let Err(drift) = verify_rollback_drift(plan, reload) {
                            ctx.append_failure(drift.to_string());
                        }
                    }
                }
            }
        }

        let error = Arc::new(UpdateError::SystemTests {
            summary: result.summary(),
        });
        plan.result.fail_with(UpdateStatus::Failed, Arc::clone(&error));
        ctx.append_failure(format!("{}: {}", package.name, error));
        error_messages.push(error.to_string());
    }

    if !result.passed() {
        test_failures.push(SystemTestFailure {
            pkg_name: plan.result.package.name.clone(),
            is_critical,
            result,
        });
    }
}
