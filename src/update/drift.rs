//! Drift validation and rollback
//!
//! Drift is divergence between the version a plan believes a package has
//! and the version live state reports. Pre-update validation corrects the
//! plan's rollback target to the live value so a later rollback restores
//! the package's actual prior state. Rollback re-invokes the package
//! updater with the original version and verifies the result against live
//! state with three distinguishable failures: reload failed, package
//! missing, version mismatch.

use crate::domain::{Package, PlannedUpdate, UpdateStatus};
use crate::error::UpdateError;
use crate::update::context::UpdateContext;
use std::sync::Arc;

/// Compares two versions, ignoring surrounding whitespace and a leading 'v'
pub fn versions_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn normalize(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed)
}

fn find_package<'p>(packages: &'p [Package], key: &str) -> Option<&'p Package> {
    packages.iter().find(|p| p.key() == key)
}

/// Verifies a package is at its expected original version before updating.
///
/// Detects modification by another process between planning and execution.
/// Failures are non-fatal by design: a reload error or a missing package
/// leaves the plan untouched. On a version mismatch the plan's original is
/// corrected to the live value so rollback targets the real prior state.
pub fn validate_pre_update_state(
    plan: &mut PlannedUpdate,
    reload: Option<&(dyn Fn() -> anyhow::Result<Vec<Package>> + Send + Sync)>,
) {
    let Some(reload) = reload else { return };
    let Ok(packages) = reload() else { return };

    let key = plan.result.package.key();
    let Some(found) = find_package(&packages, &key) else {
        return;
    };

    if !versions_match(&found.version, &plan.original) {
        tracing::warn!(
            package = %plan.result.package.name,
            planned = %plan.original,
            live = %found.version,
            "pre-update drift detected, correcting rollback target"
        );
        plan.original = found.version.clone();
    }
}

/// Rolls back all applied plans to their original versions.
///
/// Rollback reuses the forward-update path with target = original. Errors
/// are accumulated per plan and appended to the context's failures; they
/// never replace the triggering group error, which is attached to every
/// plan that had reached Updated.
pub fn rollback_plans(
    plans: &mut [PlannedUpdate],
    applied: &[usize],
    ctx: &mut UpdateContext<'_>,
    group_error: &Arc<UpdateError>,
) -> Result<(), UpdateError> {
    tracing::debug!(count = applied.len(), error = %group_error, "rolling back applied plans");
    let mut rollback_errors = Vec::new();

    for &idx in applied {
        let plan = &mut plans[idx];
        let package = plan.result.package.clone();
        tracing::debug!(
            package = %package.name,
            from = %plan.result.target,
            to = %plan.original,
            "rolling back"
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
                let message = format!("{} rollback failed: {}", package.describe(), e);
                ctx.append_failure(message.clone());
                rollback_errors.push(UpdateError::execution(message));
            }
            Ok(()) => {
                if !ctx.dry_run {
                    if let Some(reload) = ctx.reload.as_deref() {
                        if let Err(drift) = verify_rollback_drift(plan, reload) {
                            ctx.append_failure(drift.to_string());
                            rollback_errors.push(drift);
                        }
                    }
                }
            }
        }

        if plan.result.status == UpdateStatus::Updated {
            plan.result.status = UpdateStatus::Failed;
            if plan.result.error.is_none() {
                plan.result.error = Some(Arc::clone(group_error));
            }
        }
    }

    match UpdateError::join(rollback_errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Verifies a rollback actually restored the package to its original
/// version, catching rollbacks that succeeded without updating live state.
pub fn verify_rollback_drift(
    plan: &PlannedUpdate,
    reload: &(dyn Fn() -> anyhow::Result<Vec<Package>> + Send + Sync),
) -> Result<(), UpdateError> {
    let packages = reload().map_err(|e| UpdateError::Reload {
        message: e.to_string(),
    })?;

    let key = plan.result.package.key();
    let found = find_package(&packages, &key).ok_or_else(|| UpdateError::MissingAfterRollback {
        package: plan.result.package.name.clone(),
    })?;

    if !versions_match(&found.version, &plan.original) {
        return Err(UpdateError::RollbackDrift {
            package: plan.result.package.name.clone(),
            expected: plan.original.clone(),
            found: found.version.clone(),
        });
    }

    Ok(())
}
