//! Apply pass: converge every app, then restore configuration.
use std::fmt;
use std::path::Path;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use super::plan::{PlannedAction, classify};
use super::pool::run_bounded;
use super::progress::{ProgressEvent, ProgressReporter, emit};
use super::restore::{RestoreSummary, restore_all};
use super::{AppStatus, Context, IllegalTransition, needs_snapshot};
use crate::drivers::package_manager::InstalledSnapshot;
use crate::drivers::{ActionOutcome, AppDriver, Driver, DriverEnv};
use crate::logging::OutcomeStatus;
use crate::manifest::{AppEntry, Manifest};
use crate::version::Constraint;

/// Final record for one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppReport {
    /// App id from the manifest.
    pub id: String,
    /// Classified action; `None` when detection failed or the pass was
    /// cancelled first.
    pub action: Option<PlannedAction>,
    /// Terminal status.
    pub status: AppStatus,
    /// Skip reason, error text, or manual-intervention hint.
    pub message: Option<String>,
}

impl AppReport {
    fn failed(id: &str, message: String) -> Self {
        Self {
            id: id.to_string(),
            action: None,
            status: AppStatus::Failed,
            message: Some(message),
        }
    }
}

/// Aggregate outcome of an apply pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    /// Apps installed (or that would be, in dry run).
    pub installed: u32,
    /// Apps upgraded (or that would be, in dry run).
    pub upgraded: u32,
    /// Apps already converged or unresolvable.
    pub skipped: u32,
    /// Apps that failed, manual intervention included.
    pub failed: u32,
    /// Whether the pass only classified.
    pub dry_run: bool,
    /// Per-app records in manifest order.
    pub apps: Vec<AppReport>,
    /// Restore counts.
    pub restore: RestoreSummary,
}

impl ApplyResult {
    fn new(apps: Vec<AppReport>, restore: RestoreSummary, dry_run: bool) -> Self {
        let mut result = Self {
            dry_run,
            restore,
            ..Self::default()
        };
        for app in &apps {
            match app.status {
                AppStatus::Installed => result.installed += 1,
                AppStatus::Upgraded => result.upgraded += 1,
                AppStatus::Skipped => result.skipped += 1,
                AppStatus::Failed | AppStatus::ManualInterventionNeeded => result.failed += 1,
                AppStatus::Pending | AppStatus::Installing | AppStatus::Upgrading => {}
            }
        }
        result.apps = apps;
        result
    }

    /// Dry runs always succeed; otherwise nothing may have failed.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.dry_run || (self.failed == 0 && self.restore.failed == 0)
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} installed, {} upgraded, {} skipped, {} failed",
            self.installed, self.upgraded, self.skipped, self.failed
        )?;
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        Ok(())
    }
}

/// Converge every app in `manifest` and restore its configuration.
///
/// Per-app failures are recorded and never abort the queue. Restore
/// sources resolve against `manifest_dir` unless injected by a module.
///
/// # Errors
///
/// Returns an error only for load-time failures: the installed snapshot
/// cannot be queried, or the worker pool cannot start. Nothing has been
/// changed when this happens.
pub fn apply(ctx: &Context, manifest: &Manifest, manifest_dir: &Path) -> Result<ApplyResult> {
    ctx.log.stage("Converging apps");
    let snapshot = if needs_snapshot(manifest, &ctx.platform) {
        ctx.snapshot(true)?
    } else {
        InstalledSnapshot::default()
    };
    let lock = Mutex::new(());
    let env = DriverEnv {
        executor: ctx.executor.as_ref(),
        platform: &ctx.platform,
        root: &ctx.root,
        snapshot: &snapshot,
        install_lock: &lock,
    };

    let reporter = ProgressReporter::start(manifest.apps.len(), Arc::clone(&ctx.log));
    let tx = reporter.sender();
    let reports = run_bounded(&manifest.apps, ctx.parallelism, |entry| {
        converge_app(ctx, entry, &env, tx.as_ref())
    });
    drop(tx);
    let progress = reporter.finish();
    let reports = reports?;
    ctx.log.debug(&format!(
        "workers finished: {} completed, {} failed",
        progress.completed_count, progress.failed_count
    ));

    let restore = restore_all(ctx, &manifest.restore, manifest_dir);
    let result = ApplyResult::new(reports, restore, ctx.dry_run);
    ctx.log.info(&format!("apps: {result}"));
    Ok(result)
}

/// Run one app end to end, reporting progress around it.
fn converge_app(
    ctx: &Context,
    entry: &AppEntry,
    env: &DriverEnv<'_>,
    progress: Option<&SyncSender<ProgressEvent>>,
) -> AppReport {
    let report = if ctx.cancelled() {
        AppReport::failed(&entry.id, "cancelled".to_string())
    } else {
        emit(progress, ProgressEvent::AppStarted(entry.id.clone()));
        execute(ctx, entry, env)
            .unwrap_or_else(|e| AppReport::failed(&entry.id, e.to_string()))
    };
    emit(
        progress,
        ProgressEvent::AppCompleted {
            id: entry.id.clone(),
            success: !report.status.is_failure(),
        },
    );
    ctx.log
        .record_app(&entry.id, outcome_status(&report, ctx.dry_run), report.message.as_deref());
    report
}

fn outcome_status(report: &AppReport, dry_run: bool) -> OutcomeStatus {
    match report.status {
        AppStatus::Installed | AppStatus::Upgraded if dry_run => OutcomeStatus::DryRun,
        AppStatus::Installed => OutcomeStatus::Installed,
        AppStatus::Upgraded => OutcomeStatus::Upgraded,
        AppStatus::Skipped | AppStatus::Pending => OutcomeStatus::Skipped,
        AppStatus::Installing
        | AppStatus::Upgrading
        | AppStatus::Failed
        | AppStatus::ManualInterventionNeeded => OutcomeStatus::Failed,
    }
}

/// Detect, classify, and act on one app, walking the status lifecycle.
fn execute(ctx: &Context, entry: &AppEntry, env: &DriverEnv<'_>) -> Result<AppReport, IllegalTransition> {
    let mut report = AppReport {
        id: entry.id.clone(),
        action: None,
        status: AppStatus::Pending,
        message: None,
    };

    let driver = match Driver::resolve(entry, env) {
        Ok(driver) => driver,
        Err(reason) => {
            ctx.log.debug(&format!("skipping {}: {reason}", entry.id));
            report.status = report.status.advance(AppStatus::Skipped)?;
            report.action = Some(PlannedAction::Skip(reason.clone()));
            report.message = Some(reason);
            return Ok(report);
        }
    };
    let desc = driver.describe();

    let detection = match driver.detect() {
        Ok(detection) => detection,
        Err(e) => {
            ctx.log.error(&format!("failed to detect {desc}: {e:#}"));
            report.status = report.status.advance(AppStatus::Failed)?;
            report.message = Some(format!("detect failed: {e:#}"));
            return Ok(report);
        }
    };
    let action = classify(&detection, &Constraint::parse(entry.version.as_deref()));
    report.action = Some(action.clone());

    let (running, done, verb, past) = match action {
        PlannedAction::Skip(reason) => {
            ctx.log.debug(&format!("ok: {desc}: {reason}"));
            report.status = report.status.advance(AppStatus::Skipped)?;
            report.message = Some(reason);
            return Ok(report);
        }
        PlannedAction::Install => (
            AppStatus::Installing,
            AppStatus::Installed,
            "install",
            "installed",
        ),
        PlannedAction::Upgrade => (
            AppStatus::Upgrading,
            AppStatus::Upgraded,
            "upgrade",
            "upgraded",
        ),
    };
    report.status = report.status.advance(running)?;

    if ctx.dry_run {
        let current = detection
            .version
            .as_deref()
            .map_or_else(String::new, |v| format!(" (currently {v})"));
        ctx.log.dry_run(&format!("would {verb} {desc}{current}"));
        report.status = report.status.advance(done)?;
        report.message = Some(format!("would {verb}"));
        return Ok(report);
    }

    ctx.log.debug(&format!("{verb}: {desc}"));
    let outcome = if running == AppStatus::Installing {
        driver.install()
    } else {
        driver.upgrade()
    };
    match outcome {
        Ok(ActionOutcome::Done) => {
            ctx.log.info(&format!("{past} {desc}"));
            report.status = report.status.advance(done)?;
        }
        Ok(ActionOutcome::ManualInterventionNeeded(hint)) => {
            ctx.log.warn(&format!("{desc}: {hint}"));
            let next = if running == AppStatus::Upgrading {
                AppStatus::ManualInterventionNeeded
            } else {
                AppStatus::Failed
            };
            report.status = report.status.advance(next)?;
            report.message = Some(hint);
        }
        Err(e) => {
            ctx.log.error(&format!("failed to {verb} {desc}: {e:#}"));
            report.status = report.status.advance(AppStatus::Failed)?;
            report.message = Some(format!("{e:#}"));
        }
    }
    Ok(report)
}
