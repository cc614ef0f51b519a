//! Classification of apps into planned actions.
use std::fmt;

use anyhow::Result;

use super::Context;
use crate::drivers::package_manager::InstalledSnapshot;
use crate::drivers::{AppDriver, Detection, Driver, DriverEnv};
use crate::manifest::{AppEntry, Manifest};
use crate::version::{Constraint, VersionCheck};

/// What a pass would do with one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    /// Nothing to do; the reason says why.
    Skip(String),
    /// Not installed.
    Install,
    /// Installed, but the version does not satisfy the constraint.
    Upgrade,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(reason) => write!(f, "skip ({reason})"),
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// Decide the action for an app given what detect found.
#[must_use]
pub fn classify(detection: &Detection, constraint: &Constraint) -> PlannedAction {
    if !detection.installed {
        return PlannedAction::Install;
    }
    match constraint.check(detection.version.as_deref()) {
        VersionCheck::Satisfied => PlannedAction::Skip(detection.version.as_ref().map_or_else(
            || "already installed".to_string(),
            |v| format!("already installed ({v})"),
        )),
        VersionCheck::Unsatisfied | VersionCheck::Unknown => PlannedAction::Upgrade,
    }
}

/// One row of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    /// App id from the manifest.
    pub app_id: String,
    /// Driver description, when the entry resolved.
    pub target: Option<String>,
    /// Installed version reported by detect.
    pub installed_version: Option<String>,
    /// Declared constraint.
    pub constraint: Constraint,
    /// Classified action.
    pub action: PlannedAction,
}

/// Resolve and detect `entry`, then classify it.
///
/// # Errors
///
/// Returns an error if detection itself fails.
pub fn plan_app(entry: &AppEntry, env: &DriverEnv<'_>) -> Result<PlanItem> {
    let constraint = Constraint::parse(entry.version.as_deref());
    let driver = match Driver::resolve(entry, env) {
        Ok(driver) => driver,
        Err(reason) => {
            return Ok(PlanItem {
                app_id: entry.id.clone(),
                target: None,
                installed_version: None,
                constraint,
                action: PlannedAction::Skip(reason),
            });
        }
    };
    let detection = driver.detect()?;
    Ok(PlanItem {
        app_id: entry.id.clone(),
        target: Some(driver.describe()),
        action: classify(&detection, &constraint),
        installed_version: detection.version,
        constraint,
    })
}

/// Classify every app in `manifest` without side effects.
///
/// # Errors
///
/// Returns an error if the installed snapshot cannot be queried or any
/// detect fails.
pub fn build_plan(ctx: &Context, manifest: &Manifest) -> Result<Vec<PlanItem>> {
    let snapshot = if super::needs_snapshot(manifest, &ctx.platform) {
        ctx.snapshot(true)?
    } else {
        InstalledSnapshot::default()
    };
    let lock = std::sync::Mutex::new(());
    let env = DriverEnv {
        executor: ctx.executor.as_ref(),
        platform: &ctx.platform,
        root: &ctx.root,
        snapshot: &snapshot,
        install_lock: &lock,
    };
    manifest.apps.iter().map(|entry| plan_app(entry, &env)).collect()
}
