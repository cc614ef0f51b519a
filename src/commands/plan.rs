//! Command: show what apply would do.
use anyhow::Result;

use super::{CommandSetup, Runtime};
use crate::cli::GlobalOpts;
use crate::engine::plan::{PlanItem, PlannedAction, build_plan};

/// One line of plan output.
#[must_use]
pub fn format_item(item: &PlanItem) -> String {
    let target = item
        .target
        .as_deref()
        .map_or_else(String::new, |t| format!(" [{t}]"));
    let current = match (&item.action, &item.installed_version) {
        (PlannedAction::Upgrade, Some(v)) => format!(" (installed {v}, wanted {})", item.constraint),
        _ => String::new(),
    };
    format!("{}: {}{target}{current}", item.app_id, item.action)
}

/// Run the plan command: classify every app without side effects.
///
/// # Errors
///
/// Returns an error for load-time failures or if any detect fails.
pub fn run(global: &GlobalOpts, rt: &Runtime) -> Result<()> {
    let setup = CommandSetup::init(global, rt)?;
    let ctx = setup.workspace.context(rt, true);

    rt.log.stage("Planning");
    let items = build_plan(&ctx, &setup.expanded)?;
    let (mut install, mut upgrade, mut skip) = (0, 0, 0);
    for item in &items {
        match item.action {
            PlannedAction::Install => install += 1,
            PlannedAction::Upgrade => upgrade += 1,
            PlannedAction::Skip(_) => skip += 1,
        }
        rt.log.info(&format_item(item));
    }
    for entry in &setup.expanded.restore {
        rt.log
            .info(&format!("restore: {} -> {}", entry.source, entry.target));
    }
    rt.log.info(&format!(
        "{install} to install, {upgrade} to upgrade, {skip} to skip, {} restore entries",
        setup.expanded.restore.len()
    ));
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::version::Constraint;

    #[test]
    fn upgrade_lines_show_versions() {
        let item = PlanItem {
            app_id: "git".into(),
            target: Some("pacman:git".into()),
            installed_version: Some("2.30".into()),
            constraint: Constraint::parse(Some(">=2.40")),
            action: PlannedAction::Upgrade,
        };
        assert_eq!(
            format_item(&item),
            "git: upgrade [pacman:git] (installed 2.30, wanted >=2.40)"
        );
    }

    #[test]
    fn skip_lines_carry_reason() {
        let item = PlanItem {
            app_id: "ghost".into(),
            target: None,
            installed_version: None,
            constraint: Constraint::Any,
            action: PlannedAction::Skip("no package id for pacman".into()),
        };
        assert_eq!(format_item(&item), "ghost: skip (no package id for pacman)");
    }
}
