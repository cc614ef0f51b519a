//! Command: show the last recorded runs and detect drift across runs.
use anyhow::Result;

use super::{CommandSetup, Runtime, Workspace};
use crate::cli::GlobalOpts;
use crate::state::State;

/// Reasons the machine may no longer match what the last run recorded.
///
/// `current` is `(manifest_hash, expanded_hash)` of the manifest as it is
/// now, or `None` when it cannot be loaded.
#[must_use]
pub fn drift_reasons(state: &State, current: Option<(&str, &str)>) -> Vec<String> {
    let mut reasons = Vec::new();
    let Some(applied) = &state.last_applied else {
        reasons.push("no apply recorded".to_string());
        return reasons;
    };
    match current {
        Some((manifest_hash, expanded_hash)) => {
            if applied.manifest_hash != manifest_hash {
                reasons.push("manifest changed since last apply".to_string());
            } else if applied.expanded_hash != expanded_hash {
                reasons.push("config modules changed since last apply".to_string());
            }
        }
        None => reasons.push("manifest cannot be loaded".to_string()),
    }
    if !applied.success {
        reasons.push("last apply failed".to_string());
    }
    if let Some(verify) = &state.last_verify
        && !verify.success
    {
        reasons.push(format!(
            "last verify found drift ({} missing, {} version mismatch)",
            verify.missing_count, verify.version_mismatch_count
        ));
    }
    reasons
}

/// Run the report command.
///
/// # Errors
///
/// Returns an error if the state cannot be read or drift was detected.
pub fn run(global: &GlobalOpts, rt: &Runtime) -> Result<()> {
    let ws = Workspace::open(global, rt)?;
    let store = ws.state_store();
    let state = store.load()?;

    rt.log.stage("Last runs");
    rt.log.debug(&format!("state: {}", store.path().display()));
    match &state.last_applied {
        Some(a) => rt.log.info(&format!(
            "apply  {}  {}: {} installed, {} upgraded, {} skipped, {} failed",
            a.timestamp_utc,
            a.manifest_path,
            a.installed,
            a.upgraded,
            a.skipped,
            a.failed
        )),
        None => rt.log.info("apply  never"),
    }
    match &state.last_verify {
        Some(v) => rt.log.info(&format!(
            "verify {}  {}: {} ok, {} missing, {} version mismatch, {} extra",
            v.timestamp_utc,
            v.manifest_path,
            v.ok_count,
            v.missing_count,
            v.version_mismatch_count,
            v.extra_count
        )),
        None => rt.log.info("verify never"),
    }
    for (id, seen) in &state.apps_observed {
        let status = match (seen.installed, &seen.version) {
            (true, Some(v)) => v.clone(),
            (true, None) => "installed".to_string(),
            (false, _) => "missing".to_string(),
        };
        rt.log
            .debug(&format!("{id}: {status} (seen {})", seen.last_seen_utc));
    }

    let setup = match CommandSetup::load(ws, rt) {
        Ok(setup) => Some(setup),
        Err(e) => {
            rt.log.warn(&format!("{e:#}"));
            None
        }
    };
    let current = setup
        .as_ref()
        .map(|s| (s.loaded.hash.as_str(), s.expanded_hash.as_str()));
    let reasons = drift_reasons(&state, current);

    rt.log.stage("Drift");
    if reasons.is_empty() {
        rt.log.info("converged: manifest unchanged and last verify clean");
        return Ok(());
    }
    for reason in &reasons {
        rt.log.warn(reason);
    }
    anyhow::bail!("{} drift indicator(s)", reasons.len());
}
