//! Command: report drift between the manifest and the machine.
use anyhow::{Context as _, Result};

use super::{CommandSetup, Runtime};
use crate::cli::{GlobalOpts, VerifyOpts};
use crate::engine::verify::{VerifyResult, verify};

/// Run a verify pass and record it in state unless suppressed.
///
/// # Errors
///
/// Returns an error for load-time failures or if state cannot be read or
/// written.
pub fn execute(global: &GlobalOpts, opts: &VerifyOpts, rt: &Runtime) -> Result<VerifyResult> {
    let setup = CommandSetup::init(global, rt)?;
    let ws = &setup.workspace;
    let write_state = !opts.no_state && !global.dry_run;

    let store = ws.state_store();
    let mut state = if write_state { Some(store.load()?) } else { None };

    let result = verify(&ws.context(rt, global.dry_run), &setup.expanded)?;

    if let Some(state) = state.as_mut() {
        state.record_verify(setup.run_info(), &result, rt.clock.as_ref());
        store.save(state)?;
    }
    Ok(result)
}

/// Run the verify command.
///
/// # Errors
///
/// Returns an error if [`execute`] fails or drift was found.
pub fn run(global: &GlobalOpts, opts: &VerifyOpts, rt: &Runtime) -> Result<()> {
    let result = execute(global, opts, rt)?;
    if opts.json {
        let json = serde_json::to_string_pretty(&result).context("serializing verify result")?;
        println!("{json}");
    }
    if !result.success() {
        anyhow::bail!(
            "drift detected: {} missing, {} version mismatch, {} checks failed",
            result.missing_count,
            result.version_mismatch_count,
            result.checks_failed.len()
        );
    }
    Ok(())
}
