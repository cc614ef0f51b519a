//! Command: converge the machine to the manifest, then verify.
use anyhow::{Context as _, Result};

use super::{CommandSetup, Runtime};
use crate::cli::{ApplyOpts, GlobalOpts};
use crate::engine::apply::{ApplyResult, apply};
use crate::engine::verify::{VerifyResult, verify};

/// Outcome of the apply command.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// The apply pass.
    pub apply: ApplyResult,
    /// The verify pass, unless suppressed.
    pub verify: Option<VerifyResult>,
    /// Whether state was written.
    pub state_written: bool,
}

impl ApplyOutcome {
    /// Apply succeeded and verify (when run) found no drift.
    #[must_use]
    pub fn success(&self) -> bool {
        self.apply.success() && self.verify.as_ref().is_none_or(VerifyResult::success)
    }
}

/// Run apply and the follow-up verify, writing state once at the end.
///
/// Dry runs skip verify and never write state.
///
/// # Errors
///
/// Returns an error for load-time failures (root, settings, manifest,
/// expansion, unreadable state, unavailable package manager) or if the
/// state file cannot be written.
pub fn execute(global: &GlobalOpts, opts: &ApplyOpts, rt: &Runtime) -> Result<ApplyOutcome> {
    let setup = CommandSetup::init(global, rt)?;
    let ws = &setup.workspace;
    let write_state = !opts.no_state && !global.dry_run;

    let store = ws.state_store();
    let mut state = if write_state { Some(store.load()?) } else { None };

    let ctx = ws.context(rt, global.dry_run);
    let result = apply(&ctx, &setup.expanded, &setup.loaded.dir)?;

    let verify_result = if opts.no_verify || global.dry_run {
        Ok(None)
    } else {
        verify(&ctx, &setup.expanded).map(Some)
    };

    // The apply record is saved even when verify errors: installs already ran.
    if let Some(state) = state.as_mut() {
        state.record_apply(setup.run_info(), &result, rt.clock.as_ref());
        if let Ok(Some(v)) = &verify_result {
            state.record_verify(setup.run_info(), v, rt.clock.as_ref());
        }
        store.save(state)?;
        rt.log.debug(&format!("state written to {}", store.path().display()));
    }
    let verify_result = verify_result.context("post-apply verify failed")?;

    Ok(ApplyOutcome {
        apply: result,
        verify: verify_result,
        state_written: state.is_some(),
    })
}

/// Run the apply command.
///
/// # Errors
///
/// Returns an error if [`execute`] fails, any app or restore entry failed,
/// or the follow-up verify found drift.
pub fn run(global: &GlobalOpts, opts: &ApplyOpts, rt: &Runtime) -> Result<()> {
    let outcome = execute(global, opts, rt)?;
    if !outcome.apply.success() {
        anyhow::bail!(
            "apply failed: {} ({} restore failures)",
            outcome.apply,
            outcome.apply.restore.failed
        );
    }
    if let Some(v) = outcome.verify.as_ref().filter(|v| !v.success()) {
        anyhow::bail!(
            "verify after apply found drift: {} missing, {} version mismatch, {} checks failed",
            v.missing_count,
            v.version_mismatch_count,
            v.checks_failed.len()
        );
    }
    Ok(())
}
