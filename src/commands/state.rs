//! Command: manage the state file.
use anyhow::Result;

use super::{Runtime, Workspace};
use crate::cli::{GlobalOpts, StateAction};

/// Run the state command.
///
/// # Errors
///
/// Returns an error if the workspace cannot be opened or the state file
/// cannot be removed.
pub fn run(global: &GlobalOpts, action: &StateAction, rt: &Runtime) -> Result<()> {
    let ws = Workspace::open(global, rt)?;
    let store = ws.state_store();
    match action {
        StateAction::Reset => {
            if global.dry_run {
                rt.log
                    .dry_run(&format!("would remove {}", store.path().display()));
            } else if store.reset()? {
                rt.log.info(&format!("removed {}", store.path().display()));
            } else {
                rt.log.info("no state file to remove");
            }
        }
    }
    Ok(())
}
