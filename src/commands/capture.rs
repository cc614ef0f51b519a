//! Command: export installed software into a new manifest.
use anyhow::{Context as _, Result};

use super::{Runtime, Workspace};
use crate::capture::sanitize::{LeakMarkers, SANITIZED_NAME};
use crate::capture::{CaptureOptions, CaptureReport, capture};
use crate::cli::{CaptureOpts, GlobalOpts};

/// Run a capture with explicit leak markers.
///
/// # Errors
///
/// Returns an error if the workspace cannot be opened, a guardrail trips,
/// or the output cannot be written.
pub fn execute(
    global: &GlobalOpts,
    opts: &CaptureOpts,
    rt: &Runtime,
    leak_markers: LeakMarkers,
) -> Result<CaptureReport> {
    let ws = Workspace::open(global, rt)?;
    let out = std::path::absolute(&opts.out)
        .with_context(|| format!("cannot resolve output path {}", opts.out.display()))?;
    let name = opts
        .name
        .clone()
        .or_else(crate::platform::host_name)
        .unwrap_or_else(|| SANITIZED_NAME.to_string());

    let options = CaptureOptions {
        out,
        sanitize: opts.sanitize,
        include_config: opts.include_config,
        pin_versions: opts.pin_versions,
        name,
        shared_dir: ws.settings.shared_path(&ws.root),
        leak_markers,
    };
    let catalog = ws.catalog(rt.log.as_ref());
    capture(&ws.context(rt, global.dry_run), &catalog, &options)
}

/// Run the capture command.
///
/// # Errors
///
/// Returns an error if [`execute`] fails.
pub fn run(global: &GlobalOpts, opts: &CaptureOpts, rt: &Runtime) -> Result<()> {
    let report = execute(global, opts, rt, LeakMarkers::from_env())?;
    if report.config_files > 0 {
        rt.log.info(&format!(
            "copied {} config files from {} modules",
            report.config_files,
            report.manifest.config_modules.len()
        ));
    }
    Ok(())
}
