//! Restore entries: copy config files from the repository into place.
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use super::Context;
use crate::drivers::confine::confine;
use crate::drivers::custom::expand_env;
use crate::fsutil;
use crate::manifest::RestoreEntry;

/// Suffix appended to a target when it is backed up before overwrite.
pub const BACKUP_SUFFIX: &str = ".converge-backup";

/// Result of one restore entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Target was written (or would be, in dry run).
    Restored,
    /// Target already matched the source.
    Unchanged,
    /// Optional source missing.
    Skipped(String),
    /// Required source missing, confinement violation, or I/O failure.
    Failed(String),
}

/// Counts across every restore entry in a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Targets written.
    pub restored: u32,
    /// Targets already up to date.
    pub unchanged: u32,
    /// Optional entries whose source was absent.
    pub skipped: u32,
    /// Entries that failed.
    pub failed: u32,
}

impl RestoreSummary {
    const fn record(&mut self, outcome: &RestoreOutcome) {
        match outcome {
            RestoreOutcome::Restored => self.restored += 1,
            RestoreOutcome::Unchanged => self.unchanged += 1,
            RestoreOutcome::Skipped(_) => self.skipped += 1,
            RestoreOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Total entries processed.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.restored + self.unchanged + self.skipped + self.failed
    }
}

impl fmt::Display for RestoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} restored, {} unchanged, {} skipped, {} failed",
            self.restored, self.unchanged, self.skipped, self.failed
        )
    }
}

/// Path a backup of `target` is written to.
#[must_use]
pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(BACKUP_SUFFIX);
    target.with_file_name(name)
}

/// Restore one entry whose source is resolved against `source_root`.
///
/// # Errors
///
/// Returns an error for a confinement violation, a missing required source,
/// or any I/O failure.
pub fn restore_entry(entry: &RestoreEntry, source_root: &Path, dry_run: bool) -> Result<RestoreOutcome> {
    let source = confine(source_root, &entry.source)?;
    let target = PathBuf::from(expand_env(&entry.target));

    if !source.exists() {
        if entry.optional {
            return Ok(RestoreOutcome::Skipped(format!(
                "optional source {} not found",
                entry.source
            )));
        }
        anyhow::bail!("source not found: {}", source.display());
    }

    let exists = target.symlink_metadata().is_ok();
    if exists && fsutil::same_content(&source, &target) {
        return Ok(RestoreOutcome::Unchanged);
    }
    if dry_run {
        return Ok(RestoreOutcome::Restored);
    }

    if exists {
        if entry.backup {
            let backup = backup_path(&target);
            fsutil::remove_existing(&backup)?;
            std::fs::rename(&target, &backup).with_context(|| {
                format!("back up {} to {}", target.display(), backup.display())
            })?;
        } else {
            fsutil::remove_existing(&target)?;
        }
    }
    fsutil::copy_any(&source, &target)?;
    Ok(RestoreOutcome::Restored)
}

/// Process every restore entry sequentially, logging each result.
///
/// Entries injected by a config module resolve their source against the
/// module directory; all others against `manifest_dir`.
#[must_use]
pub fn restore_all(ctx: &Context, entries: &[RestoreEntry], manifest_dir: &Path) -> RestoreSummary {
    let mut summary = RestoreSummary::default();
    if entries.is_empty() {
        return summary;
    }
    ctx.log.stage("Restoring configuration");
    for entry in entries {
        let root = entry.source_root.as_deref().unwrap_or(manifest_dir);
        let outcome = restore_entry(entry, root, ctx.dry_run)
            .unwrap_or_else(|e| RestoreOutcome::Failed(format!("{e:#}")));
        let desc = entry.from_module.as_ref().map_or_else(
            || format!("{} -> {}", entry.source, entry.target),
            |module| format!("{} -> {} [{module}]", entry.source, entry.target),
        );
        match &outcome {
            RestoreOutcome::Restored if ctx.dry_run => ctx.log.dry_run(&format!("would restore {desc}")),
            RestoreOutcome::Restored => ctx.log.info(&format!("restored {desc}")),
            RestoreOutcome::Unchanged => ctx.log.debug(&format!("ok: {desc}")),
            RestoreOutcome::Skipped(reason) => ctx.log.debug(&format!("skipping {desc}: {reason}")),
            RestoreOutcome::Failed(reason) => ctx.log.error(&format!("failed to restore {desc}: {reason}")),
        }
        summary.record(&outcome);
    }
    ctx.log.info(&format!("restore: {summary}"));
    summary
}
