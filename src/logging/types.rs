//! Core logging types: per-app outcomes, run context, the progress row, and
//! the [`Log`] trait.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// One app's final outcome, kept for the run summary.
#[derive(Debug, Clone)]
pub struct AppOutcome {
    /// App id from the manifest.
    pub name: String,
    /// Final status of the app.
    pub status: OutcomeStatus,
    /// Optional detail (skip reason, error text, planned action).
    pub message: Option<String>,
}

/// Terminal status of an app in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Freshly installed.
    Installed,
    /// Upgraded to satisfy its constraint.
    Upgraded,
    /// Already converged or unresolvable; nothing done.
    Skipped,
    /// Dry run; the action was only classified.
    DryRun,
    /// Install, upgrade, or restore failed (manual intervention included).
    Failed,
}

impl OutcomeStatus {
    /// Lowercase label used in log rows.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Upgraded => "upgraded",
            Self::Skipped => "skipped",
            Self::DryRun => "dry-run",
            Self::Failed => "failed",
        }
    }
}

/// What a run is pointed at: logged once, as the log file header.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Repository root.
    pub root: &'a Path,
    /// Manifest path, when one is configured or discovered.
    pub manifest: Option<&'a Path>,
    /// Detected platform, e.g. `linux (pacman)`.
    pub platform: &'a str,
}

/// Whether the single-row progress display is currently on screen.
///
/// Shared by the [`Logger`](super::logger::Logger), which draws the row, and
/// the console formatter, which erases it before printing an event.
#[derive(Debug, Default)]
pub struct ProgressLine {
    shown: AtomicBool,
}

impl ProgressLine {
    /// Mark the row as drawn.
    pub fn mark_shown(&self) {
        self.shown.store(true, Ordering::SeqCst);
    }

    /// Mark the row as erased, returning whether it was shown.
    pub fn take(&self) -> bool {
        self.shown.swap(false, Ordering::SeqCst)
    }

    /// Whether the row is on screen.
    #[must_use]
    pub fn is_shown(&self) -> bool {
        self.shown.load(Ordering::SeqCst)
    }
}

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) is the console/file implementation;
/// tests substitute recording doubles.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record an app outcome for the summary.
    fn record_app(&self, name: &str, status: OutcomeStatus, message: Option<&str>);
    /// Note the root, manifest, and platform of this run.
    fn run_context(&self, _ctx: &RunContext<'_>) {}
    /// Replace the single-line progress display.
    fn progress(&self, _line: &str) {}
    /// Erase the progress display, if any.
    fn clear_progress(&self) {}
}
