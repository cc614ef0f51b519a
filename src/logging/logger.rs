//! Structured logger with dry-run awareness and summary collection.
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::subscriber::{APP, DRY_RUN, RUN, STAGE};
use super::types::{AppOutcome, Log, OutcomeStatus, ProgressLine, RunContext};
use super::utils::{log_file_path, progress_width, truncate_chars};

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Structured logger with dry-run awareness and summary collection.
///
/// All messages are also written to `$XDG_CACHE_HOME/converge/<command>.log`
/// (default `~/.cache/converge/<command>.log`) with timestamps and ANSI codes
/// stripped, regardless of the verbose flag.
#[derive(Debug)]
pub struct Logger {
    outcomes: Mutex<Vec<AppOutcome>>,
    log_file: Option<PathBuf>,
    /// Serializes console output against the progress line.
    flush_lock: Mutex<()>,
    /// The progress row, shared with the console formatter.
    ///
    /// The row is always truncated to a single terminal line, so clearing it
    /// never needs cursor-up movement.
    progress: Arc<ProgressLine>,
}

impl Logger {
    /// Create a new logger.
    ///
    /// The log file itself is created by
    /// [`init_subscriber`](super::subscriber::init_subscriber); this only
    /// remembers its path for the summary.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
            flush_lock: Mutex::new(()),
            progress: Arc::new(ProgressLine::default()),
        }
    }

    /// The progress row handle to pass to
    /// [`init_subscriber`](super::subscriber::init_subscriber).
    #[must_use]
    pub fn progress_line(&self) -> Arc<ProgressLine> {
        Arc::clone(&self.progress)
    }

    /// Return the log file path, if available.
    #[cfg(test)]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded outcomes (test-only).
    #[cfg(test)]
    pub(crate) fn outcome_entries(&self) -> Vec<AppOutcome> {
        self.outcomes.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    fn flush_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `emit` with the progress line temporarily erased.
    fn around_progress(&self, emit: impl FnOnce()) {
        let _guard = self.flush_guard();
        self.erase_progress();
        emit();
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        self.around_progress(|| tracing::error!("{msg}"));
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        self.around_progress(|| tracing::warn!("{msg}"));
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        self.around_progress(|| tracing::info!(target: STAGE, "{msg}"));
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        self.around_progress(|| tracing::info!("{msg}"));
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file).
    pub fn debug(&self, msg: &str) {
        self.around_progress(|| tracing::debug!("{msg}"));
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        self.around_progress(|| tracing::info!(target: DRY_RUN, "{msg}"));
    }

    /// Record an app outcome for the summary and emit it as an app event.
    pub fn record_app(&self, name: &str, status: OutcomeStatus, message: Option<&str>) {
        self.around_progress(|| {
            tracing::debug!(
                target: APP,
                app = name,
                status = status.label(),
                detail = message.unwrap_or_default(),
                "app outcome"
            );
        });
        if let Ok(mut guard) = self.outcomes.lock() {
            guard.push(AppOutcome {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Count the number of failed apps.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.outcomes.lock().map_or(0, |guard| {
            guard
                .iter()
                .filter(|t| t.status == OutcomeStatus::Failed)
                .count()
        })
    }

    /// Print the summary of all recorded outcomes.
    pub fn print_summary(&self) {
        let outcomes = match self.outcomes.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        if outcomes.is_empty() {
            return;
        }

        self.stage("Summary");

        let mut counts = [0u32; 5];
        for entry in &outcomes {
            let (slot, icon, color) = match entry.status {
                OutcomeStatus::Installed => (0, "✓", "\x1b[32m"),
                OutcomeStatus::Upgraded => (1, "↑", "\x1b[36m"),
                OutcomeStatus::Skipped => (2, "·", "\x1b[2m"),
                OutcomeStatus::DryRun => (3, "~", "\x1b[37m"),
                OutcomeStatus::Failed => (4, "✗", "\x1b[31m"),
            };
            if let Some(c) = counts.get_mut(slot) {
                *c += 1;
            }
            let suffix = entry
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));
            self.info(&format!("{color}{icon} {}{suffix}\x1b[0m", entry.name));
        }

        let [installed, upgraded, skipped, dry_run, failed] = counts;
        let total: u32 = counts.iter().sum();
        self.info(&format!(
            "{total} apps: \x1b[32m{installed} installed\x1b[0m, \x1b[36m{upgraded} upgraded\x1b[0m, \x1b[2m{skipped} skipped\x1b[0m, \x1b[37m{dry_run} dry-run\x1b[0m, \x1b[31m{failed} failed\x1b[0m"
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }

    /// Emit the run's root, manifest, and platform.
    pub fn run_context(&self, ctx: &RunContext<'_>) {
        let manifest = ctx
            .manifest
            .map_or_else(|| "(none)".to_string(), |m| m.display().to_string());
        self.around_progress(|| {
            tracing::debug!(
                target: RUN,
                root = %ctx.root.display(),
                manifest = %manifest,
                platform = ctx.platform,
                "run"
            );
        });
    }

    /// Erase the in-progress status line. Caller holds `flush_lock`.
    fn erase_progress(&self) {
        if self.progress.take() {
            print!("\r\x1b[K");
            std::io::stdout().flush().ok();
        }
    }

    /// Draw `line` as the progress row, truncated to the terminal width.
    /// Caller holds `flush_lock`.
    fn draw_progress(&self, line: &str) {
        let shown = truncate_chars(line, progress_width());
        print!("  \x1b[2m▹ {shown}\x1b[0m");
        std::io::stdout().flush().ok();
        self.progress.mark_shown();
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record_app(&self, name: &str, status: OutcomeStatus, message: Option<&str>) {
        self.record_app(name, status, message);
    }

    fn run_context(&self, ctx: &RunContext<'_>) {
        self.run_context(ctx);
    }

    fn progress(&self, line: &str) {
        let _guard = self.flush_guard();
        self.erase_progress();
        tracing::debug!("progress: {line}");
        self.draw_progress(line);
    }

    fn clear_progress(&self) {
        let _guard = self.flush_guard();
        self.erase_progress();
    }
}
