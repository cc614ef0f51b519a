//! Plan, apply, and verify pipeline.
//!
//! Every pass follows the same shape: query the installed snapshot once,
//! resolve each app entry to a [`Driver`](crate::drivers::Driver), detect,
//! classify into a [`PlannedAction`](plan::PlannedAction), and (for apply)
//! execute the action on a bounded worker pool while a single consumer
//! thread renders progress.
pub mod apply;
pub mod plan;
pub mod pool;
pub mod progress;
pub mod restore;
pub mod verify;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use thiserror::Error;

use crate::drivers::package_manager::InstalledSnapshot;
use crate::drivers::resolved_package;
use crate::exec::Executor;
use crate::logging::Log;
use crate::manifest::Manifest;
use crate::platform::Platform;

/// Shared context for one engine pass.
pub struct Context {
    /// Install root: custom scripts and restore sources are confined to it.
    pub root: PathBuf,
    /// Logger for output and app outcomes.
    pub log: Arc<dyn Log>,
    /// Command executor (real processes or a test double).
    pub executor: Arc<dyn Executor>,
    /// Detected platform and package manager.
    pub platform: Platform,
    /// Classify only; no side effects.
    pub dry_run: bool,
    /// Worker count; `0` or `1` runs sequentially.
    pub parallelism: usize,
    /// Set by the Ctrl-C handler; workers stop taking new apps.
    pub cancel: Arc<AtomicBool>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.root)
            .field("log", &"<dyn Log>")
            .field("executor", &self.executor)
            .field("platform", &self.platform)
            .field("dry_run", &self.dry_run)
            .field("parallelism", &self.parallelism)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Context {
    /// Create a context with a fresh cancellation flag.
    #[must_use]
    pub fn new(
        root: PathBuf,
        log: Arc<dyn Log>,
        executor: Arc<dyn Executor>,
        platform: Platform,
        dry_run: bool,
        parallelism: usize,
    ) -> Self {
        Self {
            root,
            log,
            executor,
            platform,
            dry_run,
            parallelism,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an existing cancellation flag (typically the Ctrl-C handler's).
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Query the installed snapshot for this pass.
    ///
    /// When `required` is false and the package manager is not on PATH, an
    /// empty snapshot is returned instead of failing.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`](crate::error::DriverError) if the snapshot is
    /// required and the package manager is unavailable or fails.
    pub fn snapshot(&self, required: bool) -> Result<InstalledSnapshot> {
        let manager = self.platform.manager;
        if !required && !self.executor.which(manager.program()) {
            self.log
                .debug(&format!("{manager} not on PATH; using an empty installed snapshot"));
            return Ok(InstalledSnapshot::default());
        }
        let snapshot = InstalledSnapshot::query(manager, self.executor.as_ref())?;
        self.log
            .debug(&format!("{manager} reports {} installed packages", snapshot.len()));
        Ok(snapshot)
    }
}

/// Whether any app in `manifest` resolves to the package-manager driver on
/// `platform`, i.e. whether a pass needs the installed snapshot.
#[must_use]
pub fn needs_snapshot(manifest: &Manifest, platform: &Platform) -> bool {
    manifest
        .apps
        .iter()
        .any(|app| resolved_package(app, platform).is_some())
}

/// Lifecycle of one app within an apply pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    /// Not yet examined.
    Pending,
    /// Nothing to do, or the entry could not be resolved.
    Skipped,
    /// Install in flight.
    Installing,
    /// Install succeeded.
    Installed,
    /// Upgrade in flight.
    Upgrading,
    /// Upgrade succeeded.
    Upgraded,
    /// Detect, install, or upgrade failed, or the pass was cancelled.
    Failed,
    /// The driver cannot upgrade this app unattended.
    ManualInterventionNeeded,
}

/// An [`AppStatus::advance`] call that the lifecycle does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal app transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    /// Status before the attempted move.
    pub from: AppStatus,
    /// Rejected target status.
    pub to: AppStatus,
}

impl AppStatus {
    /// Whether `self -> next` is a legal move.
    #[must_use]
    pub const fn can_advance(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Skipped | Self::Installing | Self::Upgrading | Self::Failed
            ) | (Self::Installing, Self::Installed | Self::Failed)
                | (
                    Self::Upgrading,
                    Self::Upgraded | Self::Failed | Self::ManualInterventionNeeded
                )
        )
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalTransition`] if the move is not allowed.
    pub const fn advance(self, next: Self) -> Result<Self, IllegalTransition> {
        if self.can_advance(next) {
            Ok(next)
        } else {
            Err(IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Skipped
                | Self::Installed
                | Self::Upgraded
                | Self::Failed
                | Self::ManualInterventionNeeded
        )
    }

    /// Whether this status counts toward the failure total.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::ManualInterventionNeeded)
    }
}
