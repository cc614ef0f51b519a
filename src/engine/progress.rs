//! Live progress over a bounded producer/consumer channel.
//!
//! Workers only send [`ProgressEvent`]s; a single consumer thread owns the
//! [`ProgressState`] and redraws the progress line after every event.
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use crate::logging::Log;

/// Channel capacity; producers block once this many events are unread.
const CHANNEL_CAPACITY: usize = 64;

/// Width of the `[####----]` bar, in cells.
const BAR_WIDTH: usize = 20;

/// Running app names shown before collapsing into `+N more`.
const MAX_RUNNING_SHOWN: usize = 3;

/// A worker-side notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A worker picked up the app.
    AppStarted(String),
    /// A worker finished the app.
    AppCompleted {
        /// App id.
        id: String,
        /// Whether the app converged.
        success: bool,
    },
}

/// Folded view of every event seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// Apps in the pass.
    pub total: usize,
    /// Apps finished, successfully or not.
    pub completed_count: usize,
    /// Apps finished unsuccessfully.
    pub failed_count: usize,
    /// Apps currently in flight.
    pub running_apps: BTreeSet<String>,
    /// Apps not yet picked up.
    pub queued_count: usize,
}

impl ProgressState {
    /// Fresh state for a pass of `total` apps, all queued.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            queued_count: total,
            ..Self::default()
        }
    }

    /// Fold one event into the state.
    ///
    /// A completion for an app that never reported a start still leaves the
    /// queue, so counts stay consistent whatever order events arrive in.
    pub fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::AppStarted(id) => {
                if self.running_apps.insert(id) {
                    self.queued_count = self.queued_count.saturating_sub(1);
                }
            }
            ProgressEvent::AppCompleted { id, success } => {
                if !self.running_apps.remove(&id) {
                    self.queued_count = self.queued_count.saturating_sub(1);
                }
                self.completed_count += 1;
                if !success {
                    self.failed_count += 1;
                }
            }
        }
    }

    /// Whether every app has completed.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.completed_count >= self.total
    }

    /// `[#####---------------] 3/12`
    #[must_use]
    pub fn bar(&self) -> String {
        let filled = if self.total == 0 {
            BAR_WIDTH
        } else {
            (self.completed_count.min(self.total) * BAR_WIDTH) / self.total
        };
        format!(
            "[{}{}] {}/{}",
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            self.completed_count,
            self.total
        )
    }

    /// `git, neovim, ripgrep +2 more`, or empty when nothing is running.
    #[must_use]
    pub fn running_line(&self) -> String {
        let shown: Vec<&str> = self
            .running_apps
            .iter()
            .take(MAX_RUNNING_SHOWN)
            .map(String::as_str)
            .collect();
        let mut line = shown.join(", ");
        let hidden = self.running_apps.len().saturating_sub(shown.len());
        if hidden > 0 {
            line.push_str(&format!(" +{hidden} more"));
        }
        line
    }

    /// The full single-row display: bar, failure count, running apps.
    #[must_use]
    pub fn render(&self) -> String {
        let mut line = self.bar();
        if self.failed_count > 0 {
            line.push_str(&format!("  {} failed", self.failed_count));
        }
        let running = self.running_line();
        if !running.is_empty() {
            line.push_str("  ");
            line.push_str(&running);
        }
        line
    }
}

/// Owner of the consumer thread.
///
/// Call [`sender`](Self::sender) for each worker, then
/// [`finish`](Self::finish) once they are done to collect the final state.
pub struct ProgressReporter {
    sender: Option<SyncSender<ProgressEvent>>,
    handle: Option<JoinHandle<ProgressState>>,
    total: usize,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("total", &self.total)
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Spawn the consumer for a pass of `total` apps.
    #[must_use]
    pub fn start(total: usize, log: Arc<dyn Log>) -> Self {
        let (sender, receiver) = sync_channel(CHANNEL_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("converge-progress".to_string())
            .spawn(move || consume(total, &receiver, log.as_ref()))
            .ok();
        Self {
            sender: Some(sender),
            handle,
            total,
        }
    }

    /// A producer handle for one worker.
    #[must_use]
    pub fn sender(&self) -> Option<SyncSender<ProgressEvent>> {
        self.sender.clone()
    }

    /// Close the channel, wait for the consumer to drain it, and return the
    /// final state.
    #[must_use]
    pub fn finish(mut self) -> ProgressState {
        drop(self.sender.take());
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_else(|| ProgressState::new(self.total))
    }
}

/// Send `event` if a channel exists. A closed channel only loses display.
pub fn emit(sender: Option<&SyncSender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = sender {
        let _ = tx.send(event);
    }
}

fn consume(total: usize, receiver: &Receiver<ProgressEvent>, log: &dyn Log) -> ProgressState {
    let mut state = ProgressState::new(total);
    log.progress(&state.render());
    for event in receiver {
        state.apply(event);
        log.progress(&state.render());
    }
    log.clear_progress();
    state
}
