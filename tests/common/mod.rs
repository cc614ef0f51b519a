// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed repository, a fake pacman that
// remembers what it installed, a recording logger, and a fluent builder so
// each integration test can set up an isolated environment without
// repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{TimeZone as _, Utc};
use converge_cli::cli::GlobalOpts;
use converge_cli::commands::Runtime;
use converge_cli::exec::{ExecResult, Executor};
use converge_cli::logging::{Log, OutcomeStatus, RunContext};
use converge_cli::state::FixedClock;

/// Settings written into every test repository.
const SETTINGS: &str = "package_manager = \"pacman\"\nparallelism = 2\n";

/// An [`Executor`] that behaves like pacman over an in-memory package set.
///
/// `pacman -Q` lists the set; `sudo pacman -S --needed` adds a package at
/// its available version; `sudo pacman -S` (upgrade) bumps it to the
/// available version. Packages listed in `broken` fail to install. Every
/// command line is recorded.
#[derive(Debug, Default)]
pub struct FakePacman {
    installed: Mutex<BTreeMap<String, String>>,
    available: BTreeMap<String, String>,
    broken: BTreeSet<String>,
    programs: BTreeSet<String>,
    queries_left: Mutex<Option<usize>>,
    calls: Mutex<Vec<String>>,
}

impl FakePacman {
    pub fn new() -> Self {
        let mut programs = BTreeSet::new();
        programs.insert("pacman".to_string());
        Self {
            programs,
            ..Self::default()
        }
    }

    /// Mark `id` as installed at `version`.
    pub fn installed(self, id: &str, version: &str) -> Self {
        self.installed
            .lock()
            .unwrap()
            .insert(id.to_string(), version.to_string());
        self
    }

    /// Version a fresh install or upgrade of `id` lands on.
    pub fn available(mut self, id: &str, version: &str) -> Self {
        self.available.insert(id.to_string(), version.to_string());
        self
    }

    /// Make installs of `id` fail.
    pub fn broken(mut self, id: &str) -> Self {
        self.broken.insert(id.to_string());
        self
    }

    /// Let `pacman -Q` succeed `n` more times, then fail.
    pub fn fail_queries_after(self, n: usize) -> Self {
        *self.queries_left.lock().unwrap() = Some(n);
        self
    }

    /// Put `program` on the fake PATH.
    pub fn with_program(mut self, program: &str) -> Self {
        self.programs.insert(program.to_string());
        self
    }

    /// Every command line executed so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines that changed the package set.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("sudo "))
            .collect()
    }

    fn version_for(&self, id: &str) -> String {
        self.available
            .get(id)
            .cloned()
            .unwrap_or_else(|| "1.0.0-1".to_string())
    }

    fn answer(&self, line: &str, args: &[&str]) -> ExecResult {
        let ok = |stdout: String| ExecResult {
            stdout,
            stderr: String::new(),
            success: true,
            code: Some(0),
        };
        let fail = |stderr: &str| ExecResult {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
            code: Some(1),
        };

        if line == "pacman -Q" {
            if let Some(left) = self.queries_left.lock().unwrap().as_mut() {
                if *left == 0 {
                    return fail("error: could not open database");
                }
                *left -= 1;
            }
            let listing = self
                .installed
                .lock()
                .unwrap()
                .iter()
                .map(|(id, v)| format!("{id} {v}\n"))
                .collect();
            return ok(listing);
        }
        if line.starts_with("sudo pacman -S") {
            let Some(package) = args.last() else {
                return fail("no package");
            };
            if self.broken.contains(*package) {
                return fail("error: target not found");
            }
            let version = self.version_for(package);
            self.installed
                .lock()
                .unwrap()
                .insert((*package).to_string(), version);
            return ok(String::new());
        }
        fail("unexpected call")
    }
}

impl Executor for FakePacman {
    fn run_in(&self, _dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
        self.run_unchecked(program, args)
    }

    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap().push(line.clone());
        Ok(self.answer(&line, args))
    }

    fn which(&self, program: &str) -> bool {
        self.programs.contains(program)
    }
}

/// A [`Log`] that keeps every message and outcome in memory.
#[derive(Debug, Default)]
pub struct RecordingLog {
    lines: Mutex<Vec<String>>,
    outcomes: Mutex<Vec<(String, OutcomeStatus)>>,
}

impl RecordingLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }

    pub fn outcomes(&self) -> Vec<(String, OutcomeStatus)> {
        self.outcomes.lock().unwrap().clone()
    }

    fn push(&self, level: &str, msg: &str) {
        self.lines.lock().unwrap().push(format!("{level}: {msg}"));
    }
}

impl Log for RecordingLog {
    fn stage(&self, msg: &str) {
        self.push("stage", msg);
    }
    fn info(&self, msg: &str) {
        self.push("info", msg);
    }
    fn debug(&self, msg: &str) {
        self.push("debug", msg);
    }
    fn warn(&self, msg: &str) {
        self.push("warn", msg);
    }
    fn error(&self, msg: &str) {
        self.push("error", msg);
    }
    fn dry_run(&self, msg: &str) {
        self.push("dry-run", msg);
    }
    fn record_app(&self, name: &str, status: OutcomeStatus, _message: Option<&str>) {
        self.outcomes
            .lock()
            .unwrap()
            .push((name.to_string(), status));
    }
    fn run_context(&self, ctx: &RunContext<'_>) {
        let manifest = ctx
            .manifest
            .map_or_else(String::new, |m| m.display().to_string());
        self.push(
            "run",
            &format!("{} | {manifest} | {}", ctx.root.display(), ctx.platform),
        );
    }
}

/// An isolated test repository backed by a [`tempfile::TempDir`].
///
/// The directory is automatically deleted when dropped (via the underlying
/// [`tempfile::TempDir`]).
pub struct IntegrationTestContext {
    /// Temporary directory containing the test repository.
    pub root: tempfile::TempDir,
    /// Package manager double shared by every command run in this context.
    pub pacman: Arc<FakePacman>,
    /// Log shared by every command run in this context.
    pub log: Arc<RecordingLog>,
}

impl IntegrationTestContext {
    /// Path to the repository root.
    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    /// Global options pointing at this repository.
    pub fn global(&self) -> GlobalOpts {
        GlobalOpts {
            root: Some(self.root.path().to_path_buf()),
            ..GlobalOpts::default()
        }
    }

    /// Global options for a dry run.
    pub fn dry_run(&self) -> GlobalOpts {
        GlobalOpts {
            dry_run: true,
            ..self.global()
        }
    }

    /// Runtime over the fake package manager, the recording log, and a
    /// fixed clock.
    pub fn runtime(&self) -> Runtime {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        Runtime::new(Arc::clone(&self.log) as Arc<dyn Log>)
            .with_executor(Arc::clone(&self.pacman) as Arc<dyn Executor>)
            .with_clock(Arc::new(clock))
    }

    /// Path of the state file.
    pub fn state_path(&self) -> PathBuf {
        self.root.path().join(".converge/state.json")
    }

    /// Read a repository file as text.
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root.path().join(rel)).expect("read file")
    }

    /// Write a repository file, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(path, content).expect("write file");
    }
}

/// Fluent builder for [`IntegrationTestContext`].
///
/// Allows individual tests to customise the repository before the context
/// is finalised without modifying the shared setup.
pub struct TestContextBuilder {
    root: tempfile::TempDir,
    pacman: FakePacman,
}

impl TestContextBuilder {
    /// Begin building a context with `converge.toml` selecting pacman.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        std::fs::write(root.path().join("converge.toml"), SETTINGS).expect("write settings");
        Self {
            root,
            pacman: FakePacman::new(),
        }
    }

    /// Write `manifest.jsonc` at the repository root.
    pub fn with_manifest(self, content: &str) -> Self {
        self.with_file("manifest.jsonc", content)
    }

    /// Write any file relative to the repository root.
    pub fn with_file(self, rel: &str, content: &str) -> Self {
        let path = self.root.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(path, content).expect("write file");
        self
    }

    /// Configure the package manager double.
    pub fn with_pacman(mut self, configure: impl FnOnce(FakePacman) -> FakePacman) -> Self {
        self.pacman = configure(self.pacman);
        self
    }

    /// Finish building and return the configured context.
    pub fn build(self) -> IntegrationTestContext {
        IntegrationTestContext {
            root: self.root,
            pacman: Arc::new(self.pacman),
            log: Arc::new(RecordingLog::default()),
        }
    }
}
