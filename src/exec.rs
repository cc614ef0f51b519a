//! Subprocess execution behind an injectable [`Executor`] trait.
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

use crate::error::DriverError;

/// Polling interval while waiting on a child with a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

impl ExecResult {
    /// Combined stdout and stderr, trimmed, for failure reporting.
    ///
    /// Package managers such as winget write most diagnostics to stdout, so
    /// both streams are kept.
    #[must_use]
    pub fn detail(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, true) => String::new(),
            (false, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{out}\n{err}"),
        }
    }

    /// Convert a non-zero exit into a [`DriverError`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NonZeroExit`] when the process failed.
    pub fn into_checked(self, program: &str) -> Result<Self, DriverError> {
        if self.success {
            Ok(self)
        } else {
            Err(DriverError::NonZeroExit {
                program: program.to_string(),
                code: self.code.unwrap_or(-1),
                detail: self.detail(),
            })
        }
    }
}

/// Abstraction over process execution so drivers can be tested without
/// spawning real package managers.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run a command and return its output. Fails if the command exits non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started, times out, or
    /// exits with a non-zero status.
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let result = self.run_unchecked(program, args)?;
        if !result.success {
            bail!(
                "{program} failed (exit {}): {}",
                result.code.unwrap_or(-1),
                result.detail()
            );
        }
        Ok(result)
    }

    /// Run a command in a specific directory, allowing failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started or times out.
    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Run a command, allowing failure (returns result without bailing).
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started or times out.
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Check if a program is available on PATH.
    fn which(&self, program: &str) -> bool;
}

/// Production [`Executor`] that spawns real processes.
///
/// Every child is bounded by `timeout`; when it elapses the child is killed
/// and the call fails with [`DriverError::Timeout`].
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor {
    timeout: Option<Duration>,
}

impl SystemExecutor {
    /// Create an executor with no timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Create an executor whose children are killed after `timeout`.
    ///
    /// A zero duration disables the timeout.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Self { timeout: None }
        } else {
            Self {
                timeout: Some(timeout),
            }
        }
    }

    fn execute(&self, mut cmd: Command, label: &str) -> Result<ExecResult> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = cmd.spawn().map_err(|e| DriverError::Spawn {
            program: label.to_string(),
            message: e.to_string(),
        })?;
        match self.timeout {
            None => {
                let output = child
                    .wait_with_output()
                    .with_context(|| format!("failed to wait for {label}"))?;
                Ok(ExecResult::from(output))
            }
            Some(timeout) => wait_with_deadline(child, label, timeout),
        }
    }
}

/// Drain a child's pipe on a background thread so a chatty process cannot
/// block on a full pipe while we poll for exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).ok();
        }
        buf
    })
}

fn wait_with_deadline(mut child: Child, label: &str, timeout: Duration) -> Result<ExecResult> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to wait for {label}"))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            child.kill().ok();
            child.wait().ok();
            return Err(DriverError::Timeout {
                program: label.to_string(),
                secs: timeout.as_secs(),
            }
            .into());
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    Ok(ExecResult {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        success: status.success(),
        code: status.code(),
    })
}

impl Executor for SystemExecutor {
    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(dir);
        self.execute(cmd, program)
    }

    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.execute(cmd, program)
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
