//! Command: check the environment for problems before a real run.
use std::fmt;
use std::path::Path;

use anyhow::Result;

use super::{CommandSetup, Runtime, Workspace};
use crate::cli::GlobalOpts;

/// Severity of one doctor finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Check passed.
    Ok,
    /// Worth fixing, but commands still work.
    Warn,
    /// Commands will fail.
    Fail,
}

/// Result of one doctor check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// What was checked.
    pub check: &'static str,
    /// Outcome.
    pub severity: Severity,
    /// Human-readable detail.
    pub detail: String,
}

impl Finding {
    fn ok(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            severity: Severity::Ok,
            detail: detail.into(),
        }
    }

    fn warn(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            severity: Severity::Warn,
            detail: detail.into(),
        }
    }

    fn fail(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            severity: Severity::Fail,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.severity {
            Severity::Ok => "✓",
            Severity::Warn => "!",
            Severity::Fail => "✗",
        };
        write!(f, "{icon} {}: {}", self.check, self.detail)
    }
}

/// Whether files can be created in `dir` (creating it if needed).
fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".converge-doctor");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)
}

/// Run every check, stopping early only where later checks depend on an
/// earlier one.
#[must_use]
pub fn diagnose(global: &GlobalOpts, rt: &Runtime) -> Vec<Finding> {
    let mut findings = Vec::new();

    let ws = match Workspace::open(global, rt) {
        Ok(ws) => {
            findings.push(Finding::ok("root", ws.root.display().to_string()));
            findings.push(Finding::ok(
                "settings",
                format!(
                    "parallelism {}, timeout {}s",
                    ws.settings.parallelism, ws.settings.install_timeout_secs
                ),
            ));
            ws
        }
        Err(e) => {
            findings.push(Finding::fail("root and settings", format!("{e:#}")));
            return findings;
        }
    };

    let catalog = ws.catalog(rt.log.as_ref());
    if catalog.issues.is_empty() {
        findings.push(Finding::ok(
            "catalog",
            format!("{} config modules", catalog.modules.len()),
        ));
    } else {
        for issue in &catalog.issues {
            findings.push(Finding::warn("catalog", issue.to_string()));
        }
    }

    let manager = ws.platform.manager;
    if ws.executor.which(manager.program()) {
        findings.push(Finding::ok("package manager", format!("{manager} found")));
    } else {
        findings.push(Finding::fail(
            "package manager",
            format!("{} not found on PATH", manager.program()),
        ));
    }

    let store = ws.state_store();
    match store.load() {
        Ok(state) => findings.push(Finding::ok(
            "state",
            if state.last_applied.is_some() {
                "readable".to_string()
            } else {
                "no apply recorded yet".to_string()
            },
        )),
        Err(e) => findings.push(Finding::fail("state", e.to_string())),
    }
    let state_dir = ws.settings.state_path(&ws.root);
    match probe_writable(&state_dir) {
        Ok(()) => findings.push(Finding::ok("state directory", state_dir.display().to_string())),
        Err(e) => findings.push(Finding::fail(
            "state directory",
            format!("{} not writable: {e}", state_dir.display()),
        )),
    }

    match CommandSetup::load(ws, rt) {
        Ok(setup) => findings.push(Finding::ok(
            "manifest",
            format!(
                "{} ({} apps, {} modules)",
                setup.loaded.path.display(),
                setup.expanded.apps.len(),
                setup.expanded.expanded_modules.len()
            ),
        )),
        Err(e) => findings.push(Finding::fail("manifest", format!("{e:#}"))),
    }

    findings
}

/// Run the doctor command.
///
/// # Errors
///
/// Returns an error if any check failed.
pub fn run(global: &GlobalOpts, rt: &Runtime) -> Result<()> {
    let findings = diagnose(global, rt);
    rt.log.stage("Doctor");
    for finding in &findings {
        match finding.severity {
            Severity::Ok => rt.log.info(&finding.to_string()),
            Severity::Warn => rt.log.warn(&finding.to_string()),
            Severity::Fail => rt.log.error(&finding.to_string()),
        }
    }
    let failed = findings
        .iter()
        .filter(|f| f.severity == Severity::Fail)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} check(s) failed");
    }
    Ok(())
}
