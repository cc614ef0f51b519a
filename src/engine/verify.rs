//! Verify pass: compare declared apps and checks against the machine.
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use serde::Serialize;

use super::{Context, needs_snapshot};
use crate::drivers::custom::{expand_env, registry_exists};
use crate::drivers::{AppDriver, Driver, DriverEnv};
use crate::manifest::{AppEntry, Manifest, VerifyCheck, VerifyEntry};
use crate::version::{Constraint, VersionCheck};

/// Classification of one declared app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppVerdict {
    /// Installed and satisfying its constraint.
    Ok {
        /// Installed version, if known.
        installed: Option<String>,
    },
    /// Not installed.
    Missing,
    /// Installed at a version that does not satisfy the constraint (or at an
    /// unknown version under an active constraint).
    VersionMismatch {
        /// Installed version, if known.
        installed: Option<String>,
    },
    /// Entry does not resolve on this platform.
    Skipped(String),
}

/// What verify saw for one resolvable app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedApp {
    /// App id from the manifest.
    pub id: String,
    /// Whether detect found it.
    pub installed: bool,
    /// Installed version, if known.
    pub version: Option<String>,
}

/// Fresh drift report for one verify pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    /// Apps installed at an acceptable version.
    pub ok_count: u32,
    /// Declared apps not installed.
    pub missing_count: u32,
    /// Declared apps at the wrong version.
    pub version_mismatch_count: u32,
    /// Installed packages no resolved entry declares.
    pub extra_count: u32,
    /// Ids of OK apps.
    pub ok_apps: Vec<String>,
    /// Ids of missing apps.
    pub missing_apps: Vec<String>,
    /// Ids of version-mismatched apps.
    pub version_mismatch_apps: Vec<String>,
    /// Installed package ids not declared, sorted.
    pub extra_apps: Vec<String>,
    /// Entries skipped as unresolvable.
    pub skipped_apps: Vec<String>,
    /// Verify entries that held.
    pub checks_passed: u32,
    /// Verify entries that did not hold.
    pub checks_failed: Vec<String>,
    /// Per-app observations, in manifest order, for the state store.
    #[serde(skip)]
    pub observed: Vec<ObservedApp>,
}

impl VerifyResult {
    /// Missing apps, mismatches, and failed checks fail a verify; extras do
    /// not.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.missing_count == 0 && self.version_mismatch_count == 0 && self.checks_failed.is_empty()
    }

    fn record(&mut self, id: &str, verdict: &AppVerdict) {
        let observation = match verdict {
            AppVerdict::Ok { installed } | AppVerdict::VersionMismatch { installed } => {
                Some((true, installed.clone()))
            }
            AppVerdict::Missing => Some((false, None)),
            AppVerdict::Skipped(_) => None,
        };
        if let Some((installed, version)) = observation {
            self.observed.push(ObservedApp {
                id: id.to_string(),
                installed,
                version,
            });
        }
        match verdict {
            AppVerdict::Ok { .. } => {
                self.ok_count += 1;
                self.ok_apps.push(id.to_string());
            }
            AppVerdict::Missing => {
                self.missing_count += 1;
                self.missing_apps.push(id.to_string());
            }
            AppVerdict::VersionMismatch { .. } => {
                self.version_mismatch_count += 1;
                self.version_mismatch_apps.push(id.to_string());
            }
            AppVerdict::Skipped(_) => self.skipped_apps.push(id.to_string()),
        }
    }
}

/// Detect `entry` and classify it against its constraint.
///
/// # Errors
///
/// Returns an error if detection itself fails.
pub fn verify_app(entry: &AppEntry, env: &DriverEnv<'_>) -> Result<AppVerdict> {
    let driver = match Driver::resolve(entry, env) {
        Ok(driver) => driver,
        Err(reason) => return Ok(AppVerdict::Skipped(reason)),
    };
    let detection = driver.detect()?;
    if !detection.installed {
        return Ok(AppVerdict::Missing);
    }
    Ok(
        match Constraint::parse(entry.version.as_deref()).check(detection.version.as_deref()) {
            VersionCheck::Satisfied => AppVerdict::Ok {
                installed: detection.version,
            },
            VersionCheck::Unsatisfied | VersionCheck::Unknown => AppVerdict::VersionMismatch {
                installed: detection.version,
            },
        },
    )
}

/// Evaluate one verify entry.
///
/// # Errors
///
/// Returns an error if a registry probe cannot be started.
pub fn run_check(ctx: &Context, entry: &VerifyEntry) -> Result<bool> {
    Ok(match &entry.check {
        VerifyCheck::FileExists { path } => Path::new(&expand_env(path)).exists(),
        VerifyCheck::CommandExists { command } => ctx.executor.which(command),
        VerifyCheck::RegistryKeyExists { key, value } => {
            registry_exists(ctx.executor.as_ref(), key, value.as_deref())?
        }
    })
}

/// Re-detect every app, compute extras, and evaluate every verify entry.
///
/// # Errors
///
/// Returns an error if the installed snapshot is needed and cannot be
/// queried.
pub fn verify(ctx: &Context, manifest: &Manifest) -> Result<VerifyResult> {
    ctx.log.stage("Verifying");
    let snapshot = ctx.snapshot(needs_snapshot(manifest, &ctx.platform))?;
    let lock = Mutex::new(());
    let env = DriverEnv {
        executor: ctx.executor.as_ref(),
        platform: &ctx.platform,
        root: &ctx.root,
        snapshot: &snapshot,
        install_lock: &lock,
    };

    let mut result = VerifyResult::default();
    let mut declared = BTreeSet::new();
    for entry in &manifest.apps {
        if let Some(package) = crate::drivers::resolved_package(entry, &ctx.platform) {
            declared.insert(package.to_lowercase());
        }
        let verdict = verify_app(entry, &env).unwrap_or_else(|e| {
            ctx.log.error(&format!("failed to detect {}: {e:#}", entry.id));
            AppVerdict::Missing
        });
        match &verdict {
            AppVerdict::Ok { .. } => ctx.log.debug(&format!("ok: {}", entry.id)),
            AppVerdict::Missing => ctx.log.warn(&format!("missing: {}", entry.id)),
            AppVerdict::VersionMismatch { installed } => ctx.log.warn(&format!(
                "version mismatch: {} (installed {}, wanted {})",
                entry.id,
                installed.as_deref().unwrap_or("unknown"),
                Constraint::parse(entry.version.as_deref())
            )),
            AppVerdict::Skipped(reason) => {
                ctx.log.debug(&format!("skipping {}: {reason}", entry.id));
            }
        }
        result.record(&entry.id, &verdict);
    }

    result.extra_apps = snapshot
        .ids()
        .into_iter()
        .filter(|id| !declared.contains(&id.to_lowercase()))
        .collect();
    result.extra_count = u32::try_from(result.extra_apps.len()).unwrap_or(u32::MAX);
    if result.extra_count > 0 {
        ctx.log.debug(&format!("extra: {}", result.extra_apps.join(", ")));
    }

    for entry in &manifest.verify {
        let passed = run_check(ctx, entry).unwrap_or_else(|e| {
            ctx.log.error(&format!("check {} could not run: {e:#}", entry.check));
            false
        });
        if passed {
            result.checks_passed += 1;
            ctx.log.debug(&format!("check passed: {}", entry.check));
        } else {
            ctx.log.warn(&format!("check failed: {}", entry.check));
            result.checks_failed.push(entry.check.to_string());
        }
    }

    ctx.log.info(&format!(
        "{} ok, {} missing, {} version mismatch, {} extra, {}/{} checks passed",
        result.ok_count,
        result.missing_count,
        result.version_mismatch_count,
        result.extra_count,
        result.checks_passed,
        manifest.verify.len()
    ));
    Ok(result)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::drivers::package_manager::PackageManager;
    use crate::exec::test_helpers::MockExecutor;
    use crate::logging::test_helpers::RecordingLog;
    use crate::platform::{Os, Platform};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn context(exec: MockExecutor) -> Context {
        Context::new(
            PathBuf::from("/nonexistent/converge-root"),
            Arc::new(RecordingLog::new()),
            Arc::new(exec),
            Platform::new(Os::Linux, PackageManager::Pacman),
            false,
            1,
        )
    }

    fn installed(listing: &str) -> MockExecutor {
        MockExecutor::new()
            .with_program("pacman")
            .respond("pacman -Q", true, listing)
    }

    #[test]
    fn drift_is_symmetric() {
        let mut m = Manifest::named("m");
        m.apps = vec![AppEntry::package("a", "a"), AppEntry::package("b", "b")];
        let result = verify(&context(installed("b 1.0\nc 1.0\n")), &m).unwrap();
        assert_eq!(result.missing_apps, ["a"]);
        assert_eq!(result.extra_apps, ["c"]);
        assert_eq!(result.ok_apps, ["b"]);
        assert!(!result.success());
    }

    #[test]
    fn extras_alone_do_not_fail() {
        let mut m = Manifest::named("m");
        m.apps = vec![AppEntry::package("B", "B")];
        let result = verify(&context(installed("b 1.0\nc 1.0\n")), &m).unwrap();
        assert_eq!(result.ok_count, 1);
        assert_eq!(result.extra_count, 1);
        assert!(result.success());
    }

    #[test]
    fn version_mismatch_and_unknown_version_fail_closed() {
        let mut m = Manifest::named("m");
        m.apps = vec![
            AppEntry::package("git", "git").with_version(">=3.0"),
            AppEntry::package("vim", "vim").with_version("9.1"),
        ];
        let result = verify(&context(installed("git 2.44.0\nvim\n")), &m).unwrap();
        assert_eq!(result.version_mismatch_apps, ["git", "vim"]);
        assert!(!result.success());
    }

    #[test]
    fn checks_are_evaluated() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = Manifest::named("m");
        m.verify = vec![
            VerifyEntry {
                check: VerifyCheck::FileExists {
                    path: tmp.path().to_string_lossy().into_owned(),
                },
                from_module: None,
            },
            VerifyEntry {
                check: VerifyCheck::CommandExists {
                    command: "git".into(),
                },
                from_module: Some("git".into()),
            },
        ];
        let result = verify(&context(MockExecutor::new()), &m).unwrap();
        assert_eq!(result.checks_passed, 1);
        assert_eq!(result.checks_failed, ["command-exists git"]);
        assert!(!result.success());
    }

    #[test]
    fn unresolvable_entries_are_skipped() {
        let mut m = Manifest::named("m");
        m.apps = vec![AppEntry {
            package_ref: None,
            ..AppEntry::package("ghost", "")
        }];
        let result = verify(&context(MockExecutor::new()), &m).unwrap();
        assert_eq!(result.skipped_apps, ["ghost"]);
        assert!(result.success());
    }
}
