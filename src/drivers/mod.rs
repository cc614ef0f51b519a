//! Driver abstraction: uniform detect, install, and upgrade over app kinds.
pub mod confine;
pub mod custom;
pub mod package_manager;

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;

use crate::error::DriverError;
use crate::exec::Executor;
use crate::manifest::{AppEntry, DriverKind};
use crate::platform::Platform;
use crate::version::Constraint;
use custom::CustomDriver;
use package_manager::{InstalledSnapshot, PackageDriver};

/// What a driver found on the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Whether the app is present.
    pub installed: bool,
    /// Installed version, when known.
    pub version: Option<String>,
}

impl Detection {
    /// Not installed.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            installed: false,
            version: None,
        }
    }
}

/// Result of a successful install or upgrade call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The change was made.
    Done,
    /// The driver cannot make this change; a person has to.
    ManualInterventionNeeded(String),
}

/// Uniform interface over app drivers.
pub trait AppDriver {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Detect whether the app is installed and at which version.
    ///
    /// # Errors
    ///
    /// Returns an error if detection itself cannot run.
    fn detect(&self) -> Result<Detection>;

    /// Install the app.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] or [`SecurityError`](crate::error::SecurityError)
    /// when the install fails or is refused.
    fn install(&self) -> Result<ActionOutcome>;

    /// Upgrade an installed app.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the upgrade fails.
    fn upgrade(&self) -> Result<ActionOutcome>;
}

/// Shared, read-only inputs every driver in a pass borrows.
#[derive(Debug)]
pub struct DriverEnv<'a> {
    /// Process runner.
    pub executor: &'a dyn Executor,
    /// Host platform and package manager.
    pub platform: &'a Platform,
    /// Install root custom scripts are confined to.
    pub root: &'a Path,
    /// Installed packages, queried once for the pass.
    pub snapshot: &'a InstalledSnapshot,
    /// Serializes installs for managers with a global lock.
    pub install_lock: &'a Mutex<()>,
}

/// The closed set of drivers.
#[derive(Debug)]
pub enum Driver<'a> {
    /// Native package manager.
    PackageManager(PackageDriver<'a>),
    /// User script.
    Custom(CustomDriver<'a>),
}

impl<'a> Driver<'a> {
    /// Pick the driver for `entry`.
    ///
    /// # Errors
    ///
    /// Returns the skip reason when the entry does not resolve to exactly one
    /// installable identity on this platform.
    pub fn resolve(entry: &'a AppEntry, env: &DriverEnv<'a>) -> Result<Self, String> {
        match entry.driver {
            DriverKind::PackageManager => {
                let manager = env.platform.manager;
                let package = resolved_package(entry, env.platform)
                    .ok_or_else(|| format!("no package ref for {manager}"))?;
                Ok(Self::PackageManager(PackageDriver::new(
                    package.to_string(),
                    manager,
                    Constraint::parse(entry.version.as_deref()),
                    env.executor,
                    env.snapshot,
                    env.install_lock,
                )))
            }
            DriverKind::Custom => entry
                .custom
                .as_ref()
                .map(|spec| Self::Custom(CustomDriver::new(spec, env.root, env.executor)))
                .ok_or_else(|| "custom driver without a script".to_string()),
        }
    }

    /// Whether this is the package-manager driver.
    #[must_use]
    pub const fn is_package_manager(&self) -> bool {
        matches!(self, Self::PackageManager(_))
    }

    /// Package id for package-manager apps.
    #[must_use]
    pub fn package_id(&self) -> Option<&str> {
        match self {
            Self::PackageManager(d) => Some(d.package.as_str()),
            Self::Custom(_) => None,
        }
    }
}

impl AppDriver for Driver<'_> {
    fn describe(&self) -> String {
        match self {
            Self::PackageManager(d) => d.describe(),
            Self::Custom(d) => d.describe(),
        }
    }

    fn detect(&self) -> Result<Detection> {
        match self {
            Self::PackageManager(d) => d.detect(),
            Self::Custom(d) => d.detect(),
        }
    }

    fn install(&self) -> Result<ActionOutcome> {
        match self {
            Self::PackageManager(d) => d.install(),
            Self::Custom(d) => d.install(),
        }
    }

    fn upgrade(&self) -> Result<ActionOutcome> {
        match self {
            Self::PackageManager(d) => d.upgrade(),
            Self::Custom(d) => d.upgrade(),
        }
    }
}

/// Package id a package-manager entry resolves to on `platform`.
#[must_use]
pub fn resolved_package<'a>(entry: &'a AppEntry, platform: &Platform) -> Option<&'a str> {
    if entry.driver != DriverKind::PackageManager {
        return None;
    }
    entry
        .package_ref
        .as_ref()
        .and_then(|r| r.resolve(platform.manager.name(), &platform.os.to_string()))
}

/// Keep typed driver errors from the executor; wrap anything else as a
/// spawn failure of `program`.
pub(crate) fn driver_error(program: &str, err: anyhow::Error) -> DriverError {
    err.downcast::<DriverError>()
        .unwrap_or_else(|other| DriverError::Spawn {
            program: program.to_string(),
            message: other.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::MockExecutor;
    use crate::manifest::{CustomSpec, DetectRule, PackageRef};
    use crate::platform::Os;
    use package_manager::PackageManager;
    use std::collections::BTreeMap;

    fn env<'a>(
        exec: &'a MockExecutor,
        platform: &'a Platform,
        snapshot: &'a InstalledSnapshot,
        lock: &'a Mutex<()>,
    ) -> DriverEnv<'a> {
        DriverEnv {
            executor: exec,
            platform,
            root: Path::new("/opt/converge"),
            snapshot,
            install_lock: lock,
        }
    }

    #[test]
    fn package_entry_resolves_for_active_manager() {
        let exec = MockExecutor::new();
        let platform = Platform::new(Os::Linux, PackageManager::Pacman);
        let snap = InstalledSnapshot::default();
        let lock = Mutex::new(());
        let mut refs = BTreeMap::new();
        refs.insert("winget".to_string(), "Git.Git".to_string());
        refs.insert("linux".to_string(), "git".to_string());
        let entry = AppEntry {
            package_ref: Some(PackageRef::PerPlatform(refs)),
            ..AppEntry::package("git", "unused")
        };
        let driver = Driver::resolve(&entry, &env(&exec, &platform, &snap, &lock)).unwrap();
        assert!(driver.is_package_manager());
        assert_eq!(driver.package_id(), Some("git"));
    }

    #[test]
    fn unresolvable_entries_are_skipped() {
        let exec = MockExecutor::new();
        let platform = Platform::new(Os::Windows, PackageManager::Winget);
        let snap = InstalledSnapshot::default();
        let lock = Mutex::new(());
        let e = env(&exec, &platform, &snap, &lock);

        let no_ref = AppEntry {
            package_ref: None,
            ..AppEntry::package("x", "x")
        };
        assert_eq!(
            Driver::resolve(&no_ref, &e).unwrap_err(),
            "no package ref for winget"
        );

        let custom_without_spec = AppEntry {
            driver: DriverKind::Custom,
            ..AppEntry::package("y", "y")
        };
        assert!(Driver::resolve(&custom_without_spec, &e).is_err());
    }

    #[test]
    fn custom_entry_resolves() {
        let exec = MockExecutor::new();
        let platform = Platform::new(Os::Windows, PackageManager::Winget);
        let snap = InstalledSnapshot::default();
        let lock = Mutex::new(());
        let entry = AppEntry {
            driver: DriverKind::Custom,
            package_ref: None,
            custom: Some(CustomSpec {
                script: "scripts/tool.ps1".into(),
                args: Vec::new(),
                detect: DetectRule::File {
                    path: "C:\\Tool\\tool.exe".into(),
                },
            }),
            ..AppEntry::package("tool", "")
        };
        let driver = Driver::resolve(&entry, &env(&exec, &platform, &snap, &lock)).unwrap();
        assert!(!driver.is_package_manager());
        assert_eq!(driver.describe(), "scripts/tool.ps1 (custom)");
    }

    #[test]
    fn driver_error_preserves_typed_errors() {
        let typed = anyhow::Error::from(DriverError::Timeout {
            program: "winget".into(),
            secs: 5,
        });
        assert!(matches!(
            driver_error("winget", typed),
            DriverError::Timeout { secs: 5, .. }
        ));
        let other = anyhow::anyhow!("boom");
        assert!(matches!(
            driver_error("sh", other),
            DriverError::Spawn { .. }
        ));
    }
}
