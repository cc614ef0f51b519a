//! Built-in package-manager driver (winget, pacman, apt).
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{ActionOutcome, AppDriver, Detection, driver_error};
use crate::error::DriverError;
use crate::exec::Executor;
use crate::version::Constraint;

/// Supported package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Windows packages (winget).
    Winget,
    /// Arch Linux packages (pacman).
    Pacman,
    /// Debian/Ubuntu packages (apt, queried through dpkg).
    Apt,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PackageManager {
    /// Lowercase name, also the key used in per-platform refs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Winget => "winget",
            Self::Pacman => "pacman",
            Self::Apt => "apt",
        }
    }

    /// Program that must be on PATH for this manager to work.
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Winget => "winget",
            Self::Pacman => "pacman",
            Self::Apt => "dpkg-query",
        }
    }

    /// Whether installs hold a global database lock and must be serialized.
    #[must_use]
    pub const fn needs_lock(self) -> bool {
        matches!(self, Self::Pacman | Self::Apt)
    }

    fn install_command(self, package: &str, constraint: &Constraint) -> (&'static str, Vec<String>) {
        let owned = |args: &[&str]| args.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        match self {
            Self::Winget => {
                let mut args = owned(&[
                    "install",
                    "--id",
                    package,
                    "--exact",
                    "--source",
                    "winget",
                    "--accept-source-agreements",
                    "--accept-package-agreements",
                    "--disable-interactivity",
                ]);
                if let Constraint::Exact(version) = constraint {
                    args.push("--version".to_string());
                    args.push(version.clone());
                }
                ("winget", args)
            }
            Self::Pacman => (
                "sudo",
                owned(&["pacman", "-S", "--needed", "--noconfirm", package]),
            ),
            Self::Apt => ("sudo", owned(&["apt-get", "install", "-y", package])),
        }
    }

    fn upgrade_command(self, package: &str) -> (&'static str, Vec<String>) {
        let owned = |args: &[&str]| args.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        match self {
            Self::Winget => (
                "winget",
                owned(&[
                    "upgrade",
                    "--id",
                    package,
                    "--exact",
                    "--source",
                    "winget",
                    "--accept-source-agreements",
                    "--accept-package-agreements",
                    "--disable-interactivity",
                ]),
            ),
            Self::Pacman => ("sudo", owned(&["pacman", "-S", "--noconfirm", package])),
            Self::Apt => (
                "sudo",
                owned(&["apt-get", "install", "-y", "--only-upgrade", package]),
            ),
        }
    }
}

/// One installed package as reported by the package manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Package id with its original casing.
    pub id: String,
    /// Installed version, when the manager reports one.
    pub version: Option<String>,
    /// Display name (winget only).
    pub name: Option<String>,
}

/// Point-in-time list of installed packages with case-insensitive lookup.
///
/// Queried once per pass and shared read-only by every worker.
#[derive(Debug, Clone, Default)]
pub struct InstalledSnapshot {
    packages: BTreeMap<String, InstalledPackage>,
}

impl InstalledSnapshot {
    /// Build a snapshot from already-known packages.
    pub fn from_packages(packages: impl IntoIterator<Item = InstalledPackage>) -> Self {
        Self {
            packages: packages
                .into_iter()
                .map(|p| (p.id.to_lowercase(), p))
                .collect(),
        }
    }

    /// Query `manager` for everything installed.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::ManagerUnavailable`] if the manager is not on
    /// PATH, or a [`DriverError`] if the listing command fails.
    pub fn query(manager: PackageManager, executor: &dyn Executor) -> Result<Self> {
        if !executor.which(manager.program()) {
            return Err(DriverError::ManagerUnavailable(manager.name().to_string()).into());
        }
        let (program, args) = match manager {
            PackageManager::Winget => (
                "winget",
                vec![
                    "list",
                    "--accept-source-agreements",
                    "--disable-interactivity",
                ],
            ),
            PackageManager::Pacman => ("pacman", vec!["-Q"]),
            PackageManager::Apt => ("dpkg-query", vec!["-W", "-f=${Package}\t${Version}\n"]),
        };
        let result = executor
            .run_unchecked(program, &args)
            .map_err(|e| driver_error(program, e))?
            .into_checked(program)?;
        let packages = match manager {
            PackageManager::Winget => parse_winget_list(&result.stdout),
            PackageManager::Pacman => parse_name_version(&result.stdout, char::is_whitespace),
            PackageManager::Apt => parse_name_version(&result.stdout, |c| c == '\t'),
        };
        let packages = packages.into_iter().map(|mut p| {
            if manager != PackageManager::Winget {
                p.version = p.version.map(|v| upstream_version(&v).to_string());
            }
            p
        });
        Ok(Self::from_packages(packages))
    }

    /// Look up a package id case-insensitively.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&InstalledPackage> {
        self.packages.get(&id.to_lowercase())
    }

    /// Whether the snapshot contains `id` (case-insensitive).
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Every installed package, sorted by lowercase id.
    pub fn packages(&self) -> impl Iterator<Item = &InstalledPackage> {
        self.packages.values()
    }

    /// Every installed id with original casing, sorted case-insensitively.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.packages.values().map(|p| p.id.clone()).collect()
    }

    /// Display names where the manager reports them, else ids.
    #[must_use]
    pub fn display_names(&self) -> Vec<String> {
        self.packages
            .values()
            .map(|p| p.name.clone().unwrap_or_else(|| p.id.clone()))
            .collect()
    }

    /// Number of installed packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether nothing is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Parse `name<sep>version` lines (pacman `-Q`, dpkg-query).
fn parse_name_version(output: &str, sep: impl Fn(char) -> bool) -> Vec<InstalledPackage> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let mut parts = line.splitn(2, &sep);
            let id = parts.next()?.trim();
            let version = parts.next().map(str::trim).filter(|v| !v.is_empty());
            Some(InstalledPackage {
                id: id.to_string(),
                version: version.map(str::to_string),
                name: None,
            })
        })
        .collect()
}

/// Upstream part of a pacman or Debian version.
///
/// Both formats are `[epoch:]upstream[-release]`. The epoch and the package
/// release are dropped so `1:2.43.0-1ubuntu7` compares as `2.43.0`.
fn upstream_version(version: &str) -> &str {
    let version = match version.split_once(':') {
        Some((epoch, rest)) if !epoch.is_empty() && epoch.bytes().all(|b| b.is_ascii_digit()) => {
            rest
        }
        _ => version,
    };
    match version.rsplit_once('-') {
        Some((upstream, _)) if !upstream.is_empty() => upstream,
        _ => version,
    }
}

fn column(chars: &[char], start: usize, end: Option<usize>) -> String {
    let end = end.unwrap_or(chars.len()).min(chars.len());
    chars
        .iter()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Parse the `winget list` table using the header's column offsets.
///
/// Winget prints spinner frames separated by `\r` before the table, so only
/// the text after the last carriage return on each line is considered.
fn parse_winget_list(output: &str) -> Vec<InstalledPackage> {
    let lines: Vec<&str> = output
        .lines()
        .map(|l| l.rsplit('\r').next().unwrap_or(l))
        .collect();

    let Some(header_idx) = lines
        .iter()
        .position(|l| l.starts_with("Name") && l.contains(" Id ") && l.contains(" Version"))
    else {
        return Vec::new();
    };
    let Some(header) = lines.get(header_idx) else {
        return Vec::new();
    };
    let header: Vec<char> = header.chars().collect();
    let find = |label: &str| -> Option<usize> {
        let text: String = header.iter().collect();
        text.find(&format!(" {label}"))
            .map(|byte| text.get(..=byte).map_or(0, |s| s.chars().count()))
    };
    let (Some(id_col), Some(version_col)) = (find("Id"), find("Version")) else {
        return Vec::new();
    };
    let next_col = find("Available").or_else(|| find("Source"));

    lines
        .iter()
        .skip(header_idx + 1)
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('-'))
        .filter_map(|line| {
            let chars: Vec<char> = line.chars().collect();
            let id = column(&chars, id_col, Some(version_col));
            if id.is_empty() || id.contains(' ') {
                return None;
            }
            let name = column(&chars, 0, Some(id_col));
            let version = column(&chars, version_col, next_col);
            Some(InstalledPackage {
                id,
                version: (!version.is_empty() && version != "Unknown").then_some(version),
                name: (!name.is_empty()).then_some(name),
            })
        })
        .collect()
}

/// Driver for one package-manager app.
#[derive(Debug)]
pub struct PackageDriver<'a> {
    /// Resolved package id.
    pub package: String,
    /// Manager used to install it.
    pub manager: PackageManager,
    constraint: Constraint,
    executor: &'a dyn Executor,
    snapshot: &'a InstalledSnapshot,
    lock: &'a Mutex<()>,
}

impl<'a> PackageDriver<'a> {
    /// Create a driver for `package`.
    #[must_use]
    pub const fn new(
        package: String,
        manager: PackageManager,
        constraint: Constraint,
        executor: &'a dyn Executor,
        snapshot: &'a InstalledSnapshot,
        lock: &'a Mutex<()>,
    ) -> Self {
        Self {
            package,
            manager,
            constraint,
            executor,
            snapshot,
            lock,
        }
    }

    fn run(&self, program: &str, args: &[String]) -> Result<ActionOutcome> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let _guard = self
            .manager
            .needs_lock()
            .then(|| self.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.executor
            .run_unchecked(program, &args)
            .map_err(|e| driver_error(program, e))?
            .into_checked(program)?;
        Ok(ActionOutcome::Done)
    }
}

impl AppDriver for PackageDriver<'_> {
    fn describe(&self) -> String {
        format!("{} ({})", self.package, self.manager)
    }

    fn detect(&self) -> Result<Detection> {
        Ok(self
            .snapshot
            .get(&self.package)
            .map_or_else(Detection::missing, |p| Detection {
                installed: true,
                version: p.version.clone(),
            }))
    }

    fn install(&self) -> Result<ActionOutcome> {
        let (program, args) = self.manager.install_command(&self.package, &self.constraint);
        self.run(program, &args)
    }

    fn upgrade(&self) -> Result<ActionOutcome> {
        let (program, args) = self.manager.upgrade_command(&self.package);
        self.run(program, &args)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::MockExecutor;

    const WINGET_LIST: &str = "\r   - \r   \\ \r\
Name                Id                   Version   Available Source\n\
--------------------------------------------------------------------\n\
Git                 Git.Git              2.44.0    2.45.1    winget\n\
Microsoft Edge      Microsoft.Edge       124.0.2478          winget\n\
Some Tool           ARP\\Machine\\X64\\Tool  Unknown\n";

    #[test]
    fn display_and_names() {
        assert_eq!(PackageManager::Winget.to_string(), "winget");
        assert_eq!(PackageManager::Apt.program(), "dpkg-query");
        assert!(PackageManager::Pacman.needs_lock());
        assert!(!PackageManager::Winget.needs_lock());
    }

    #[test]
    fn parse_pacman_output() {
        let pkgs = parse_name_version("git 2.39.0-1\nvim 9.0.0\n\n", char::is_whitespace);
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[0].id, "git");
        assert_eq!(pkgs[0].version.as_deref(), Some("2.39.0-1"));
    }

    #[test]
    fn parse_dpkg_output() {
        let pkgs = parse_name_version("curl\t7.88.1-10\nlibc6\t2.36-9\n", |c| c == '\t');
        assert_eq!(pkgs[1].id, "libc6");
        assert_eq!(pkgs[1].version.as_deref(), Some("2.36-9"));
    }

    #[test]
    fn upstream_version_drops_release() {
        assert_eq!(upstream_version("14.1.1-1"), "14.1.1");
        assert_eq!(upstream_version("9.0.0"), "9.0.0");
    }

    #[test]
    fn upstream_version_drops_epoch() {
        assert_eq!(upstream_version("1:2.43.0-1ubuntu7"), "2.43.0");
        assert_eq!(upstream_version("2:9.1.0016-1"), "9.1.0016");
        assert_eq!(upstream_version("1.0-beta-2"), "1.0-beta");
    }

    #[test]
    fn parse_winget_table() {
        let pkgs = parse_winget_list(WINGET_LIST);
        assert_eq!(pkgs.len(), 3);
        assert_eq!(pkgs[0].id, "Git.Git");
        assert_eq!(pkgs[0].version.as_deref(), Some("2.44.0"));
        assert_eq!(pkgs[0].name.as_deref(), Some("Git"));
        assert_eq!(pkgs[1].version.as_deref(), Some("124.0.2478"));
        assert_eq!(pkgs[2].version, None, "Unknown version is treated as absent");
    }

    #[test]
    fn parse_winget_without_header_is_empty() {
        assert!(parse_winget_list("No installed package found.").is_empty());
    }

    #[test]
    fn snapshot_lookup_is_case_insensitive() {
        let snap = InstalledSnapshot::from_packages([InstalledPackage {
            id: "Git.Git".into(),
            version: Some("2.44.0".into()),
            name: None,
        }]);
        assert!(snap.contains("git.git"));
        assert_eq!(snap.ids(), ["Git.Git"]);
    }

    #[test]
    fn query_requires_manager_on_path() {
        let exec = MockExecutor::new();
        let err = InstalledSnapshot::query(PackageManager::Pacman, &exec).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::ManagerUnavailable(_))
        ));
    }

    #[test]
    fn query_pacman() {
        let exec = MockExecutor::new()
            .with_program("pacman")
            .respond("pacman -Q", true, "git 2.44.0-1\nripgrep 14.1.0-1\n");
        let snap = InstalledSnapshot::query(PackageManager::Pacman, &exec).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(
            snap.get("ripgrep").and_then(|p| p.version.as_deref()),
            Some("14.1.0")
        );
    }

    #[test]
    fn query_apt_normalizes_epoch_and_revision() {
        let exec = MockExecutor::new().with_program("dpkg-query").respond(
            "dpkg-query -W",
            true,
            "git\t1:2.43.0-1ubuntu7\ncurl\t8.5.0-2ubuntu10.1\n",
        );
        let snap = InstalledSnapshot::query(PackageManager::Apt, &exec).unwrap();
        assert_eq!(
            snap.get("git").and_then(|p| p.version.as_deref()),
            Some("2.43.0")
        );
        assert_eq!(
            snap.get("curl").and_then(|p| p.version.as_deref()),
            Some("8.5.0")
        );
    }

    #[test]
    fn query_failure_is_driver_error() {
        let exec = MockExecutor::new()
            .with_program("pacman")
            .respond("pacman -Q", false, "database locked");
        let err = InstalledSnapshot::query(PackageManager::Pacman, &exec).unwrap_err();
        assert!(err.downcast_ref::<DriverError>().is_some());
    }

    #[test]
    fn install_builds_manager_command() {
        let exec = MockExecutor::new().respond("winget install", true, "Successfully installed");
        let snap = InstalledSnapshot::default();
        let lock = Mutex::new(());
        let driver = PackageDriver::new(
            "Git.Git".into(),
            PackageManager::Winget,
            Constraint::Exact("2.44.0".into()),
            &exec,
            &snap,
            &lock,
        );
        assert_eq!(driver.install().unwrap(), ActionOutcome::Done);
        let calls = exec.calls();
        assert!(calls[0].starts_with("winget install --id Git.Git --exact"));
        assert!(calls[0].ends_with("--version 2.44.0"));
    }

    #[test]
    fn failed_install_is_non_zero_exit() {
        let exec = MockExecutor::new().respond("sudo pacman", false, "target not found");
        let snap = InstalledSnapshot::default();
        let lock = Mutex::new(());
        let driver = PackageDriver::new(
            "nope".into(),
            PackageManager::Pacman,
            Constraint::Any,
            &exec,
            &snap,
            &lock,
        );
        let err = driver.install().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::NonZeroExit { .. })
        ));
    }

    #[test]
    fn upgrade_uses_only_upgrade_for_apt() {
        let exec = MockExecutor::new().respond("sudo apt-get install", true, "");
        let snap = InstalledSnapshot::default();
        let lock = Mutex::new(());
        let driver =
            PackageDriver::new("jq".into(), PackageManager::Apt, Constraint::Any, &exec, &snap, &lock);
        driver.upgrade().unwrap();
        assert_eq!(exec.calls(), ["sudo apt-get install -y --only-upgrade jq"]);
    }

    #[test]
    fn detect_reads_snapshot() {
        let exec = MockExecutor::new();
        let snap = InstalledSnapshot::from_packages([InstalledPackage {
            id: "jq".into(),
            version: Some("1.7".into()),
            name: None,
        }]);
        let lock = Mutex::new(());
        let driver =
            PackageDriver::new("JQ".into(), PackageManager::Apt, Constraint::Any, &exec, &snap, &lock);
        let d = driver.detect().unwrap();
        assert!(d.installed);
        assert_eq!(d.version.as_deref(), Some("1.7"));
        assert!(exec.calls().is_empty(), "detect never spawns");
    }
}
