//! Host platform detection.
use std::fmt;

use crate::drivers::package_manager::PackageManager;
use crate::exec::Executor;

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    /// Linux and other Unix-like systems.
    Linux,
    /// Microsoft Windows.
    Windows,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// Platform information for the current system.
#[derive(Debug, Clone)]
pub struct Platform {
    /// Operating system family.
    pub os: Os,
    /// Package manager used by the built-in driver.
    pub manager: PackageManager,
}

impl Platform {
    /// Detect the current platform and its native package manager.
    ///
    /// An explicit `override_manager` (from settings) wins over detection.
    #[must_use]
    pub fn detect(executor: &dyn Executor, override_manager: Option<PackageManager>) -> Self {
        let os = Self::detect_os();
        let manager = override_manager.unwrap_or_else(|| Self::detect_manager(os, executor));
        Self { os, manager }
    }

    /// Create a platform with explicit values (for testing and overrides).
    #[must_use]
    pub const fn new(os: Os, manager: PackageManager) -> Self {
        Self { os, manager }
    }

    /// Whether this is a Windows host.
    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }

    fn detect_os() -> Os {
        if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            // Default to Linux for other Unix-like systems
            Os::Linux
        }
    }

    fn detect_manager(os: Os, executor: &dyn Executor) -> PackageManager {
        match os {
            Os::Windows => PackageManager::Winget,
            Os::Linux => {
                if std::path::Path::new("/etc/arch-release").exists() || executor.which("pacman")
                {
                    PackageManager::Pacman
                } else {
                    PackageManager::Apt
                }
            }
        }
    }
}

/// Name of the current user, if the environment exposes one.
#[must_use]
pub fn user_name() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|s| !s.trim().is_empty())
}

/// Host name of this machine, if the environment exposes one.
#[must_use]
pub fn host_name() -> Option<String> {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

/// The user's home directory.
#[must_use]
pub fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .filter(|s| !s.is_empty())
        .map(std::path::PathBuf::from)
}
