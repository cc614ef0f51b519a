//! Manifest model: the declarative description of desired machine state.
//!
//! A manifest is loaded once by [`loader::load`] and never mutated
//! afterwards; [`expand::expand`] derives a new manifest with config module
//! entries merged in.
pub mod expand;
pub mod hash;
pub mod jsonc;
pub mod loader;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use loader::{LoadedManifest, load};

/// The only supported manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// A parsed manifest document with its includes merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version; always [`MANIFEST_VERSION`].
    pub version: u32,
    /// Human-readable manifest name.
    #[serde(default)]
    pub name: String,
    /// Include paths as authored, relative to the manifest file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
    /// Applications to converge.
    #[serde(default)]
    pub apps: Vec<AppEntry>,
    /// Files to restore onto the machine.
    #[serde(default)]
    pub restore: Vec<RestoreEntry>,
    /// Facts to verify after apply.
    #[serde(default)]
    pub verify: Vec<VerifyEntry>,
    /// Config module ids to expand from the catalog.
    #[serde(default)]
    pub config_modules: Vec<String>,
    /// Module ids already merged by expansion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expanded_modules: Vec<String>,
}

impl Manifest {
    /// An empty manifest with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            name: name.into(),
            includes: Vec::new(),
            apps: Vec::new(),
            restore: Vec::new(),
            verify: Vec::new(),
            config_modules: Vec::new(),
            expanded_modules: Vec::new(),
        }
    }
}

/// Which driver handles an app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    /// The host's native package manager.
    #[default]
    PackageManager,
    /// A user-supplied install script.
    Custom,
}

/// One application entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEntry {
    /// Stable identifier used in state and reports.
    pub id: String,
    /// Driver responsible for this app.
    #[serde(default)]
    pub driver: DriverKind,
    /// Package identity for the package-manager driver.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub package_ref: Option<PackageRef>,
    /// Version constraint (`"X"` exact or `">=X"` minimum).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Script and detect rule for the custom driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomSpec>,
}

impl AppEntry {
    /// A package-manager entry whose ref is a single string.
    #[must_use]
    pub fn package(id: impl Into<String>, package_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            driver: DriverKind::PackageManager,
            package_ref: Some(PackageRef::Single(package_ref.into())),
            version: None,
            custom: None,
        }
    }

    /// Attach a version constraint.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// A package reference: one id everywhere, or per manager/OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageRef {
    /// The same id on every platform.
    Single(String),
    /// Ids keyed by manager name (`winget`, `pacman`, `apt`) or OS name.
    PerPlatform(BTreeMap<String, String>),
}

impl PackageRef {
    /// Resolve the package id for the active `manager`, falling back to `os`.
    ///
    /// Empty values resolve to `None`.
    #[must_use]
    pub fn resolve(&self, manager: &str, os: &str) -> Option<&str> {
        let value = match self {
            Self::Single(id) => Some(id.as_str()),
            Self::PerPlatform(map) => map
                .get(manager)
                .or_else(|| map.get(os))
                .map(String::as_str),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Install script and detect rule for a custom-driver app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSpec {
    /// Script path relative to the install root.
    pub script: String,
    /// Extra arguments passed to the script.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// How to tell whether the app is already installed.
    pub detect: DetectRule,
}

/// Detection rule for custom-driver apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DetectRule {
    /// A file exists (path is environment-expanded).
    File {
        /// Path to test.
        path: String,
    },
    /// A registry key exists, optionally with a named value.
    Registry {
        /// Registry key path, e.g. `HKLM:\Software\Vendor`.
        key: String,
        /// Value name under the key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

/// A file or directory to restore onto the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreEntry {
    /// Source relative to the manifest (or module) directory.
    pub source: String,
    /// Destination; environment variables and `~` are expanded.
    pub target: String,
    /// Back up an existing, differing target before overwriting.
    #[serde(default = "default_true")]
    pub backup: bool,
    /// Skip instead of failing when the source is missing.
    #[serde(default)]
    pub optional: bool,
    /// Config module that contributed this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_module: Option<String>,
    /// Directory `source` is resolved against; set by loading or expansion.
    #[serde(skip)]
    pub source_root: Option<PathBuf>,
}

/// A post-apply verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEntry {
    /// The check itself.
    #[serde(flatten)]
    pub check: VerifyCheck,
    /// Config module that contributed this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_module: Option<String>,
}

/// Kinds of verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VerifyCheck {
    /// A path exists after environment expansion.
    FileExists {
        /// Path to test.
        path: String,
    },
    /// A command is resolvable on PATH.
    CommandExists {
        /// Command name.
        command: String,
    },
    /// A registry key (and optional value) exists.
    RegistryKeyExists {
        /// Registry key path.
        key: String,
        /// Value name under the key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
}

impl std::fmt::Display for VerifyCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileExists { path } => write!(f, "file-exists {path}"),
            Self::CommandExists { command } => write!(f, "command-exists {command}"),
            Self::RegistryKeyExists { key, value: None } => {
                write!(f, "registry-key-exists {key}")
            }
            Self::RegistryKeyExists {
                key,
                value: Some(v),
            } => write!(f, "registry-key-exists {key}\\{v}"),
        }
    }
}
