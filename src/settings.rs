//! Layered settings: defaults, `converge.toml`, environment, CLI flags.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::GlobalOpts;
use crate::drivers::package_manager::PackageManager;

/// Settings file read from the repository root.
pub const SETTINGS_FILE: &str = "converge.toml";

/// Environment variable naming the repository root.
pub const ROOT_ENV: &str = "CONVERGE_ROOT";

/// Manifest file names tried, in order, when none is configured.
const DEFAULT_MANIFESTS: [&str; 4] = [
    "manifest.jsonc",
    "manifest.json",
    "manifest.yaml",
    "manifest.yml",
];

/// Effective settings for one invocation.
///
/// Relative paths are resolved against the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Manifest path; when unset the root is searched for `manifest.*`.
    pub manifest: Option<PathBuf>,
    /// Apps converged at once.
    pub parallelism: usize,
    /// Subprocess timeout in seconds; `0` disables it.
    pub install_timeout_secs: u64,
    /// Config module catalog directory.
    pub catalog_dir: PathBuf,
    /// Directory holding the state file.
    pub state_dir: PathBuf,
    /// Directory unsanitized captures may not be written into.
    pub shared_dir: PathBuf,
    /// Package manager to use instead of the detected one.
    pub package_manager: Option<PackageManager>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manifest: None,
            parallelism: 2,
            install_timeout_secs: 1800,
            catalog_dir: PathBuf::from("modules"),
            state_dir: PathBuf::from(".converge"),
            shared_dir: PathBuf::from("manifests/shared"),
            package_manager: None,
        }
    }
}

impl Settings {
    /// Read `<root>/converge.toml`, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    /// Apply CLI overrides on top of the file settings.
    #[must_use]
    pub fn with_overrides(mut self, global: &GlobalOpts) -> Self {
        if let Some(manifest) = &global.manifest {
            self.manifest = Some(manifest.clone());
        }
        if let Some(parallel) = global.parallel {
            self.parallelism = parallel;
        }
        if let Some(timeout) = global.timeout {
            self.install_timeout_secs = timeout;
        }
        self
    }

    /// Subprocess timeout, `None` when disabled.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        match self.install_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Resolve the manifest path against `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if no manifest is configured and none of the default
    /// names exists under `root`.
    pub fn manifest_path(&self, root: &Path) -> Result<PathBuf> {
        if let Some(manifest) = &self.manifest {
            return Ok(root.join(manifest));
        }
        DEFAULT_MANIFESTS
            .iter()
            .map(|name| root.join(name))
            .find(|p| p.exists())
            .with_context(|| {
                format!(
                    "no manifest found in {}; pass --manifest or set `manifest` in {SETTINGS_FILE}",
                    root.display()
                )
            })
    }

    /// Absolute catalog directory.
    #[must_use]
    pub fn catalog_path(&self, root: &Path) -> PathBuf {
        root.join(&self.catalog_dir)
    }

    /// Absolute state directory.
    #[must_use]
    pub fn state_path(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir)
    }

    /// Absolute shared-manifest directory.
    #[must_use]
    pub fn shared_path(&self, root: &Path) -> PathBuf {
        root.join(&self.shared_dir)
    }
}

/// Resolve the repository root: `--root`, then `CONVERGE_ROOT`, then the
/// nearest ancestor of the working directory holding `converge.toml`, then
/// the working directory itself.
///
/// # Errors
///
/// Returns an error if the working directory cannot be read or the chosen
/// root does not exist.
pub fn resolve_root(global: &GlobalOpts) -> Result<PathBuf> {
    let root = if let Some(root) = &global.root {
        root.clone()
    } else if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
        PathBuf::from(root)
    } else {
        let cwd = std::env::current_dir().context("cannot read the working directory")?;
        cwd.ancestors()
            .find(|dir| dir.join(SETTINGS_FILE).exists())
            .map_or_else(|| cwd.clone(), Path::to_path_buf)
    };
    if !root.is_dir() {
        anyhow::bail!(
            "root {} does not exist. Use --root or set {ROOT_ENV}",
            root.display()
        );
    }
    Ok(dunce::canonicalize(&root).unwrap_or(root))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.parallelism, 2);
        assert_eq!(settings.timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            "manifest = \"manifests/dev.jsonc\"\nparallelism = 4\npackage_manager = \"apt\"\n",
        )
        .unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.parallelism, 4);
        assert_eq!(settings.package_manager, Some(PackageManager::Apt));
        assert_eq!(settings.catalog_dir, PathBuf::from("modules"));
        assert_eq!(
            settings.manifest_path(dir.path()).unwrap(),
            dir.path().join("manifests/dev.jsonc")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "paralelism = 4\n").unwrap();
        assert!(Settings::load(dir.path()).is_err());
    }

    #[test]
    fn cli_flags_win() {
        let global = GlobalOpts {
            parallel: Some(0),
            timeout: Some(0),
            manifest: Some(PathBuf::from("other.yaml")),
            ..GlobalOpts::default()
        };
        let settings = Settings::default().with_overrides(&global);
        assert_eq!(settings.parallelism, 0);
        assert_eq!(settings.timeout(), None);
        assert_eq!(settings.manifest, Some(PathBuf::from("other.yaml")));
    }

    #[test]
    fn manifest_discovery() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::default().manifest_path(dir.path()).is_err());
        fs::write(dir.path().join("manifest.yaml"), "version: 1\n").unwrap();
        assert_eq!(
            Settings::default().manifest_path(dir.path()).unwrap(),
            dir.path().join("manifest.yaml")
        );
    }

    #[test]
    fn explicit_root_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalOpts {
            root: Some(dir.path().to_path_buf()),
            ..GlobalOpts::default()
        };
        assert!(resolve_root(&global).is_ok());

        let missing = GlobalOpts {
            root: Some(dir.path().join("missing")),
            ..GlobalOpts::default()
        };
        assert!(resolve_root(&missing).is_err());
    }
}
