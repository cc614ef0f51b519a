//! Config module catalog: reusable restore, verify, and capture bundles.
//!
//! Modules live under the catalog directory either as a single file
//! (`<catalog>/<id>.jsonc`) or as a directory with a `module.*` document
//! next to the files it restores. A [`CatalogCache`] handle loads them once
//! and keeps the result until it is invalidated.
pub mod schema;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use wax::{CandidatePath, Glob, Pattern};

use crate::manifest::loader::parse_document;
use crate::manifest::{RestoreEntry, VerifyEntry};

/// File extensions recognised as module documents, in preference order.
const MODULE_EXTENSIONS: [&str; 4] = ["jsonc", "json", "yaml", "yml"];

/// How private a module's captured data is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Sensitivity {
    /// Safe to share.
    #[default]
    Low,
    /// Contains secrets or personal data.
    Sensitive,
    /// Only meaningful on the machine it was captured from.
    MachineBound,
}

/// Matchers linking a module to installed software.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matchers {
    /// Package manager ids.
    #[serde(default)]
    pub package_id: Vec<String>,
    /// Executable names found on PATH.
    #[serde(default)]
    pub exe_name: Vec<String>,
    /// Glob patterns over installed display names.
    #[serde(default)]
    pub uninstall_name_pattern: Vec<String>,
}

/// A file captured from the machine into the capture output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFile {
    /// Path on the machine (environment-expanded).
    pub source: String,
    /// Path relative to the module's capture directory.
    pub dest: String,
    /// Missing sources are skipped instead of reported.
    #[serde(default)]
    pub optional: bool,
}

/// Capture rules for a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRules {
    /// Files to copy.
    #[serde(default)]
    pub files: Vec<CaptureFile>,
    /// Globs (relative to each source) that are never copied.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

/// A reusable bundle of restore, verify, and capture rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigModule {
    /// Unique module id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Privacy classification used by sanitized capture.
    #[serde(default)]
    pub sensitivity: Sensitivity,
    /// How the module is matched to installed software.
    pub matches: Matchers,
    /// Restore entries injected by expansion.
    #[serde(default)]
    pub restore: Vec<RestoreEntry>,
    /// Verify entries injected by expansion.
    #[serde(default)]
    pub verify: Vec<VerifyEntry>,
    /// Capture rules.
    #[serde(default)]
    pub capture: CaptureRules,
    /// Directory the module was loaded from.
    #[serde(skip)]
    pub dir: PathBuf,
}

/// A problem found while loading the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogIssue {
    /// Module document the issue belongs to.
    pub path: PathBuf,
    /// Description of the problem.
    pub message: String,
}

impl fmt::Display for CatalogIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Why a module matched installed software.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMatch {
    /// Matched module id.
    pub module_id: String,
    /// Reasons such as `packageId:Git.Git`, `exe:git.exe`, `uninstallName:Git*`.
    pub reasons: Vec<String>,
}

/// A loaded set of config modules keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Valid modules, sorted by id.
    pub modules: BTreeMap<String, ConfigModule>,
    /// Invalid or duplicate modules that were excluded.
    pub issues: Vec<CatalogIssue>,
}

impl Catalog {
    /// Read every module document under `dir`.
    ///
    /// A missing directory yields an empty catalog. Invalid modules and
    /// duplicate ids are recorded in [`Catalog::issues`] and excluded.
    #[must_use]
    pub fn load_dir(dir: &Path) -> Self {
        let mut catalog = Self::default();
        if !dir.is_dir() {
            return catalog;
        }
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(rd) => rd.filter_map(Result::ok).map(|e| e.path()).collect(),
            Err(e) => {
                catalog.issues.push(CatalogIssue {
                    path: dir.to_path_buf(),
                    message: format!("cannot read catalog directory: {e}"),
                });
                return catalog;
            }
        };
        entries.sort();

        for entry in entries {
            let document = if entry.is_dir() {
                MODULE_EXTENSIONS
                    .iter()
                    .map(|ext| entry.join(format!("module.{ext}")))
                    .find(|p| p.is_file())
            } else if has_module_extension(&entry) {
                Some(entry)
            } else {
                None
            };
            if let Some(path) = document {
                catalog.add_document(&path);
            }
        }
        catalog
    }

    fn add_document(&mut self, path: &Path) {
        match read_module(path) {
            Ok(module) => {
                if self.modules.contains_key(&module.id) {
                    self.issues.push(CatalogIssue {
                        path: path.to_path_buf(),
                        message: format!("duplicate module id '{}'", module.id),
                    });
                } else {
                    self.modules.insert(module.id.clone(), module);
                }
            }
            Err(message) => self.issues.push(CatalogIssue {
                path: path.to_path_buf(),
                message,
            }),
        }
    }

    /// Sorted ids of every loaded module.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Look up a module by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ConfigModule> {
        self.modules.get(id)
    }

    /// Modules whose matchers intersect the installed software, sorted by id.
    ///
    /// All comparisons are case-insensitive; executable names compare with
    /// and without a trailing `.exe`.
    #[must_use]
    pub fn match_installed(
        &self,
        installed_ids: &[String],
        executables: &[String],
        display_names: &[String],
    ) -> Vec<ModuleMatch> {
        let ids: Vec<String> = installed_ids.iter().map(|s| s.to_lowercase()).collect();
        let exes: Vec<String> = executables.iter().map(|s| exe_stem(s)).collect();
        let names: Vec<String> = display_names.iter().map(|s| s.to_lowercase()).collect();

        self.modules
            .values()
            .filter_map(|module| {
                let mut reasons = Vec::new();
                for pkg in &module.matches.package_id {
                    if ids.contains(&pkg.to_lowercase()) {
                        reasons.push(format!("packageId:{pkg}"));
                    }
                }
                for exe in &module.matches.exe_name {
                    if exes.contains(&exe_stem(exe)) {
                        reasons.push(format!("exe:{exe}"));
                    }
                }
                for pattern in &module.matches.uninstall_name_pattern {
                    let lowered = pattern.to_lowercase();
                    if names.iter().any(|n| matches_glob(&lowered, n)) {
                        reasons.push(format!("uninstallName:{pattern}"));
                    }
                }
                (!reasons.is_empty()).then(|| ModuleMatch {
                    module_id: module.id.clone(),
                    reasons,
                })
            })
            .collect()
    }
}

fn has_module_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MODULE_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(e)))
}

fn exe_stem(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    lower
        .strip_suffix(".exe")
        .map_or_else(|| lower.clone(), str::to_string)
}

/// Whether `pattern` matches `candidate` as a glob.
///
/// An invalid pattern falls back to exact comparison.
pub(crate) fn matches_glob(pattern: &str, candidate: &str) -> bool {
    let normalized = candidate.replace('\\', "/");
    Glob::new(pattern).map_or_else(
        |_| pattern == normalized,
        |glob| glob.matched(&CandidatePath::from(normalized.as_str())).is_some(),
    )
}

fn read_module(path: &Path) -> Result<ConfigModule, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read: {e}"))?;
    let doc = parse_document(path, &text).map_err(|e| e.to_string())?;
    let problems = schema::validate_module(&doc);
    if !problems.is_empty() {
        return Err(problems.join("; "));
    }
    let mut module: ConfigModule = serde_json::from_value(doc).map_err(|e| e.to_string())?;
    module.dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok(module)
}

/// A handle that loads a catalog directory once and caches the result.
///
/// Each handle owns its own cache; two handles over the same directory
/// never share state.
#[derive(Debug)]
pub struct CatalogCache {
    dir: PathBuf,
    cached: Mutex<Option<Arc<Catalog>>>,
}

impl CatalogCache {
    /// Create a handle over `dir` without reading anything yet.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cached: Mutex::new(None),
        }
    }

    /// Directory this handle reads from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the catalog, reading the directory on first use or when
    /// `force` is set.
    pub fn load(&self, force: bool) -> Arc<Catalog> {
        let mut guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if !force && let Some(catalog) = guard.as_ref() {
            return Arc::clone(catalog);
        }
        let catalog = Arc::new(Catalog::load_dir(&self.dir));
        *guard = Some(Arc::clone(&catalog));
        catalog
    }

    /// Drop the cached catalog so the next [`load`](Self::load) re-reads it.
    pub fn invalidate(&self) {
        let mut guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }
}
