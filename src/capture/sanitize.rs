//! Sanitize rules and the leak scan run over sanitized output.
use crate::catalog::{Catalog, Sensitivity};
use crate::manifest::{AppEntry, DriverKind, Manifest};

/// Name every sanitized manifest carries.
pub const SANITIZED_NAME: &str = "captured";

/// Keys whose presence suggests a secret made it into the document.
const SECRET_KEYS: [&str; 8] = [
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "api_key",
    "privatekey",
    "private_key",
];

/// Identities that must never appear in a sanitized document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakMarkers {
    /// Home directory path.
    pub home: Option<String>,
    /// Login name.
    pub user: Option<String>,
    /// Machine name.
    pub host: Option<String>,
}

impl LeakMarkers {
    /// Markers for the current user and machine.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            home: crate::platform::home_dir().map(|p| p.to_string_lossy().into_owned()),
            user: crate::platform::user_name(),
            host: crate::platform::host_name(),
        }
    }
}

/// Strip everything machine-specific from a captured manifest.
///
/// The result has a fixed name, package-manager apps only (no version pins,
/// sorted, de-duplicated case-insensitively), no restore or verify entries,
/// and only low-sensitivity config modules.
#[must_use]
pub fn sanitize(manifest: &Manifest, catalog: &Catalog) -> Manifest {
    let mut apps: Vec<AppEntry> = manifest
        .apps
        .iter()
        .filter(|app| app.driver == DriverKind::PackageManager && app.custom.is_none())
        .map(|app| AppEntry {
            version: None,
            ..app.clone()
        })
        .collect();
    apps.sort_by_key(|app| app.id.to_lowercase());
    apps.dedup_by(|a, b| a.id.eq_ignore_ascii_case(&b.id));

    let mut modules: Vec<String> = manifest
        .config_modules
        .iter()
        .filter(|id| {
            catalog
                .get(id)
                .is_some_and(|m| m.sensitivity == Sensitivity::Low)
        })
        .cloned()
        .collect();
    modules.sort();
    modules.dedup();

    Manifest {
        apps,
        config_modules: modules,
        ..Manifest::named(SANITIZED_NAME)
    }
}

/// Whether `needle` occurs in `haystack` bounded by non-alphanumeric
/// characters on both sides. Both are compared lowercase.
fn contains_token(haystack: &str, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    if needle.is_empty() {
        return false;
    }
    let haystack = haystack.to_lowercase();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(&needle).any(|(start, matched)| {
        let before = haystack.get(..start).and_then(|s| s.chars().next_back());
        let after = haystack.get(start + matched.len()..).and_then(|s| s.chars().next());
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Return a description of the first private marker found in `text`.
#[must_use]
pub fn find_leak(text: &str, markers: &LeakMarkers) -> Option<String> {
    let lower = text.to_lowercase();

    if let Some(home) = markers.home.as_deref().map(str::trim).filter(|h| h.len() > 1) {
        let forward = home.replace('\\', "/").to_lowercase();
        let escaped = home.replace('\\', "\\\\").to_lowercase();
        if lower.contains(&forward) || lower.contains(&escaped) || lower.contains(&home.to_lowercase()) {
            return Some("home directory".to_string());
        }
    }
    if let Some(user) = markers.user.as_deref()
        && contains_token(text, user)
    {
        return Some(format!("user name '{user}'"));
    }
    if let Some(host) = markers.host.as_deref()
        && contains_token(text, host)
    {
        return Some(format!("host name '{host}'"));
    }
    SECRET_KEYS
        .iter()
        .find(|key| lower.contains(&format!("\"{key}\"")) || lower.contains(&format!("{key}:")))
        .map(|key| format!("secret-like key '{key}'"))
}
