//! Manifest loading: format detection, comment stripping, and includes.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::hash::document_set_hash;
use super::jsonc::strip_comments;
use super::{MANIFEST_VERSION, Manifest};
use crate::error::ParseError;

/// Top-level keys whose arrays are concatenated across includes.
const ARRAY_KEYS: [&str; 4] = ["apps", "restore", "verify", "configModules"];

/// A manifest loaded from disk together with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    /// Path of the root manifest file.
    pub path: PathBuf,
    /// Directory containing the root manifest.
    pub dir: PathBuf,
    /// The merged manifest.
    pub manifest: Manifest,
    /// [`document_set_hash`] of the root file and its includes, as authored.
    pub hash: String,
}

/// A document with its includes merged beneath it.
struct Merged {
    value: Value,
    /// Directory each merged `restore` entry resolves against, in order.
    restore_roots: Vec<PathBuf>,
}

/// Load the manifest at `path`, resolving its includes.
///
/// # Errors
///
/// Returns [`ParseError`] if any document is unreadable or malformed, an
/// include is missing or cyclic, or the version is not supported.
pub fn load(path: &Path) -> Result<LoadedManifest, ParseError> {
    let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut stack = Vec::new();
    let mut documents = Vec::new();
    let merged = load_value(path, &bytes, &mut stack, &mut documents)?;
    let hash = document_set_hash(documents.iter().map(Vec::as_slice));
    let mut manifest = into_manifest(path, merged.value)?;

    let dir = parent_dir(path);
    for (i, entry) in manifest.restore.iter_mut().enumerate() {
        let root = merged.restore_roots.get(i).unwrap_or(&dir);
        entry.source_root = Some(root.clone());
    }

    Ok(LoadedManifest {
        path: path.to_path_buf(),
        dir,
        manifest,
        hash,
    })
}

/// Parse a single manifest-shaped document from text (no include handling).
///
/// # Errors
///
/// Returns [`ParseError`] if the text is malformed or not a valid manifest.
pub fn parse_str(path: &Path, text: &str) -> Result<Manifest, ParseError> {
    into_manifest(path, parse_document(path, text)?)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// Parse YAML or JSON-with-comments into a JSON object.
pub(crate) fn parse_document(path: &Path, text: &str) -> Result<Value, ParseError> {
    let value: Value = if is_yaml(path) {
        serde_yaml::from_str(text).map_err(|e| ParseError::Syntax {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    } else {
        serde_json::from_str(&strip_comments(text)).map_err(|e| ParseError::Syntax {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    };
    if value.is_object() {
        Ok(value)
    } else {
        Err(ParseError::Schema {
            path: path.to_path_buf(),
            message: "top level must be an object".to_string(),
        })
    }
}

fn check_version(path: &Path, doc: &Value) -> Result<(), ParseError> {
    match doc.get("version") {
        Some(v) if v.as_u64() == Some(u64::from(MANIFEST_VERSION)) => Ok(()),
        Some(v) => Err(ParseError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: v.to_string(),
        }),
        None => Err(ParseError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: "missing".to_string(),
        }),
    }
}

fn into_manifest(path: &Path, value: Value) -> Result<Manifest, ParseError> {
    check_version(path, &value)?;
    serde_json::from_value(value).map_err(|e| ParseError::Schema {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn identity(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn display_chain(stack: &[PathBuf], closing: &Path) -> String {
    stack
        .iter()
        .map(PathBuf::as_path)
        .chain(std::iter::once(closing))
        .map(|p| {
            p.file_name()
                .map_or_else(|| p.display().to_string(), |n| n.to_string_lossy().into_owned())
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Load `path` (already read as `bytes`) and merge its includes beneath it.
///
/// Every document read is appended to `documents` in load order.
fn load_value(
    path: &Path,
    bytes: &[u8],
    stack: &mut Vec<PathBuf>,
    documents: &mut Vec<Vec<u8>>,
) -> Result<Merged, ParseError> {
    documents.push(bytes.to_vec());
    let text = String::from_utf8_lossy(bytes);
    let doc = parse_document(path, &text)?;
    if doc.get("version").is_some() {
        check_version(path, &doc)?;
    }

    let includes: Vec<String> = match doc.get("includes") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| ParseError::Schema {
                    path: path.to_path_buf(),
                    message: "includes must be a list of strings".to_string(),
                })
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(ParseError::Schema {
                path: path.to_path_buf(),
                message: "includes must be a list of strings".to_string(),
            });
        }
    };

    stack.push(identity(path));
    let base = parent_dir(path);
    let mut merged = Map::new();
    let mut restore_roots = Vec::new();
    for include in &includes {
        let include_path = base.join(include);
        if !include_path.exists() {
            return Err(ParseError::MissingInclude {
                include: include_path,
                from: path.to_path_buf(),
            });
        }
        let id = identity(&include_path);
        if stack.contains(&id) {
            return Err(ParseError::IncludeCycle {
                chain: display_chain(stack, &include_path),
            });
        }
        let inc_bytes = std::fs::read(&include_path).map_err(|source| ParseError::Io {
            path: include_path.clone(),
            source,
        })?;
        let included = load_value(&include_path, &inc_bytes, stack, documents)?;
        if let Value::Object(inc) = included.value {
            merge_into(&mut merged, inc);
            restore_roots.extend(included.restore_roots);
        }
    }
    stack.pop();

    match doc.get("restore") {
        Some(Value::Array(own)) => restore_roots.extend(std::iter::repeat_n(base, own.len())),
        Some(_) => restore_roots.clear(),
        None => {}
    }
    if let Value::Object(own) = doc {
        merge_into(&mut merged, own);
    }
    if !includes.is_empty() {
        merged.insert(
            "includes".to_string(),
            Value::Array(includes.into_iter().map(Value::String).collect()),
        );
    }
    if let Some(Value::Array(apps)) = merged.get_mut("apps") {
        dedupe_apps(apps);
    }
    Ok(Merged {
        value: Value::Object(merged),
        restore_roots,
    })
}

/// Merge `doc` over `acc`: list keys concatenate, everything else is replaced.
fn merge_into(acc: &mut Map<String, Value>, doc: Map<String, Value>) {
    for (key, value) in doc {
        if key == "includes" {
            continue;
        }
        if ARRAY_KEYS.contains(&key.as_str())
            && let Value::Array(items) = value
        {
            match acc.get_mut(&key) {
                Some(Value::Array(existing)) => existing.extend(items),
                _ => {
                    acc.insert(key, Value::Array(items));
                }
            }
            continue;
        }
        acc.insert(key, value);
    }
}

/// Keep the last definition of each app id at the position of the first.
fn dedupe_apps(apps: &mut Vec<Value>) {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Value> = Vec::with_capacity(apps.len());
    for app in apps.drain(..) {
        let Some(id) = app.get("id").and_then(Value::as_str).map(str::to_string) else {
            out.push(app);
            continue;
        };
        if let Some(slot) = position.get(&id).and_then(|&i| out.get_mut(i)) {
            *slot = app;
        } else {
            position.insert(id, out.len());
            out.push(app);
        }
    }
    *apps = out;
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::manifest::{DriverKind, PackageRef};
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn loads_jsonc_with_comments() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(
            tmp.path(),
            "m.jsonc",
            r#"{
  // desired state
  "version": 1,
  "name": "dev", /* inline */
  "apps": [{"id": "git", "ref": "Git.Git", "version": ">=2.0"}]
}"#,
        );
        let loaded = load(&p).unwrap();
        assert_eq!(loaded.manifest.name, "dev");
        assert_eq!(loaded.manifest.apps.len(), 1);
        assert_eq!(loaded.manifest.apps[0].driver, DriverKind::PackageManager);
        assert_eq!(loaded.hash.len(), 64);
    }

    #[test]
    fn loads_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(
            tmp.path(),
            "m.yaml",
            "version: 1\nname: yaml\napps:\n  - id: git\n    ref:\n      pacman: git\n      winget: Git.Git\n",
        );
        let m = load(&p).unwrap().manifest;
        assert!(matches!(m.apps[0].package_ref, Some(PackageRef::PerPlatform(_))));
    }

    #[test]
    fn malformed_json_is_syntax_error() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(tmp.path(), "m.jsonc", "{ \"version\": 1, ");
        assert!(matches!(load(&p), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn wrong_version_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(tmp.path(), "m.json", r#"{"version": 2}"#);
        assert!(matches!(
            load(&p),
            Err(ParseError::UnsupportedVersion { found, .. }) if found == "2"
        ));
    }

    #[test]
    fn missing_version_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(tmp.path(), "m.json", r#"{"name": "x"}"#);
        assert!(matches!(load(&p), Err(ParseError::UnsupportedVersion { .. })));
    }

    #[test]
    fn schema_error_for_bad_field_type() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(tmp.path(), "m.json", r#"{"version": 1, "apps": "git"}"#);
        assert!(matches!(load(&p), Err(ParseError::Schema { .. })));
    }

    #[test]
    fn includes_merge_arrays_and_override_scalars() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "base.jsonc",
            r#"{"name": "base", "apps": [{"id": "git", "ref": "git"}, {"id": "curl", "ref": "curl"}], "configModules": ["git"]}"#,
        );
        let p = write(
            tmp.path(),
            "m.jsonc",
            r#"{"version": 1, "name": "top", "includes": ["base.jsonc"],
                "apps": [{"id": "jq", "ref": "jq"}, {"id": "git", "ref": "git", "version": ">=2"}]}"#,
        );
        let m = load(&p).unwrap().manifest;
        assert_eq!(m.name, "top");
        let ids: Vec<&str> = m.apps.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["git", "curl", "jq"]);
        assert_eq!(m.apps[0].version.as_deref(), Some(">=2"), "last definition wins");
        assert_eq!(m.config_modules, ["git"]);
        assert_eq!(m.includes, ["base.jsonc"]);
    }

    #[test]
    fn missing_include_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(tmp.path(), "m.json", r#"{"version": 1, "includes": ["nope.json"]}"#);
        assert!(matches!(load(&p), Err(ParseError::MissingInclude { .. })));
    }

    #[test]
    fn include_cycle_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.json", r#"{"includes": ["b.json"]}"#);
        write(tmp.path(), "b.json", r#"{"includes": ["a.json"]}"#);
        let p = write(tmp.path(), "m.json", r#"{"version": 1, "includes": ["a.json"]}"#);
        let err = load(&p).unwrap_err();
        match err {
            ParseError::IncludeCycle { chain } => {
                assert_eq!(chain, "m.json -> a.json -> b.json -> a.json");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn restore_entries_resolve_against_manifest_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(
            tmp.path(),
            "m.json",
            r#"{"version": 1, "restore": [{"source": "cfg/a", "target": "~/.a"}]}"#,
        );
        let m = load(&p).unwrap().manifest;
        assert_eq!(m.restore[0].source_root.as_deref(), Some(tmp.path()));
    }

    #[test]
    fn included_restore_entries_resolve_against_include_dir() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("shared")).unwrap();
        write(
            &tmp.path().join("shared"),
            "base.json",
            r#"{"restore": [{"source": "gitconfig", "target": "~/.gitconfig"}]}"#,
        );
        let p = write(
            tmp.path(),
            "m.json",
            r#"{"version": 1, "includes": ["shared/base.json"],
                "restore": [{"source": "cfg/a", "target": "~/.a"}]}"#,
        );
        let m = load(&p).unwrap().manifest;
        assert_eq!(m.restore[0].source, "gitconfig");
        assert_eq!(
            m.restore[0].source_root.as_deref(),
            Some(tmp.path().join("shared").as_path())
        );
        assert_eq!(m.restore[1].source_root.as_deref(), Some(tmp.path()));
    }

    #[test]
    fn include_edit_changes_manifest_hash() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "base.json", r#"{"apps": [{"id": "git", "ref": "git"}]}"#);
        let p = write(tmp.path(), "m.json", r#"{"version": 1, "includes": ["base.json"]}"#);
        let before = load(&p).unwrap().hash;

        write(tmp.path(), "base.json", r#"{"apps": [{"id": "jq", "ref": "jq"}]}"#);
        let after = load(&p).unwrap().hash;
        assert_ne!(before, after);
    }

    #[test]
    fn parse_str_checks_version() {
        assert!(parse_str(Path::new("x.json"), r#"{"version": 1}"#).is_ok());
        assert!(parse_str(Path::new("x.yaml"), "version: 3\n").is_err());
    }
}
