//! Persisted record of the last apply and verify.
//!
//! The file lives at `<state_dir>/state.json`, is rewritten atomically (temp
//! file in the same directory, fsync, rename), and is written at most once
//! per command. Timestamps come from an injectable [`Clock`] so repeated runs
//! under a fixed clock produce byte-identical files.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::apply::ApplyResult;
use crate::engine::verify::VerifyResult;
use crate::error::StateError;
use crate::fsutil;

/// Schema version written by this build.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// File name inside the state directory.
pub const STATE_FILE: &str = "state.json";

/// Source of "now" for state timestamps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as an RFC 3339 string with second precision.
    fn timestamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Identity of the manifest a run used.
#[derive(Debug, Clone, Copy)]
pub struct RunInfo<'a> {
    /// Manifest path as given.
    pub manifest_path: &'a Path,
    /// Hash of the authored bytes.
    pub manifest_hash: &'a str,
    /// Hash of the expanded manifest.
    pub expanded_hash: &'a str,
}

/// Summary of the last apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRecord {
    /// Manifest path used.
    pub manifest_path: String,
    /// Hash of the authored manifest.
    pub manifest_hash: String,
    /// Hash of the expanded manifest.
    pub expanded_hash: String,
    /// When the apply finished.
    pub timestamp_utc: String,
    /// Apps installed.
    pub installed: u32,
    /// Apps upgraded.
    pub upgraded: u32,
    /// Apps skipped.
    pub skipped: u32,
    /// Apps failed.
    pub failed: u32,
    /// Whether the apply succeeded.
    pub success: bool,
}

/// Summary of the last verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRecord {
    /// Manifest path used.
    pub manifest_path: String,
    /// Hash of the authored manifest.
    pub manifest_hash: String,
    /// Hash of the expanded manifest.
    pub expanded_hash: String,
    /// When the verify finished.
    pub timestamp_utc: String,
    /// Apps OK.
    pub ok_count: u32,
    /// Apps missing.
    pub missing_count: u32,
    /// Apps at the wrong version.
    pub version_mismatch_count: u32,
    /// Undeclared installed packages.
    pub extra_count: u32,
    /// Whether the verify succeeded.
    pub success: bool,
}

/// Last observation of one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppObservation {
    /// Whether it was installed.
    pub installed: bool,
    /// Installed version, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// When it was observed.
    pub last_seen_utc: String,
}

/// The whole state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// Schema version of this document.
    pub schema_version: u32,
    /// Last apply, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<ApplyRecord>,
    /// Last verify, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verify: Option<VerifyRecord>,
    /// Per-app observations keyed by app id.
    #[serde(default)]
    pub apps_observed: BTreeMap<String, AppObservation>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            last_applied: None,
            last_verify: None,
            apps_observed: BTreeMap::new(),
        }
    }
}

impl State {
    /// Record an apply outcome.
    pub fn record_apply(&mut self, run: RunInfo<'_>, result: &ApplyResult, clock: &dyn Clock) {
        self.last_applied = Some(ApplyRecord {
            manifest_path: run.manifest_path.display().to_string(),
            manifest_hash: run.manifest_hash.to_string(),
            expanded_hash: run.expanded_hash.to_string(),
            timestamp_utc: clock.timestamp(),
            installed: result.installed,
            upgraded: result.upgraded,
            skipped: result.skipped,
            failed: result.failed,
            success: result.success(),
        });
    }

    /// Record a verify outcome and merge its per-app observations.
    pub fn record_verify(&mut self, run: RunInfo<'_>, result: &VerifyResult, clock: &dyn Clock) {
        let now = clock.timestamp();
        self.last_verify = Some(VerifyRecord {
            manifest_path: run.manifest_path.display().to_string(),
            manifest_hash: run.manifest_hash.to_string(),
            expanded_hash: run.expanded_hash.to_string(),
            timestamp_utc: now.clone(),
            ok_count: result.ok_count,
            missing_count: result.missing_count,
            version_mismatch_count: result.version_mismatch_count,
            extra_count: result.extra_count,
            success: result.success(),
        });
        for app in &result.observed {
            self.apps_observed.insert(
                app.id.clone(),
                AppObservation {
                    installed: app.installed,
                    version: app.version.clone(),
                    last_seen_utc: now.clone(),
                },
            );
        }
    }
}

/// Reads and atomically rewrites the state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store rooted at `dir`.
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(STATE_FILE),
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, or a fresh default when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] for unparsable content,
    /// [`StateError::UnsupportedSchema`] for a newer schema, and
    /// [`StateError::Io`] for read failures.
    pub fn load(&self) -> Result<State, StateError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(State::default()),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let state: State = serde_json::from_str(&text).map_err(|e| StateError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        if state.schema_version != STATE_SCHEMA_VERSION {
            return Err(StateError::UnsupportedSchema(state.schema_version));
        }
        Ok(state)
    }

    /// Serialize `state` and replace the file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory cannot be created or the
    /// file cannot be written.
    pub fn save(&self, state: &State) -> Result<(), StateError> {
        let io = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
        let mut json = serde_json::to_string_pretty(state).map_err(|e| StateError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        json.push('\n');
        fsutil::write_atomic(&self.path, json.as_bytes()).map_err(io)
    }

    /// Delete the state file. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file exists but cannot be removed.
    pub fn reset(&self) -> Result<bool, StateError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StateError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::verify::ObservedApp;
    use chrono::TimeZone as _;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    fn run() -> RunInfo<'static> {
        RunInfo {
            manifest_path: Path::new("manifests/workstation.jsonc"),
            manifest_hash: "aa",
            expanded_hash: "bb",
        }
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateStore::new(dir.path()).load().unwrap();
        assert_eq!(state, State::default());
        assert_eq!(state.schema_version, STATE_SCHEMA_VERSION);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();
        assert!(matches!(
            StateStore::new(dir.path()).load(),
            Err(StateError::Corrupt { .. })
        ));
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), r#"{"schemaVersion": 9}"#).unwrap();
        assert!(matches!(
            StateStore::new(dir.path()).load(),
            Err(StateError::UnsupportedSchema(9))
        ));
    }

    #[test]
    fn save_round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(&dir.path().join(".converge"));
        let mut state = State::default();
        state.record_apply(
            run(),
            &ApplyResult {
                installed: 2,
                ..ApplyResult::default()
            },
            &clock(),
        );
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
        assert!(!dir.path().join(".converge/state.json.tmp").exists());

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains(r#""timestampUtc": "2026-03-01T12:00:00Z""#));
        assert!(text.contains(r#""lastApplied""#));
    }

    #[test]
    fn verify_merges_observations() {
        let mut state = State::default();
        state.apps_observed.insert(
            "old".into(),
            AppObservation {
                installed: true,
                version: None,
                last_seen_utc: "2020-01-01T00:00:00Z".into(),
            },
        );
        let result = VerifyResult {
            ok_count: 1,
            observed: vec![ObservedApp {
                id: "git".into(),
                installed: true,
                version: Some("2.44.0".into()),
            }],
            ..VerifyResult::default()
        };
        state.record_verify(run(), &result, &clock());
        assert_eq!(state.apps_observed.len(), 2);
        assert_eq!(state.apps_observed["git"].version.as_deref(), Some("2.44.0"));
        assert!(state.last_verify.as_ref().unwrap().success);
    }

    #[test]
    fn identical_runs_write_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let write = || {
            let mut state = store.load().unwrap();
            state.record_apply(run(), &ApplyResult::default(), &clock());
            store.save(&state).unwrap();
            std::fs::read(store.path()).unwrap()
        };
        assert_eq!(write(), write());
    }

    #[test]
    fn reset_deletes_only_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(!store.reset().unwrap());
        store.save(&State::default()).unwrap();
        assert!(store.reset().unwrap());
        assert!(!store.path().exists());
        assert!(dir.path().exists());
    }
}
