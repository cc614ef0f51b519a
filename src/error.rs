//! Domain-specific error types for the convergence engine.
//!
//! Internal modules return typed errors (e.g., [`ParseError`],
//! [`DriverError`]) while command handlers at the CLI boundary convert them to
//! [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! ConvergeError
//! ├── Parse(ParseError)         — malformed manifest, module, or include chain
//! ├── Expansion(ExpansionError) — unknown config module id
//! ├── Security(SecurityError)   — custom script escapes the install root
//! ├── Driver(DriverError)       — package manager or script subprocess failure
//! ├── State(StateError)         — unreadable or corrupt state file
//! └── Capture(CaptureError)     — capture guardrail rejections
//! ```
//!
//! Unknown installed versions are deliberately *not* an error: they surface as
//! [`VersionCheck::Unknown`](crate::version::VersionCheck::Unknown) and are
//! treated as unsatisfied.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the convergence engine.
#[derive(Error, Debug)]
pub enum ConvergeError {
    /// Manifest or module document could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Manifest expansion referenced an unknown module.
    #[error("Expansion error: {0}")]
    Expansion(#[from] ExpansionError),

    /// A custom script path failed the confinement check.
    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    /// A driver subprocess failed.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// The state store could not be read or written.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Capture refused to write its output.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
}

/// Errors raised while loading manifests and config module documents.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The document could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path of the unreadable document.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The document is not valid JSON/YAML after comment stripping.
    #[error("invalid syntax in {path}: {message}")]
    Syntax {
        /// Path of the malformed document.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// The document parsed but does not match the expected schema.
    #[error("invalid document {path}: {message}")]
    Schema {
        /// Path of the offending document.
        path: PathBuf,
        /// Description of the schema violation.
        message: String,
    },

    /// The manifest declares a `version` other than the supported one.
    #[error("unsupported manifest version {found} in {path} (expected 1)")]
    UnsupportedVersion {
        /// Path of the manifest.
        path: PathBuf,
        /// Version value found in the document.
        found: String,
    },

    /// An include file does not exist.
    #[error("include {include} referenced from {from} does not exist")]
    MissingInclude {
        /// Resolved path of the missing include.
        include: PathBuf,
        /// Document that referenced it.
        from: PathBuf,
    },

    /// The include graph loops back on itself.
    #[error("include cycle detected: {chain}")]
    IncludeCycle {
        /// Human-readable chain, e.g. `a.jsonc -> b.jsonc -> a.jsonc`.
        chain: String,
    },
}

/// Errors raised while expanding config modules into a manifest.
#[derive(Error, Debug)]
pub enum ExpansionError {
    /// The manifest references a module id the catalog does not know.
    #[error("unknown config module '{id}' (known modules: {})", known_list(.known))]
    UnknownModule {
        /// The unknown id.
        id: String,
        /// Every id present in the catalog, sorted.
        known: Vec<String>,
    },
}

fn known_list(known: &[String]) -> String {
    if known.is_empty() {
        "none".to_string()
    } else {
        known.join(", ")
    }
}

/// Errors raised by path confinement (custom scripts, restore sources).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// The path is empty.
    #[error("path is empty")]
    EmptyPath,

    /// The resolved path is not strictly under the root.
    #[error("path {path} escapes root {root}")]
    EscapesRoot {
        /// The path as written in the manifest.
        path: String,
        /// The root it must stay under.
        root: PathBuf,
    },
}

/// Errors raised by driver subprocesses.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The subprocess could not be started at all.
    #[error("failed to execute {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Underlying error message.
        message: String,
    },

    /// The subprocess exited with a non-zero status.
    #[error("{program} exited with code {code}: {detail}")]
    NonZeroExit {
        /// Program that failed.
        program: String,
        /// Exit code (`-1` when terminated by a signal).
        code: i32,
        /// Combined stdout/stderr detail.
        detail: String,
    },

    /// The subprocess exceeded its time budget and was killed.
    #[error("{program} timed out after {secs}s")]
    Timeout {
        /// Program that hung.
        program: String,
        /// Timeout that elapsed, in seconds.
        secs: u64,
    },

    /// The configured package manager is not available on this host.
    #[error("package manager '{0}' not found on PATH")]
    ManagerUnavailable(String),

    /// A custom script exists in the manifest but not on disk.
    #[error("script not found: {0}")]
    ScriptMissing(PathBuf),
}

/// Errors raised by the state store.
#[derive(Error, Debug)]
pub enum StateError {
    /// The state file or its directory could not be read or written.
    #[error("state I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The state file exists but is not valid JSON for the schema.
    #[error("state file {path} is corrupt: {message}")]
    Corrupt {
        /// Path of the corrupt file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// The state file was written by a newer schema.
    #[error("unsupported state schema version {0}")]
    UnsupportedSchema(u32),
}

/// Errors raised by the capture guardrails.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// An unsanitized capture targeted the shared directory.
    #[error("refusing to write unsanitized capture into shared directory {path}; use --sanitize")]
    UnsanitizedShared {
        /// Output path that was rejected.
        path: PathBuf,
    },

    /// The sanitized output still contains private data.
    #[error("sanitized capture still contains private data ({marker}); refusing to write {path}")]
    LeakDetected {
        /// Description of the marker that matched.
        marker: String,
        /// Output path that was rejected.
        path: PathBuf,
    },

    /// The captured document could not be written.
    #[error("cannot write capture to {path}: {source}")]
    Io {
        /// Output path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
