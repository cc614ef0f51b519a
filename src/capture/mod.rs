//! Capture: export the installed software into a new manifest.
//!
//! The flow is the reverse of apply. The package manager snapshot becomes
//! the app list, catalog modules matched against the snapshot (and against
//! executables found on PATH) become `configModules`, and optionally each
//! matched module's `capture.files` are copied next to the output.
//!
//! Sanitize mode produces a shareable document: see [`sanitize::sanitize`]
//! for what is removed. Two guardrails protect the shared directory:
//! unsanitized output may not be written inside it, and sanitized output is
//! scanned for private markers before it is written anywhere.
pub mod sanitize;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::catalog::{Catalog, ModuleMatch, matches_glob};
use crate::drivers::confine::{confine, normalize};
use crate::drivers::custom::expand_env;
use crate::drivers::package_manager::InstalledSnapshot;
use crate::engine::Context;
use crate::error::CaptureError;
use crate::exec::Executor;
use crate::fsutil;
use crate::manifest::{AppEntry, Manifest};
use sanitize::{LeakMarkers, find_leak};

/// Directory (beside the output manifest) that captured config files go to.
pub const CONFIGS_DIR: &str = "configs";

/// Options for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Output manifest path; `.yaml`/`.yml` selects YAML, anything else JSON.
    pub out: PathBuf,
    /// Produce a shareable, machine-independent manifest.
    pub sanitize: bool,
    /// Copy matched modules' capture files beside the output.
    pub include_config: bool,
    /// Pin each app to its installed version.
    pub pin_versions: bool,
    /// Manifest name for unsanitized output.
    pub name: String,
    /// Directory unsanitized output must stay out of.
    pub shared_dir: PathBuf,
    /// Private identities the sanitized output is scanned for.
    pub leak_markers: LeakMarkers,
}

/// What a capture produced.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Path the manifest was written to.
    pub out: PathBuf,
    /// The captured manifest as written.
    pub manifest: Manifest,
    /// Module matches found (before sanitize filtering).
    pub matches: Vec<ModuleMatch>,
    /// Number of config files copied.
    pub config_files: usize,
}

/// Make `path` absolute against the working directory and resolve `..`.
fn absolute(path: &Path) -> PathBuf {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let abs = normalize(&abs).unwrap_or(abs);
    // Canonicalize the deepest existing ancestor so symlinked prefixes agree.
    let mut existing = abs.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return abs,
        }
    }
    let mut resolved = dunce::canonicalize(existing).unwrap_or_else(|_| existing.to_path_buf());
    for name in tail.iter().rev() {
        resolved.push(name);
    }
    resolved
}

/// Whether `path` lies inside `dir` (or is `dir`).
#[must_use]
pub fn is_within(path: &Path, dir: &Path) -> bool {
    absolute(path).starts_with(absolute(dir))
}

/// Refuse unsanitized output inside the shared directory.
///
/// # Errors
///
/// Returns [`CaptureError::UnsanitizedShared`] when `out` is inside
/// `shared_dir` and `sanitized` is false.
pub fn check_shared_dir(out: &Path, shared_dir: &Path, sanitized: bool) -> Result<(), CaptureError> {
    if !sanitized && is_within(out, shared_dir) {
        return Err(CaptureError::UnsanitizedShared {
            path: out.to_path_buf(),
        });
    }
    Ok(())
}

/// Executable names from the catalog's matchers that resolve on PATH.
#[must_use]
pub fn discover_executables(catalog: &Catalog, executor: &dyn Executor) -> Vec<String> {
    let mut found: Vec<String> = catalog
        .modules
        .values()
        .flat_map(|m| m.matches.exe_name.iter())
        .filter(|exe| {
            let lower = exe.to_lowercase();
            let stem = lower.strip_suffix(".exe").unwrap_or(&lower);
            executor.which(exe) || executor.which(stem)
        })
        .cloned()
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Build the captured manifest from a snapshot and catalog matches.
///
/// Apps are sorted by id with `ref` equal to the package id. Versions are
/// pinned only when `pin_versions` is set and the manager reports one.
#[must_use]
pub fn build_manifest(
    snapshot: &InstalledSnapshot,
    catalog: &Catalog,
    executables: &[String],
    options: &CaptureOptions,
) -> (Manifest, Vec<ModuleMatch>) {
    let mut apps: Vec<AppEntry> = snapshot
        .packages()
        .map(|pkg| {
            let entry = AppEntry::package(pkg.id.clone(), pkg.id.clone());
            match (&pkg.version, options.pin_versions) {
                (Some(v), true) => entry.with_version(v.clone()),
                _ => entry,
            }
        })
        .collect();
    apps.sort_by(|a, b| a.id.cmp(&b.id));

    let matches = catalog.match_installed(&snapshot.ids(), executables, &snapshot.display_names());
    let mut manifest = Manifest::named(options.name.clone());
    manifest.apps = apps;
    manifest.config_modules = matches.iter().map(|m| m.module_id.clone()).collect();

    if options.sanitize {
        manifest = sanitize::sanitize(&manifest, catalog);
    }
    (manifest, matches)
}

/// Serialize `manifest` for `path`: YAML for `.yaml`/`.yml`, JSON otherwise.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render(manifest: &Manifest, path: &Path) -> Result<String> {
    let yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    if yaml {
        serde_yaml::to_string(manifest).context("serializing manifest as YAML")
    } else {
        let mut text = serde_json::to_string_pretty(manifest).context("serializing manifest")?;
        text.push('\n');
        Ok(text)
    }
}

/// Copy every matched module's capture files under `configs_root/<module>/`.
///
/// Missing optional sources are skipped; missing required sources and copy
/// failures are logged and counted as skipped.
fn copy_module_configs(ctx: &Context, catalog: &Catalog, modules: &[String], configs_root: &Path) -> usize {
    let mut copied = 0;
    for id in modules {
        let Some(module) = catalog.get(id) else {
            continue;
        };
        let module_root = configs_root.join(id);
        for file in &module.capture.files {
            let source = PathBuf::from(expand_env(&file.source));
            if !source.exists() {
                if file.optional {
                    ctx.log.debug(&format!("skipping {}: {} not found", id, file.source));
                } else {
                    ctx.log.warn(&format!("{id}: capture source {} not found", file.source));
                }
                continue;
            }
            let result = std::fs::create_dir_all(&module_root)
                .with_context(|| format!("creating {}", module_root.display()))
                .and_then(|()| confine(&module_root, &file.dest).map_err(anyhow::Error::from))
                .and_then(|dest| {
                    if source.is_dir() {
                        fsutil::copy_tree(&source, &dest, |rel| {
                            let rel = rel.to_string_lossy();
                            module.capture.exclude_globs.iter().any(|g| matches_glob(g, &rel))
                        })
                    } else {
                        fsutil::copy_any(&source, &dest).map(|()| 1)
                    }
                });
            match result {
                Ok(n) => {
                    ctx.log.debug(&format!("captured {} ({n} files) for {id}", file.source));
                    copied += n;
                }
                Err(e) => ctx.log.warn(&format!("{id}: cannot capture {}: {e:#}", file.source)),
            }
        }
    }
    copied
}

/// Run a capture and write the result to `options.out`.
///
/// # Errors
///
/// Returns an error if a guardrail trips, the package manager cannot be
/// queried, or the output cannot be written.
pub fn capture(ctx: &Context, catalog: &Catalog, options: &CaptureOptions) -> Result<CaptureReport> {
    check_shared_dir(&options.out, &options.shared_dir, options.sanitize)?;

    ctx.log.stage("Capturing installed software");
    let snapshot = ctx.snapshot(true)?;
    let executables = discover_executables(catalog, ctx.executor.as_ref());
    ctx.log.debug(&format!(
        "{} packages installed, {} known executables on PATH",
        snapshot.len(),
        executables.len()
    ));

    let (manifest, matches) = build_manifest(&snapshot, catalog, &executables, options);
    for m in &matches {
        ctx.log.debug(&format!("matched {} ({})", m.module_id, m.reasons.join(", ")));
    }
    let text = render(&manifest, &options.out)?;

    if options.sanitize
        && let Some(marker) = find_leak(&text, &options.leak_markers)
    {
        return Err(CaptureError::LeakDetected {
            marker,
            path: options.out.clone(),
        }
        .into());
    }

    if ctx.dry_run {
        ctx.log.dry_run(&format!(
            "would write {} apps and {} config modules to {}",
            manifest.apps.len(),
            manifest.config_modules.len(),
            options.out.display()
        ));
        return Ok(CaptureReport {
            out: options.out.clone(),
            manifest,
            matches,
            config_files: 0,
        });
    }

    fsutil::ensure_parent_dir(&options.out)?;
    fsutil::write_atomic(&options.out, text.as_bytes()).map_err(|source| CaptureError::Io {
        path: options.out.clone(),
        source,
    })?;

    let config_files = if options.include_config && !options.sanitize {
        let out_dir = options.out.parent().unwrap_or_else(|| Path::new("."));
        copy_module_configs(ctx, catalog, &manifest.config_modules, &out_dir.join(CONFIGS_DIR))
    } else {
        0
    };

    ctx.log.info(&format!(
        "captured {} apps and {} config modules to {}",
        manifest.apps.len(),
        manifest.config_modules.len(),
        options.out.display()
    ));
    Ok(CaptureReport {
        out: options.out.clone(),
        manifest,
        matches,
        config_files,
    })
}
