//! Top-level subcommand orchestration.
pub mod apply;
pub mod capture;
pub mod doctor;
pub mod plan;
pub mod report;
pub mod state;
pub mod verify;
pub mod version;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context as _, Result};

use crate::catalog::{Catalog, CatalogCache};
use crate::cli::GlobalOpts;
use crate::engine::Context;
use crate::error::ConvergeError;
use crate::exec::{Executor, SystemExecutor};
use crate::logging::{Log, RunContext};
use crate::manifest::hash::expanded_hash;
use crate::manifest::{LoadedManifest, Manifest, expand::expand};
use crate::platform::Platform;
use crate::settings::{Settings, resolve_root};
use crate::state::{Clock, RunInfo, StateStore, SystemClock};

/// Process-wide collaborators handed to every command.
///
/// `main` builds one over the real logger, processes, and wall clock; tests
/// substitute doubles.
pub struct Runtime {
    /// Output and outcome recording.
    pub log: Arc<dyn Log>,
    /// Executor override; `None` spawns real processes with the configured
    /// timeout.
    pub executor: Option<Arc<dyn Executor>>,
    /// Source of state timestamps.
    pub clock: Arc<dyn Clock>,
    /// Set on Ctrl-C.
    pub cancel: Arc<AtomicBool>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("log", &"<dyn Log>")
            .field("executor", &self.executor)
            .field("clock", &self.clock)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Runtime {
    /// Runtime over real processes and the wall clock.
    #[must_use]
    pub fn new(log: Arc<dyn Log>) -> Self {
        Self {
            log,
            executor: None,
            clock: Arc::new(SystemClock),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `executor` instead of spawning real processes.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use `clock` for state timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share `cancel` with the Ctrl-C handler.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn executor_for(&self, settings: &Settings) -> Arc<dyn Executor> {
        self.executor.as_ref().map_or_else(
            || {
                let executor = settings
                    .timeout()
                    .map_or_else(SystemExecutor::new, SystemExecutor::with_timeout);
                Arc::new(executor) as Arc<dyn Executor>
            },
            Arc::clone,
        )
    }
}

/// Root, settings, and platform: what every repository command needs.
#[derive(Debug)]
pub struct Workspace {
    /// Repository root.
    pub root: PathBuf,
    /// Effective settings.
    pub settings: Settings,
    /// Executor for this invocation.
    pub executor: Arc<dyn Executor>,
    /// Detected platform.
    pub platform: Platform,
}

impl Workspace {
    /// Resolve the root, read settings, and detect the platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be determined or the settings
    /// file is malformed.
    pub fn open(global: &GlobalOpts, rt: &Runtime) -> Result<Self> {
        let root = resolve_root(global)?;
        let settings = Settings::load(&root)?.with_overrides(global);
        let executor = rt.executor_for(&settings);
        let platform = Platform::detect(executor.as_ref(), settings.package_manager);
        let manifest = settings.manifest_path(&root).ok();
        rt.log.run_context(&RunContext {
            root: &root,
            manifest: manifest.as_deref(),
            platform: &format!("{} ({})", platform.os, platform.manager),
        });
        Ok(Self {
            root,
            settings,
            executor,
            platform,
        })
    }

    /// Load the config module catalog, warning about every issue.
    #[must_use]
    pub fn catalog(&self, log: &dyn Log) -> Arc<Catalog> {
        let catalog = CatalogCache::new(self.settings.catalog_path(&self.root)).load(false);
        for issue in &catalog.issues {
            log.warn(&format!("catalog: {issue}"));
        }
        log.debug(&format!("{} config modules available", catalog.modules.len()));
        catalog
    }

    /// Engine context for this workspace.
    #[must_use]
    pub fn context(&self, rt: &Runtime, dry_run: bool) -> Context {
        Context::new(
            self.root.clone(),
            Arc::clone(&rt.log),
            Arc::clone(&self.executor),
            self.platform.clone(),
            dry_run,
            self.settings.parallelism,
        )
        .with_cancel(Arc::clone(&rt.cancel))
    }

    /// State store under the configured state directory.
    #[must_use]
    pub fn state_store(&self) -> StateStore {
        StateStore::new(&self.settings.state_path(&self.root))
    }
}

/// Load the manifest at `path` and merge its config modules from `catalog`.
fn load_and_expand(path: &Path, catalog: &Catalog) -> Result<(LoadedManifest, Manifest), ConvergeError> {
    let loaded = crate::manifest::load(path)?;
    let expanded = expand(&loaded.manifest, catalog)?;
    Ok((loaded, expanded))
}

/// Shared state produced by the common command setup sequence.
///
/// Encapsulates root and settings resolution, manifest loading, and module
/// expansion so that each command does not have to repeat the boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    /// Root, settings, and platform.
    pub workspace: Workspace,
    /// The manifest as authored (includes merged).
    pub loaded: LoadedManifest,
    /// The manifest with config modules merged in.
    pub expanded: Manifest,
    /// Hash of [`expanded`](Self::expanded).
    pub expanded_hash: String,
}

impl CommandSetup {
    /// Open the workspace, then load and expand the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be opened, the manifest
    /// cannot be found or parsed, or it names an unknown config module.
    pub fn init(global: &GlobalOpts, rt: &Runtime) -> Result<Self> {
        Self::load(Workspace::open(global, rt)?, rt)
    }

    /// Load and expand the manifest of an already opened workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be found or parsed, or it
    /// names an unknown config module.
    pub fn load(workspace: Workspace, rt: &Runtime) -> Result<Self> {
        let path = workspace.settings.manifest_path(&workspace.root)?;

        rt.log.stage("Loading manifest");
        let catalog = workspace.catalog(rt.log.as_ref());
        let (loaded, expanded) = load_and_expand(&path, &catalog)
            .with_context(|| format!("Failed to load manifest {}", path.display()))?;
        let expanded_hash = expanded_hash(&expanded);

        rt.log.info(&format!(
            "manifest: {} ({} apps, {} restore, {} verify)",
            if loaded.manifest.name.is_empty() {
                path.display().to_string()
            } else {
                loaded.manifest.name.clone()
            },
            expanded.apps.len(),
            expanded.restore.len(),
            expanded.verify.len()
        ));
        if !expanded.expanded_modules.is_empty() {
            rt.log
                .debug(&format!("modules: {}", expanded.expanded_modules.join(", ")));
        }
        rt.log.debug(&format!("manifest hash: {}", loaded.hash));
        rt.log.debug(&format!("expanded hash: {expanded_hash}"));

        Ok(Self {
            workspace,
            loaded,
            expanded,
            expanded_hash,
        })
    }

    /// Manifest identity recorded in state.
    #[must_use]
    pub fn run_info(&self) -> RunInfo<'_> {
        RunInfo {
            manifest_path: &self.loaded.path,
            manifest_hash: &self.loaded.hash,
            expanded_hash: &self.expanded_hash,
        }
    }
}
