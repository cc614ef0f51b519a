//! Command-line interface definition.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI entry point for the convergence engine.
#[derive(Parser, Debug)]
#[command(
    name = "converge",
    about = "Single-host configuration convergence engine",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Override the repository root (also `CONVERGE_ROOT`)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Manifest to use instead of the configured one
    #[arg(short, long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Number of apps converged at once (0 or 1 runs sequentially)
    #[arg(short = 'j', long, global = true)]
    pub parallel: Option<usize>,

    /// Per-command timeout in seconds (0 disables it)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export installed software into a new manifest
    Capture(CaptureOpts),
    /// Converge the machine to the manifest
    Apply(ApplyOpts),
    /// Report drift between the manifest and the machine
    Verify(VerifyOpts),
    /// Show what apply would do
    Plan,
    /// Show the last recorded apply and verify
    Report,
    /// Check the environment for problems
    Doctor,
    /// Manage the state file
    State {
        /// State action.
        #[command(subcommand)]
        action: StateAction,
    },
    /// Generate shell completions
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Print version information
    Version,
}

/// Options for the `capture` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct CaptureOpts {
    /// Output manifest path (`.yaml`/`.yml` writes YAML, otherwise JSON)
    #[arg(short, long)]
    pub out: PathBuf,

    /// Write a shareable manifest with machine-specific data removed
    #[arg(long)]
    pub sanitize: bool,

    /// Also copy matched modules' config files beside the output
    #[arg(long, conflicts_with = "sanitize")]
    pub include_config: bool,

    /// Pin each app to its installed version
    #[arg(long, conflicts_with = "sanitize")]
    pub pin_versions: bool,

    /// Manifest name (defaults to the host name)
    #[arg(long)]
    pub name: Option<String>,
}

/// Options for the `apply` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct ApplyOpts {
    /// Skip the verify pass after apply
    #[arg(long)]
    pub no_verify: bool,

    /// Do not write the state file
    #[arg(long)]
    pub no_state: bool,
}

/// Options for the `verify` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct VerifyOpts {
    /// Do not write the state file
    #[arg(long)]
    pub no_state: bool,

    /// Print the drift report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Actions of the `state` subcommand.
#[derive(Subcommand, Debug, Clone)]
pub enum StateAction {
    /// Delete the state file
    Reset,
}
