//! Single-host configuration convergence engine.
//!
//! Given a declarative manifest of desired machine state (applications with
//! version constraints, configuration files to restore, facts to verify),
//! converge computes what must change, applies it through pluggable drivers,
//! verifies the result, and records an auditable state file for drift
//! detection across runs.
//!
//! The public API is organised into layers:
//!
//! - **[`manifest`]** and **[`catalog`]**: parse manifests and config modules, expand modules
//! - **[`drivers`]**: uniform detect/install/upgrade over package managers and custom scripts
//! - **[`engine`]**: plan, apply, and verify passes on a bounded worker pool
//! - **[`state`]** and **[`capture`]**: persist run records; export installed software
//! - **[`commands`]**: top-level subcommand orchestration
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod capture;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod exec;
pub mod fsutil;
pub mod logging;
pub mod manifest;
pub mod platform;
pub mod settings;
pub mod state;
pub mod version;
