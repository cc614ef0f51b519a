#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! Integration tests for the `verify` command.
//!
//! Verify re-detects every declared app against a fake pacman and evaluates
//! verify entries. These tests cover each drift category, extras, state
//! recording, and the read-only nature of the pass.

mod common;

use common::TestContextBuilder;
use converge_cli::cli::VerifyOpts;
use converge_cli::commands;
use converge_cli::state::State;

const MANIFEST: &str = r#"{
  "version": 1,
  "name": "laptop",
  "apps": [
    { "id": "git", "ref": "git", "version": ">=2.0" },
    { "id": "neovim", "ref": "neovim", "version": "0.10.0" },
    { "id": "jq", "ref": "jq" }
  ],
  "verify": [
    { "type": "command-exists", "command": "pacman" }
  ]
}"#;

// ---------------------------------------------------------------------------
// Drift categories
// ---------------------------------------------------------------------------

#[test]
fn converged_machine_has_no_drift() {
    let ctx = TestContextBuilder::new()
        .with_manifest(MANIFEST)
        .with_pacman(|p| {
            p.installed("git", "2.44.0")
                .installed("neovim", "0.10.0")
                .installed("jq", "1.7.1")
        })
        .build();

    let result =
        commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    assert!(result.success());
    assert_eq!(result.ok_count, 3);
    assert_eq!(result.checks_passed, 1);
    assert!(result.checks_failed.is_empty());
}

#[test]
fn each_drift_category_is_counted() {
    let ctx = TestContextBuilder::new()
        .with_manifest(MANIFEST)
        .with_pacman(|p| {
            p.installed("git", "2.44.0")
                .installed("neovim", "0.9.5")
                .installed("htop", "3.3.0")
        })
        .build();

    let result =
        commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    assert!(!result.success());
    assert_eq!(result.ok_apps, vec!["git"]);
    assert_eq!(result.version_mismatch_apps, vec!["neovim"]);
    assert_eq!(result.missing_apps, vec!["jq"]);
    assert_eq!(result.extra_apps, vec!["htop"]);
}

#[test]
fn drift_is_symmetric_between_declared_and_installed() {
    let ctx = TestContextBuilder::new()
        .with_manifest(
            r#"{"version": 1, "apps": [{"id": "a", "ref": "a"}, {"id": "b", "ref": "b"}]}"#,
        )
        .with_pacman(|p| p.installed("b", "1.0").installed("c", "1.0"))
        .build();

    let result =
        commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    assert_eq!(result.missing_apps, vec!["a"]);
    assert_eq!(result.extra_apps, vec!["c"]);
    assert_eq!(result.ok_apps, vec!["b"]);
}

#[test]
fn extras_alone_are_not_drift() {
    let ctx = TestContextBuilder::new()
        .with_manifest(r#"{"version": 1, "apps": [{"id": "git", "ref": "git"}]}"#)
        .with_pacman(|p| p.installed("git", "2.44.0").installed("htop", "3.3.0"))
        .build();

    let result =
        commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    assert!(result.success());
    assert_eq!(result.extra_count, 1);
}

#[test]
fn failed_check_is_drift() {
    let ctx = TestContextBuilder::new()
        .with_manifest(
            r#"{"version": 1, "verify": [
                {"type": "command-exists", "command": "nvim"},
                {"type": "file-exists", "path": "/definitely/not/here"}
            ]}"#,
        )
        .build();

    let result =
        commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    assert!(!result.success());
    assert_eq!(
        result.checks_failed,
        vec![
            "command-exists nvim".to_string(),
            "file-exists /definitely/not/here".to_string()
        ]
    );
}

#[test]
fn pacman_release_suffix_does_not_break_minimums() {
    let ctx = TestContextBuilder::new()
        .with_manifest(
            r#"{"version": 1, "apps": [
                {"id": "ripgrep", "ref": "ripgrep", "version": ">=14.1.1"},
                {"id": "vim", "ref": "vim", "version": "9.1.0"}
            ]}"#,
        )
        .with_pacman(|p| p.installed("ripgrep", "14.1.1-1").installed("vim", "2:9.1.0-3"))
        .build();

    let result =
        commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    assert_eq!(result.ok_apps, vec!["ripgrep", "vim"]);
    assert!(result.version_mismatch_apps.is_empty());
    assert!(result.success());
}

#[test]
fn run_fails_on_drift() {
    let ctx = TestContextBuilder::new()
        .with_manifest(r#"{"version": 1, "apps": [{"id": "jq", "ref": "jq"}]}"#)
        .build();

    let err = commands::verify::run(&ctx.global(), &VerifyOpts::default(), &ctx.runtime())
        .unwrap_err();
    assert!(err.to_string().starts_with("drift detected: 1 missing"));
}

// ---------------------------------------------------------------------------
// State and side effects
// ---------------------------------------------------------------------------

#[test]
fn verify_records_state_and_observations() {
    let ctx = TestContextBuilder::new()
        .with_manifest(MANIFEST)
        .with_pacman(|p| p.installed("git", "2.44.0"))
        .build();

    commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    let state: State = serde_json::from_str(&ctx.read(".converge/state.json")).unwrap();

    assert!(state.last_applied.is_none(), "verify never records an apply");
    let record = state.last_verify.unwrap();
    assert_eq!(record.ok_count, 1);
    assert_eq!(record.missing_count, 2);
    assert!(!record.success);

    assert!(state.apps_observed["git"].installed);
    assert!(!state.apps_observed["jq"].installed);
    assert_eq!(state.apps_observed["jq"].version, None);
}

#[test]
fn no_state_and_dry_run_leave_state_alone() {
    let ctx = TestContextBuilder::new().with_manifest(MANIFEST).build();
    let opts = VerifyOpts {
        no_state: true,
        ..VerifyOpts::default()
    };
    commands::verify::execute(&ctx.global(), &opts, &ctx.runtime()).unwrap();
    commands::verify::execute(&ctx.dry_run(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    assert!(!ctx.state_path().exists());
}

#[test]
fn verify_logs_run_context() {
    let ctx = TestContextBuilder::new().with_manifest(MANIFEST).build();
    commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    let run: Vec<String> = ctx
        .log
        .lines()
        .into_iter()
        .filter(|l| l.starts_with("run: "))
        .collect();
    assert_eq!(run.len(), 1, "{run:?}");
    assert!(run[0].contains("manifest.jsonc |"));
    assert!(run[0].ends_with("(pacman)"));
}

#[test]
fn verify_never_installs() {
    let ctx = TestContextBuilder::new().with_manifest(MANIFEST).build();
    commands::verify::execute(&ctx.global(), &VerifyOpts::default(), &ctx.runtime()).unwrap();
    assert!(ctx.pacman.mutations().is_empty());
    assert_eq!(ctx.pacman.calls(), vec!["pacman -Q".to_string()]);
}
