//! CLI routing: commands, exit codes and rendered output

use catalog_upgrade::cli::{
    exit_code_for_error, Cli, RunContext, EXIT_SUCCEEDED, EXIT_UNKNOWN_UPGRADE,
};
use catalog_upgrade::config::ConfigLoader;
use catalog_upgrade::upgrade::ShutdownSignal;
use clap::Parser;
use tempfile::TempDir;

use crate::integration::test_utils::with_isolated_home;

/// Workspace with config/config.toml pointing the store into the temp dir.
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    let store = dir.path().join("store");
    std::fs::write(
        config_dir.join("config.toml"),
        format!(
            "[storage]\npath = {:?}\n\n[execution]\nretry_delay_ms = 0\n",
            store.to_string_lossy()
        ),
    )
    .unwrap();
    dir
}

fn context(dir: &TempDir, shutdown: ShutdownSignal) -> RunContext {
    let config = with_isolated_home(dir, || ConfigLoader::load(dir.path())).unwrap();
    RunContext::new(config, shutdown).unwrap()
}

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["catalog-upgrade"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[test]
fn list_shows_registered_upgrades() {
    let dir = workspace();
    let ctx = context(&dir, ShutdownSignal::new());
    let output = ctx.execute(&parse(&["list"])).unwrap();
    assert_eq!(output.exit_code, EXIT_SUCCEEDED);
    assert!(output.text.contains("SystemUpdateBlocking"));
    assert!(output.text.contains("ReindexDataJobViaNodesCll"));
}

#[test]
fn unknown_upgrade_maps_to_exit_code_two() {
    let dir = workspace();
    let ctx = context(&dir, ShutdownSignal::new());
    let err = ctx.execute(&parse(&["-u", "NoSuchUpgrade"])).unwrap_err();
    assert_eq!(exit_code_for_error(&err), EXIT_UNKNOWN_UPGRADE);
}

#[test]
fn run_then_history_in_json() {
    let dir = workspace();
    let ctx = context(&dir, ShutdownSignal::new());

    let run = ctx
        .execute(&parse(&["-u", "SystemUpdateBlocking", "--format", "json"]))
        .unwrap();
    assert_eq!(run.exit_code, EXIT_SUCCEEDED);
    let report: serde_json::Value = serde_json::from_str(&run.text).unwrap();
    assert_eq!(report["overall"], "SUCCEEDED");

    let history = ctx.execute(&parse(&["history", "--format", "json"])).unwrap();
    let events: serde_json::Value = serde_json::from_str(&history.text).unwrap();
    assert_eq!(events.as_array().unwrap().len(), 1);
    assert_eq!(events[0]["report"]["upgrade_name"], "SystemUpdateBlocking");

    let filtered = ctx
        .execute(&parse(&["history", "-u", "RestoreIndices"]))
        .unwrap();
    assert!(filtered.text.contains("No upgrade history"));
}

#[test]
fn interrupted_run_exits_with_failure() {
    let dir = workspace();
    let shutdown = ShutdownSignal::new();
    let ctx = context(&dir, shutdown.clone());
    shutdown.trigger();

    let output = ctx.execute(&parse(&["-u", "SystemUpdateNonBlocking"])).unwrap();
    assert_eq!(output.exit_code, 1);
    assert!(output.text.contains("FAILED"));
    assert!(output.text.contains("FlushStore"));
}
