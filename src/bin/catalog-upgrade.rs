//! catalog-upgrade CLI Binary
//!
//! Executes a named upgrade (`-u <name> -a <arg>...`) or inspects the registry
//! and the upgrade history.

use anyhow::Context;
use catalog_upgrade::cli::{exit_code_for_error, map_error, Cli, RunContext, EXIT_CONFIGURATION};
use catalog_upgrade::config::{validation_failure, ConfigLoader, UpgradeConfig};
use catalog_upgrade::logging::init_logging;
use catalog_upgrade::upgrade::ShutdownSignal;
use clap::Parser;
use std::process;
use tracing::{error, info, warn};

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(EXIT_CONFIGURATION);
        }
    };

    if let Err(e) = init_logging(Some(&config.logging)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(EXIT_CONFIGURATION);
    }

    info!("catalog-upgrade starting");

    let shutdown = ShutdownSignal::new();
    // Held for the whole run: the Ctrl-C watcher lives on it.
    let _runtime = match watch_ctrl_c(shutdown.clone()) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to install signal handler: {:#}", e);
            eprintln!("{:#}", e);
            process::exit(catalog_upgrade::cli::EXIT_OTHER);
        }
    };

    let context = match RunContext::new(config, shutdown) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error initializing upgrade engine: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(exit_code_for_error(&e));
        }
    };

    match context.execute(&cli) {
        Ok(output) => {
            println!("{}", output.text);
            process::exit(output.exit_code);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(exit_code_for_error(&e));
        }
    }
}

/// Load and validate configuration, then fold in CLI logging flags.
/// Precedence: CLI flags override environment override config files override defaults.
fn load_config(cli: &Cli) -> anyhow::Result<UpgradeConfig> {
    let mut config = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ConfigLoader::load(&cli.workspace).context("loading configuration")?,
    };
    config.validate().map_err(|errors| validation_failure(&errors))?;

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.logging.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.logging.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.logging.file = file.clone();
    }
    Ok(config)
}

/// Trigger `shutdown` on Ctrl-C. Upgrades keep running on the main thread and
/// stop at the next step or batch boundary.
fn watch_ctrl_c(shutdown: ShutdownSignal) -> anyhow::Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("signal-watcher")
        .enable_all()
        .build()
        .context("building signal runtime")?;
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next safe boundary");
            shutdown.trigger();
        }
    });
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_logging_config() {
        let temp = tempfile::tempdir().unwrap();
        let config_file = temp.path().join("upgrade.toml");
        std::fs::write(&config_file, "[logging]\nlevel = \"warn\"\n").unwrap();
        let path = config_file.to_string_lossy();
        let cli = Cli::try_parse_from([
            "catalog-upgrade",
            "--config",
            path.as_ref(),
            "--verbose",
            "--log-format",
            "json",
            "-u",
            "SystemUpdateBlocking",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_parse_upgrade_and_args() {
        let cli = Cli::try_parse_from([
            "catalog-upgrade",
            "-u",
            "RestoreIndices",
            "-a",
            "batchSize=10",
            "-a",
            "urnLike=urn:li:dataset:%",
        ])
        .unwrap();
        assert_eq!(cli.upgrade.as_deref(), Some("RestoreIndices"));
        assert_eq!(cli.args, vec!["batchSize=10", "urnLike=urn:li:dataset:%"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let config_file = temp.path().join("upgrade.toml");
        std::fs::write(&config_file, "[reindex]\nbatch_size = 0\n").unwrap();
        let path = config_file.to_string_lossy();
        let cli = Cli::try_parse_from(["catalog-upgrade", "--config", path.as_ref(), "list"]).unwrap();
        let err = load_config(&cli).unwrap_err();
        assert!(format!("{:#}", err).contains("batch_size"));
    }
}
