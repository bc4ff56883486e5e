//! CLI route: one dispatch table from parsed commands to the upgrade engine.

use tracing::{debug, info};

use crate::cli::output::{exit_code_for_report, EXIT_SUCCEEDED};
use crate::cli::parse::{Cli, Commands};
use crate::cli::presentation::{format_history, format_report, format_upgrade_list};
use crate::config::UpgradeConfig;
use crate::error::UpgradeError;
use crate::events::UpgradeHistoryEvent;
use crate::system::{build_manager, SledSystem};
use crate::upgrade::{OperationContext, ShutdownSignal, UpgradeManager};

/// Rendered command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub exit_code: i32,
}

/// Everything a command needs, opened once per process.
pub struct RunContext {
    system: SledSystem,
    manager: UpgradeManager,
    config: UpgradeConfig,
}

impl RunContext {
    pub fn new(config: UpgradeConfig, shutdown: ShutdownSignal) -> Result<Self, UpgradeError> {
        let system = SledSystem::open(&config)?;
        let manager = build_manager(&config, &system.entities, system.history.clone())?
            .with_shutdown(shutdown);
        debug!(store = %config.storage.path.display(), "Run context ready");
        Ok(Self {
            system,
            manager,
            config,
        })
    }

    pub fn manager(&self) -> &UpgradeManager {
        &self.manager
    }

    pub fn execute(&self, cli: &Cli) -> Result<CommandOutput, UpgradeError> {
        match (&cli.command, &cli.upgrade) {
            (Some(Commands::List), _) => self.list(&cli.format),
            (Some(Commands::History { upgrade, limit }), _) => {
                self.history(upgrade.as_deref(), *limit, &cli.format)
            }
            (None, Some(name)) => self.run_upgrade(name, &cli.args, &cli.format),
            (None, None) => Err(UpgradeError::ConfigError(
                "no upgrade given: use -u <name>, `list` or `history`".to_string(),
            )),
        }
    }

    fn run_upgrade(
        &self,
        name: &str,
        args: &[String],
        format: &str,
    ) -> Result<CommandOutput, UpgradeError> {
        let op = OperationContext::system();
        let report = self.manager.execute(&op, name, args)?;
        info!(upgrade = %name, overall = %report.overall, "Upgrade command finished");
        Ok(CommandOutput {
            text: format_report(&report, format)?,
            exit_code: exit_code_for_report(&report),
        })
    }

    fn list(&self, format: &str) -> Result<CommandOutput, UpgradeError> {
        let upgrades: Vec<_> = self
            .manager
            .upgrade_names()
            .into_iter()
            .filter_map(|name| self.manager.get(name))
            .collect();
        let refs: Vec<_> = upgrades.iter().map(|u| u.as_ref()).collect();
        Ok(CommandOutput {
            text: format_upgrade_list(&refs, format)?,
            exit_code: EXIT_SUCCEEDED,
        })
    }

    fn history(
        &self,
        upgrade: Option<&str>,
        limit: usize,
        format: &str,
    ) -> Result<CommandOutput, UpgradeError> {
        let messages = self.system.topic_log.read_all(&self.config.events.history_topic)?;
        let mut events: Vec<UpgradeHistoryEvent> = Vec::with_capacity(messages.len());
        for message in &messages {
            let event = self.system.history.decode(message)?;
            if upgrade.map_or(true, |name| event.report.upgrade_name == name) {
                events.push(event);
            }
        }
        events.reverse();
        events.truncate(limit);
        Ok(CommandOutput {
            text: format_history(&events, format)?,
            exit_code: EXIT_SUCCEEDED,
        })
    }
}
