//! CLI domain: parse, route, output, and presentation only.
//! No orchestration here; the route table dispatches to the upgrade manager.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::{
    exit_code_for_error, exit_code_for_report, map_error, EXIT_CONFIGURATION, EXIT_OTHER,
    EXIT_SUCCEEDED, EXIT_UNKNOWN_UPGRADE, EXIT_UPGRADE_FAILED,
};
pub use parse::{Cli, Commands};
pub use presentation::{format_history, format_report, format_upgrade_list};
pub use route::{CommandOutput, RunContext};
