//! Integration tests for the catalog upgrade engine

mod cli_commands;
mod sled_backend;
mod system_upgrades;
mod test_utils;
