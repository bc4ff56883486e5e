//! catalog-upgrade: upgrade orchestration for a metadata catalog
//!
//! Runs named, ordered upgrades (bootstrap seed data, lineage reindex, index
//! restore) against a versioned aspect store, publishing a change-log event for
//! every mutation and one history record per execution.

pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod logging;
pub mod steps;
pub mod store;
pub mod system;
pub mod types;
pub mod upgrade;
