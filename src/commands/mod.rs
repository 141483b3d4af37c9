//! CLI command implementations for pipeline-monitor-exporter.
//!
//! This module provides implementations for all CLI subcommands:
//! - `check`: Configuration and connectivity validation
//! - `config`: Configuration file generation
//! - `discover`: Listing the monitored type:revision pairs
//! - `test`: Running fetch cycles once without serving HTTP

pub mod check;
pub mod config;
pub mod discover;

// Re-export command functions
pub use check::command_check;
pub use config::{command_config, show_config};
pub use discover::command_discover;
pub use test::command_test;
