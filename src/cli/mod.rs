//! CLI module for the hcloud-reconcile tool.
//!
//! This module provides the command-line interface for reconciling
//! Hetzner Cloud firewalls and networks.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::{MessageLevel, OutputFormatter};
