//! CLI module for xenvm.
//!
//! This module provides the command-line interface for managing XenServer
//! VMs from a YAML description.

mod commands;
mod output;

pub use commands::{Cli, Commands, ConnectionArgs, OutputFormat, StateCommands};
pub use output::OutputFormatter;
