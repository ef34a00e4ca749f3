//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConnectionConfig;
use crate::error::Result;

/// xenvm - Declarative XenServer VM manager.
#[derive(Parser, Debug)]
#[command(name = "xenvm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "XENVM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Host connection.
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// XenAPI connection arguments.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Host URL, e.g. `https://xen.example.com`.
    #[arg(long, global = true, env = "XENSERVER_URL")]
    pub url: Option<String>,

    /// XenAPI user name.
    #[arg(long, global = true, env = "XENSERVER_USERNAME")]
    pub username: Option<String>,

    /// XenAPI password.
    #[arg(long, global = true, env = "XENSERVER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value = "60")]
    pub timeout: u64,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter `xenvm.yaml` and `.env.example`.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration without contacting the host.
    Validate {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the operations `apply` would run.
    Plan,

    /// Create or converge the VM.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the VM, pending changes and the last run.
    Status,

    /// Destroy the VM, its VBDs and its VIFs. VDIs are kept.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect or manage the local state cache.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the cached state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to release.
        #[arg(long, required_unless_present = "force")]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl ConnectionArgs {
    /// Resolves the connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing variable.
    pub fn resolve(&self) -> Result<ConnectionConfig> {
        ConnectionConfig::resolve(self.url.clone(), self.username.clone(), self.password.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_state_unlock() {
        let cli = Cli::try_parse_from(["xenvm", "--output", "json", "state", "unlock", "--force"])
            .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock { force: true, lock_id: None }
            }
        ));

        assert!(Cli::try_parse_from(["xenvm", "state", "unlock"]).is_err());
    }

    #[test]
    fn test_connection_flags() {
        let cli = Cli::try_parse_from([
            "xenvm",
            "plan",
            "--url",
            "https://xen.lab",
            "--username",
            "root",
            "--password",
            "pw",
        ])
        .unwrap();
        let connection = cli.connection.resolve().unwrap();
        assert_eq!(connection.url, "https://xen.lab");
        assert_eq!(cli.connection.timeout, 60);
    }
}
