//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - janitor: purge expired coordination rows, once or periodically
//! - config: print the resolved configuration
//! - presence: list presence records for a channel

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chorus - turn scheduling for multi-avatar channels
#[derive(Parser, Debug)]
#[command(name = "chorus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the coordination database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Delete expired locks, leases, threads and other stale rows
    Janitor {
        /// Keep running on the configured interval until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Print the resolved configuration as YAML
    Config,

    /// List presence records for a channel
    Presence {
        /// Channel to inspect
        channel: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["chorus"]).is_err());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from(["chorus", "-v", "-c", "/etc/chorus.yml", "config"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/etc/chorus.yml")));
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn test_janitor_once_and_watch() {
        let cli = Cli::try_parse_from(["chorus", "janitor"]).unwrap();
        assert!(matches!(cli.command, Commands::Janitor { watch: false }));

        let cli = Cli::try_parse_from(["chorus", "janitor", "--watch", "--db", "/tmp/c.db"]).unwrap();
        assert!(matches!(cli.command, Commands::Janitor { watch: true }));
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/c.db")));
    }

    #[test]
    fn test_presence_requires_channel() {
        assert!(Cli::try_parse_from(["chorus", "presence"]).is_err());
        let cli = Cli::try_parse_from(["chorus", "presence", "general"]).unwrap();
        match cli.command {
            Commands::Presence { channel } => assert_eq!(channel, "general"),
            _ => panic!("Expected presence command"),
        }
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
