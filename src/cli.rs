//! Command-line interface parsing for golook
//!
//! Each dataset is a subcommand taking the search query. The same subcommand
//! with `--download` is what the background worker runs.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// golook - look up golinks and authorized SSH keys from a local cache
#[derive(Parser, Debug)]
#[command(name = "golook")]
#[command(about = "Look up golinks and SSH public keys from a background-refreshed cache")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Search golinks
    Links(QueryArgs),
    /// Search authorized SSH public keys
    Keys(QueryArgs),
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryArgs {
    /// Search terms
    #[arg(default_value = "")]
    pub query: String,

    /// Run as the background refresh worker
    #[arg(long)]
    pub download: bool,

    /// Force a background refresh even if the cache is fresh
    #[arg(long)]
    pub refresh: bool,
}

impl Command {
    pub fn args(&self) -> &QueryArgs {
        match self {
            Command::Links(args) | Command::Keys(args) => args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_links_with_query() {
        let cli = Cli::parse_from(["golook", "links", "docs"]);
        assert_eq!(
            cli.command,
            Command::Links(QueryArgs {
                query: "docs".to_string(),
                download: false,
                refresh: false,
            })
        );
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_parse_query_defaults_to_empty() {
        let cli = Cli::parse_from(["golook", "keys"]);
        assert_eq!(cli.command.args().query, "");
    }

    #[test]
    fn test_cli_parse_download_worker() {
        let cli = Cli::parse_from(["golook", "keys", "--download"]);
        assert!(matches!(cli.command, Command::Keys(_)));
        assert!(cli.command.args().download);
    }

    #[test]
    fn test_cli_parse_refresh_and_config() {
        let cli = Cli::parse_from(["golook", "--config", "/etc/golook.toml", "keys", "--refresh"]);
        assert!(cli.command.args().refresh);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/golook.toml")));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["golook"]).is_err());
    }
}
