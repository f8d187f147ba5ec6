//! CLI argument parsing with clap.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "ddosban")]
#[command(author, version, about = "Ban abusive clients from load balancer access logs")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Quiet mode (for cron/systemd timer)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output, allow-list in the summary)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate one window and update the firewall IP sets
    Run {
        /// Evaluate the window containing this instant (RFC 3339) instead of now
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,

        /// Dry-run mode: scan and decide but don't touch the firewall
        #[arg(long)]
        dry_run: bool,

        /// Output format (text, json)
        #[arg(long, short, default_value = "text")]
        format: String,
    },

    /// Print the window floor and partition key
    Window {
        /// Instant to resolve (RFC 3339), default now
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },

    /// Print decoded log lines of an archive or of a whole window
    Dump {
        /// Local gzip archive to read
        #[arg(long)]
        file: Option<PathBuf>,

        /// Dump every archive of the window containing this instant (RFC 3339)
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write the default configuration template
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration (secrets redacted)
    Show,

    /// Change the name of the ban IP set
    SetBanSet {
        /// New IP set name
        name: String,
    },
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("'{}' is not an RFC 3339 timestamp: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_options() {
        let cli = Cli::try_parse_from([
            "ddosban",
            "run",
            "--at",
            "2024-03-07T09:07:30+01:00",
            "--dry-run",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                at,
                dry_run,
                format,
            } => {
                assert_eq!(at.unwrap().to_rfc3339(), "2024-03-07T08:07:30+00:00");
                assert!(dry_run);
                assert_eq!(format, "json");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["ddosban", "window", "-c", "/tmp/ddosban.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/ddosban.yaml"));
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["ddosban", "version"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_bad_instant_rejected() {
        assert!(Cli::try_parse_from(["ddosban", "window", "--at", "yesterday"]).is_err());
    }

    #[test]
    fn test_config_set_ban_set() {
        let cli = Cli::try_parse_from(["ddosban", "config", "set-ban-set", "ban-v2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::SetBanSet { ref name }
            } if name == "ban-v2"
        ));
    }
}
