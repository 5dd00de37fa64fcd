use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::database::models::TargetUpdate;
use crate::monitoring::types::Protocol;

#[derive(Parser, Debug)]
#[command(author, version, about = "Endpoint availability monitor", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sweep all targets until interrupted
    Run,
    /// Run a single sweep and print its summary
    Sweep,
    /// Manage monitored targets
    #[command(subcommand)]
    Targets(TargetCommand),
    /// Show the newest checks of a target
    History {
        id: i64,
        /// Number of checks to show (1..=500)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Tell whether a target was healthy at a point in time
    WasHealthy {
        id: i64,
        /// ISO 8601 timestamp; without an offset it is read as UTC
        #[arg(long, value_parser = parse_timestamp)]
        at: DateTime<Utc>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum TargetCommand {
    /// Register a new target
    Add {
        name: String,
        address: String,
        #[arg(short, long)]
        protocol: Protocol,
    },
    /// List all targets
    List,
    /// Show a target and its latest checks
    Show { id: i64 },
    /// Change a target's name, address or protocol
    Update(UpdateArgs),
    /// Delete a target and its history
    Remove { id: i64 },
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub id: i64,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub protocol: Option<Protocol>,
}

impl From<UpdateArgs> for TargetUpdate {
    fn from(args: UpdateArgs) -> Self {
        TargetUpdate { name: args.name, address: args.address, protocol: args.protocol }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("not an ISO 8601 timestamp: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T14:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T12:30:00").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::parse_from(["vigil", "targets", "add", "srv1", "https://a.test", "--protocol", "https"]);
        assert!(matches!(
            cli.command,
            Command::Targets(TargetCommand::Add { protocol: Protocol::Https, .. })
        ));

        let cli = Cli::parse_from(["vigil", "--config", "/tmp/vigil.toml", "history", "3", "--limit", "20"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/vigil.toml")));
        assert!(matches!(cli.command, Command::History { id: 3, limit: Some(20) }));
    }

    #[test]
    fn test_cli_rejects_unknown_protocol() {
        let parsed = Cli::try_parse_from(["vigil", "targets", "add", "srv", "icmp://a", "--protocol", "icmp"]);
        assert!(parsed.is_err());
    }
}
