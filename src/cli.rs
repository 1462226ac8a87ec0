// src/cli.rs

//! CLI argument parsing using `clap`.

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};

/// Command-line arguments for `assetdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "assetdag",
    version,
    about = "Decide which data assets to materialize and coordinate their runs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `assetdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "assetdag.toml")]
    pub config: String,

    /// Evaluate a single tick, print the run requests, and exit.
    #[arg(long)]
    pub once: bool,

    /// Evaluation time for `--once` (RFC 3339). Defaults to now.
    #[arg(long, value_name = "TIMESTAMP", value_parser = parse_timestamp)]
    pub now: Option<DateTime<Utc>>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ASSETDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the asset graph, but don't evaluate anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{s}': {e}"))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = CliArgs::try_parse_from([
            "assetdag",
            "--config",
            "demo.toml",
            "--once",
            "--now",
            "2024-01-02T00:00:00Z",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config, "demo.toml");
        assert!(args.once);
        assert_eq!(args.now.map(|t| t.to_rfc3339()), Some("2024-01-02T00:00:00+00:00".to_string()));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(CliArgs::try_parse_from(["assetdag", "--now", "yesterday"]).is_err());
    }
}
