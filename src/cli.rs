use clap::Parser;
use std::path::PathBuf;

/// failover-monitor: detects sites whose clients bypass their squid caches.
///
/// Builds the site/squid topology from the geolist and exception list, diffs
/// the Frontier servers' AWStats counters against the previous poll, and
/// reports sites whose direct traffic stays above threshold.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "failover-monitor",
    version = "0.2.0",
    about   = "Frontier squid failover detection",
    long_about = None,
)]
pub struct Cli {
    // ── Configuration ────────────────────────────────────────────────────────

    /// TOML configuration file with a [general] table and one [groups.<name>]
    /// table per monitored group.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: PathBuf,

    /// Poll only this group. May be repeated; all groups run when omitted.
    #[arg(short = 'g', long = "group", value_name = "NAME")]
    pub groups: Vec<String>,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Write log output to this file in addition to stdout.
    ///
    /// The file is created if it does not exist and appended to if it does.
    /// JSON mode (--json) affects the format written to this file as well.
    #[arg(short = 'o', long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,

    /// Emit log entries as newline-delimited JSON (NDJSON).
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    // ── Resolution (overrides the configuration file) ────────────────────────

    /// Concurrent DNS lookups.
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Seconds before a single lookup gives up and maps to 0.0.0.0.
    #[arg(long = "resolve-timeout", value_name = "SECS")]
    pub resolve_timeout: Option<u64>,

    // ── History ──────────────────────────────────────────────────────────────

    /// Rows kept per site in the reduced history before collapsing into "Others".
    #[arg(long = "ranks", value_name = "N")]
    pub ranks: Option<usize>,

    /// Compute and report, but never write snapshot, history or notification files.
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_groups_and_overrides() {
        let cli = Cli::try_parse_from([
            "failover-monitor", "--config", "f.toml", "-g", "cms", "--group", "atlas",
            "--workers", "16", "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("f.toml"));
        assert_eq!(cli.groups, vec!["cms", "atlas"]);
        assert_eq!(cli.workers, Some(16));
        assert_eq!(cli.ranks, None);
        assert!(cli.dry_run);
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["failover-monitor"]).is_err());
    }
}
