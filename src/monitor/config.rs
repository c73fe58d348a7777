use crate::error::{FailoverError, Result};
use crate::monitor::records::EventAggregation;
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sentinel organization returned whenever a lookup has no answer.
pub const UNKNOWN_ORG: &str = "Unknown";

/// Default direct-traffic threshold: 10k queries per hour, in queries/second.
pub const DEFAULT_RATE_THRESHOLD: f64 = 10e3 / 3600.0;

/// Concurrent name lookups per poll.
pub const DEFAULT_RESOLVER_WORKERS: usize = 8;

/// Upper bound on a single forward or reverse lookup.
///
/// A lookup that exceeds it resolves to the `0.0.0.0` sentinel instead of
/// stalling the poll.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Rolling window of the failover history.
pub const DEFAULT_HISTORY_SPAN_HOURS: u64 = 72;

/// A site notified within this many hours is not notified again.
pub const DEFAULT_NOTIFY_COOLDOWN_HOURS: u64 = 24;

/// Rows kept per group in the reduced history before collapsing into "Others".
pub const DEFAULT_RANKS: usize = 12;

/// AWStats data files are named by month, year and day, e.g. `awstats11202314`.
pub const DEFAULT_AWSTATS_DATE_FORMAT: &str = "%m%Y%d";

/// Whole run configuration, read from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub general: General,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}

/// Settings shared by every group.
#[derive(Debug, Clone, Deserialize)]
pub struct General {
    /// URL or path of the geolist text.
    pub geolist: String,
    /// URL or path of the exception list text.
    pub exceptionlist: String,
    /// Organization table; without it every lookup answers `"Unknown"`.
    pub org_table: Option<PathBuf>,
    /// Root directory holding one subdirectory of AWStats data per instance.
    pub awstats_dir: PathBuf,
    #[serde(default = "default_awstats_date_format")]
    pub awstats_date_format: String,
    #[serde(default = "default_resolver_workers")]
    pub resolver_workers: usize,
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
    #[serde(default = "default_history_span_hours")]
    pub history_span_hours: u64,
    #[serde(default = "default_notify_cooldown_hours")]
    pub notify_cooldown_hours: u64,
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    /// CSV log of notifications already sent, shared by all groups.
    pub notification_log: PathBuf,
    /// How rows past the rank cut are folded into "Others".
    #[serde(default)]
    pub reduction: EventAggregation,
}

/// One monitored group of Frontier server instances.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub display_name: String,
    /// AWStats instance names whose counters are summed for this group.
    pub instances: Vec<String>,
    /// Direct-traffic threshold in queries/second.
    #[serde(default = "default_rate_threshold")]
    pub rate_threshold: f64,
    pub history_file: PathBuf,
    pub snapshot_file: PathBuf,
    pub reduced_file: Option<PathBuf>,
}

impl GroupConfig {
    /// Reduced history path; `history.csv` maps to `history.reduced.csv`.
    pub fn reduced_path(&self) -> PathBuf {
        if let Some(p) = &self.reduced_file {
            return p.clone();
        }
        let stem = self
            .history_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "history".to_string());
        let name = match self.history_file.extension() {
            Some(ext) => format!("{}.reduced.{}", stem, ext.to_string_lossy()),
            None => format!("{}.reduced", stem),
        };
        self.history_file.with_file_name(name)
    }
}

impl Settings {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| FailoverError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            return Err(FailoverError::Config("no [groups.*] table defined".into()));
        }
        if !is_valid_date_format(&self.general.awstats_date_format) {
            return Err(FailoverError::Config(format!(
                "awstats_date_format '{}' is not a valid strftime string",
                self.general.awstats_date_format
            )));
        }
        if self.general.resolver_workers == 0 {
            return Err(FailoverError::Config("resolver_workers must be at least 1".into()));
        }
        for (name, group) in &self.groups {
            if group.instances.is_empty() {
                return Err(FailoverError::Config(format!("group '{}' lists no instances", name)));
            }
            if !(group.rate_threshold.is_finite() && group.rate_threshold >= 0.0) {
                return Err(FailoverError::Config(format!(
                    "group '{}' has an invalid rate_threshold",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.general.resolve_timeout_secs)
    }
}

/// True when every item of a strftime string is recognised by chrono.
pub fn is_valid_date_format(fmt: &str) -> bool {
    !StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error))
}

fn default_awstats_date_format() -> String {
    DEFAULT_AWSTATS_DATE_FORMAT.to_string()
}
fn default_resolver_workers() -> usize {
    DEFAULT_RESOLVER_WORKERS
}
fn default_resolve_timeout_secs() -> u64 {
    DEFAULT_RESOLVE_TIMEOUT.as_secs()
}
fn default_history_span_hours() -> u64 {
    DEFAULT_HISTORY_SPAN_HOURS
}
fn default_notify_cooldown_hours() -> u64 {
    DEFAULT_NOTIFY_COOLDOWN_HOURS
}
fn default_ranks() -> usize {
    DEFAULT_RANKS
}
fn default_rate_threshold() -> f64 {
    DEFAULT_RATE_THRESHOLD
}
