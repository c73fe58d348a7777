//! Persistence test and notification cool-down.
//!
//! A flagged site only earns a notification once it was flagged in two
//! back-to-back polls, and at most once per cool-down window.

use crate::error::Result;
use crate::monitor::eviction::{evict, window_start, Timestamped};
use crate::monitor::storage::{read_csv_file, to_csv, write_atomic};
use crate::monitor::types::FailoverEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Hours skipped between consecutive distinct timestamps.
///
/// The first timestamp has no predecessor and gets `-1`; a pair one hour
/// apart gets `0`.
pub fn wait_hours(timestamps: &[i64]) -> Vec<i64> {
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut waits = Vec::with_capacity(sorted.len());
    let mut previous: Option<i64> = None;
    for ts in sorted {
        let diff = previous.map_or(0, |p| ts - p);
        waits.push((diff as f64 / 3600.0).round() as i64 - 1);
        previous = Some(ts);
    }
    waits
}

/// Sites flagged in at least two immediately consecutive polls.
pub fn mark_persistent(history: &[FailoverEvent]) -> BTreeSet<String> {
    let mut per_site: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for event in history {
        per_site.entry(event.site.as_str()).or_default().push(event.timestamp);
    }
    per_site
        .into_iter()
        .filter(|(_, stamps)| wait_hours(stamps).iter().skip(1).any(|w| *w == 0))
        .map(|(site, _)| site.to_string())
        .collect()
}

/// One sent notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    pub site:      String,
    pub group:     String,
    pub timestamp: i64,
}

impl Timestamped for Notification {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// CSV log of sent notifications, pruned to the cool-down window on save.
#[derive(Debug, Clone, Default)]
pub struct NotificationLog {
    path:    PathBuf,
    entries: Vec<Notification>,
}

impl NotificationLog {
    /// Reads the log. A missing file is an empty log.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            path:    path.to_path_buf(),
            entries: read_csv_file(path)?.unwrap_or_default(),
        })
    }

    /// A log bound to `path` with no entries, for when the file is unreadable.
    pub fn empty(path: &Path) -> Self {
        Self {
            path:    path.to_path_buf(),
            entries: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    /// True when `site` was notified at or after `now - cooldown_hours`.
    pub fn recently_notified(&self, site: &str, now: i64, cooldown_hours: u64) -> bool {
        let since = window_start(now, cooldown_hours);
        self.entries.iter().any(|n| n.site == site && n.timestamp >= since)
    }

    pub fn record(&mut self, site: &str, group: &str, now: i64) {
        self.entries.push(Notification {
            site:      site.to_string(),
            group:     group.to_string(),
            timestamp: now,
        });
    }

    /// Drops rows older than the cool-down window and rewrites the file.
    pub fn save(&mut self, now: i64, cooldown_hours: u64) -> Result<()> {
        evict(&mut self.entries, now, cooldown_hours);
        write_atomic(&self.path, &to_csv(&self.entries)?)
    }
}

/// Persistent sites flagged in this poll that are outside their cool-down.
pub fn select_for_notification(
    persistent:     &BTreeSet<String>,
    current_sites:  &BTreeSet<String>,
    log:            &NotificationLog,
    now:            i64,
    cooldown_hours: u64,
) -> (Vec<String>, Vec<String>) {
    let mut notify = Vec::new();
    let mut suppressed = Vec::new();
    for site in persistent.intersection(current_sites) {
        if log.recently_notified(site, now, cooldown_hours) {
            suppressed.push(site.clone());
        } else {
            notify.push(site.clone());
        }
    }
    (notify, suppressed)
}
