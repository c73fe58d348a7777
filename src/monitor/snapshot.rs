//! Traffic snapshot: cumulative per-host counters persisted between polls.
//!
//! File layout: the capture time as epoch seconds on the first line, then a
//! CSV table `Host,Ip,Hits,Bandwidth,LastVisit`.

use crate::error::{FailoverError, Result};
use crate::monitor::host::{ResolutionTable, UNRESOLVED};
use crate::monitor::storage::{from_csv, to_csv, write_atomic};
use crate::monitor::types::{SnapshotEntry, TrafficSnapshot, VisitorRow};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

fn identity(entry: &SnapshotEntry) -> String {
    if entry.ip == UNRESOLVED {
        entry.host.clone()
    } else {
        entry.ip.to_string()
    }
}

impl TrafficSnapshot {
    /// Builds a snapshot from aggregated visitor rows.
    ///
    /// Rows whose hosts resolve to the same address are summed under it.
    pub fn from_visitors(timestamp: i64, rows: &[VisitorRow], table: &ResolutionTable) -> Self {
        let mut snapshot = Self {
            timestamp,
            ..Default::default()
        };
        for row in rows {
            let candidate = SnapshotEntry {
                host: row.host.clone(),
                ip: table.lookup(&row.host).primary_ip(),
                hits: row.hits,
                bandwidth: row.bandwidth,
                last_visit: row.last_visit,
            };
            snapshot.add(candidate);
        }
        snapshot
    }

    fn add(&mut self, entry: SnapshotEntry) {
        match self.entries.get_mut(&identity(&entry)) {
            Some(existing) => {
                existing.hits = existing.hits.saturating_add(entry.hits);
                existing.bandwidth = existing.bandwidth.saturating_add(entry.bandwidth);
                existing.last_visit = existing.last_visit.max(entry.last_visit);
            }
            None => {
                self.entries.insert(identity(&entry), entry);
            }
        }
    }

    /// Loads a snapshot. `Ok(None)` when the file does not exist (first run).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FailoverError::io(path, e)),
        };
        let (header, body) = text.split_once('\n').unwrap_or((text.as_str(), ""));
        let timestamp = header
            .trim()
            .parse::<i64>()
            .map_err(|_| FailoverError::SnapshotHeader(path.display().to_string()))?;

        let mut snapshot = Self {
            timestamp,
            ..Default::default()
        };
        for entry in from_csv::<SnapshotEntry>(body)? {
            snapshot.add(entry);
        }
        Ok(Some(snapshot))
    }

    /// Atomically replaces the snapshot file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let rows: Vec<SnapshotEntry> = self.entries.values().cloned().collect();
        let mut contents = format!("{}\n", self.timestamp).into_bytes();
        contents.extend(to_csv(&rows)?);
        write_atomic(path, &contents)
    }

    pub fn total_hits(&self) -> u64 {
        self.entries.values().map(|e| e.hits).sum()
    }
}
