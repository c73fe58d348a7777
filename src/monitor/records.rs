//! Failover history and its rank-reduced companion file.
//!
//! The history keeps every flagged host of every poll inside a rolling
//! window. The reduced file keeps, per `(poll, group, site, squid/direct)`,
//! only the busiest hosts and folds the rest into one `"Others"` row so the
//! file stays small however many hosts a site flags.

use crate::error::Result;
use crate::logger::{Event, Logger};
use crate::monitor::eviction::evict;
use crate::monitor::storage::{read_csv_file, to_csv, write_atomic};
use crate::monitor::types::FailoverEvent;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Label written into the tag fields of a collapsed row.
pub const OTHERS: &str = "Others";

/// How a numeric column is folded when rows collapse into "Others".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Max,
    Min,
    Mean,
}

impl Aggregation {
    pub fn apply<I: IntoIterator<Item = f64>>(self, values: I) -> f64 {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Mean => values.iter().sum::<f64>() / values.len() as f64,
        }
    }
}

/// Identifying columns overwritten with [`OTHERS`] on a collapsed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagField {
    Host,
    Alias,
    Ip,
}

/// Per-column folding rules for [`FailoverEvent`] rows.
///
/// Read from the optional `[general.reduction]` table; omitted keys keep
/// their default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventAggregation {
    pub hits:           Aggregation,
    pub hits_rate:      Aggregation,
    pub bandwidth:      Aggregation,
    pub bandwidth_rate: Aggregation,
    pub tag_fields:     Vec<TagField>,
}

impl Default for EventAggregation {
    fn default() -> Self {
        Self {
            hits:           Aggregation::Sum,
            hits_rate:      Aggregation::Sum,
            bandwidth:      Aggregation::Sum,
            bandwidth_rate: Aggregation::Sum,
            tag_fields:     vec![TagField::Host, TagField::Alias, TagField::Ip],
        }
    }
}

/// Keeps the `n` highest-ranked rows and folds the rest with `collapse`.
///
/// Groups of at most `n` rows come back unchanged. Ties keep input order.
pub fn reduce_to_rank<T, R, C>(rows: &[T], n: usize, rank: R, collapse: C) -> Vec<T>
where
    T: Clone,
    R: Fn(&T) -> f64,
    C: Fn(&[T]) -> T,
{
    if rows.len() <= n {
        return rows.to_vec();
    }
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| rank(b).total_cmp(&rank(a)));
    let rest = sorted.split_off(n);
    sorted.push(collapse(&rest));
    sorted
}

/// Folds several events of one group into a single "Others" row.
///
/// Non-numeric columns come from the first row; `rows` must not be empty.
pub fn collapse_events(rows: &[FailoverEvent], ops: &EventAggregation) -> FailoverEvent {
    let mut out = rows[0].clone();
    out.hits = ops.hits.apply(rows.iter().map(|r| r.hits as f64)).round() as i64;
    out.hits_rate = ops.hits_rate.apply(rows.iter().map(|r| r.hits_rate));
    out.bandwidth = ops.bandwidth.apply(rows.iter().map(|r| r.bandwidth as f64)).round() as i64;
    out.bandwidth_rate = ops.bandwidth_rate.apply(rows.iter().map(|r| r.bandwidth_rate));
    for field in &ops.tag_fields {
        match field {
            TagField::Host => out.host = OTHERS.to_string(),
            TagField::Alias => out.alias = OTHERS.to_string(),
            TagField::Ip => out.ip = OTHERS.to_string(),
        }
    }
    out
}

/// Rank-reduces a history per `(timestamp, group, site, is_squid)` by hit rate.
pub fn reduce_history(history: &[FailoverEvent], ranks: usize, ops: &EventAggregation) -> Vec<FailoverEvent> {
    let mut groups: BTreeMap<(i64, &str, &str, bool), Vec<FailoverEvent>> = BTreeMap::new();
    for event in history {
        groups
            .entry((event.timestamp, event.group.as_str(), event.site.as_str(), event.is_squid))
            .or_default()
            .push(event.clone());
    }
    groups
        .values()
        .flat_map(|rows| reduce_to_rank(rows, ranks, |e| e.hits_rate, |rest| collapse_events(rest, ops)))
        .collect()
}

/// Adds `events` stamped `now` to `history` and evicts rows older than the window.
///
/// A new event replaces any existing one with the same `(timestamp, group, host)`.
pub fn merge_events(
    mut history: Vec<FailoverEvent>,
    events:      Vec<FailoverEvent>,
    now:         i64,
    span_hours:  u64,
) -> Vec<FailoverEvent> {
    for mut event in events {
        event.timestamp = now;
        history.retain(|h| !(h.timestamp == event.timestamp && h.group == event.group && h.host == event.host));
        history.push(event);
    }
    evict(&mut history, now, span_hours);
    history
}

/// Owns one group's history file and its reduced companion.
pub struct RecordStore {
    history_path: PathBuf,
    reduced_path: PathBuf,
    span_hours:   u64,
    ranks:        usize,
    aggregation:  EventAggregation,
}

impl RecordStore {
    pub fn new(history_path: PathBuf, reduced_path: PathBuf, span_hours: u64, ranks: usize) -> Self {
        Self {
            history_path,
            reduced_path,
            span_hours,
            ranks,
            aggregation: EventAggregation::default(),
        }
    }

    pub fn with_aggregation(mut self, aggregation: EventAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Reads the history. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<FailoverEvent>> {
        Ok(read_csv_file(&self.history_path)?.unwrap_or_default())
    }

    /// History as it stands, with an unreadable file logged and read as empty.
    pub fn load_or_empty(&self, logger: &Logger) -> Vec<FailoverEvent> {
        match self.load() {
            Ok(history) => history,
            Err(e) => {
                logger.log(&Event::Warning {
                    message: &format!("history unreadable, starting empty: {}", e),
                });
                Vec::new()
            }
        }
    }

    /// Retained history after appending `events`, without writing anything.
    pub fn preview(&self, events: Vec<FailoverEvent>, now: i64, logger: &Logger) -> Vec<FailoverEvent> {
        merge_events(self.load_or_empty(logger), events, now, self.span_hours)
    }

    /// Appends `events` stamped `now`, prunes the window, and rewrites both
    /// files atomically.
    ///
    /// # Returns
    /// The retained history as written.
    pub fn append(&self, events: Vec<FailoverEvent>, now: i64, logger: &Logger) -> Result<Vec<FailoverEvent>> {
        let history = self.preview(events, now, logger);
        write_atomic(&self.history_path, &to_csv(&history)?)?;

        let reduced = reduce_history(&history, self.ranks, &self.aggregation);
        write_atomic(&self.reduced_path, &to_csv(&reduced)?)?;
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: i64, site: &str, host: &str, rate: f64) -> FailoverEvent {
        FailoverEvent {
            timestamp: ts,
            group: "cms".into(),
            site: site.into(),
            host: host.into(),
            alias: String::new(),
            ip: "10.0.0.1".into(),
            is_squid: false,
            hits: (rate * 3600.0) as i64,
            hits_rate: rate,
            bandwidth: 1000,
            bandwidth_rate: rate * 10.0,
        }
    }

    #[test]
    fn test_small_group_unchanged() {
        let rows: Vec<FailoverEvent> = (0..5).map(|i| event(0, "S", &format!("h{}", i), i as f64)).collect();
        let out = reduce_to_rank(&rows, 12, |e| e.hits_rate, |r| collapse_events(r, &EventAggregation::default()));
        assert_eq!(out, rows);
    }

    #[test]
    fn test_fifteen_rows_reduce_to_thirteen() {
        let rows: Vec<FailoverEvent> = (1..=15).map(|i| event(0, "S", &format!("h{}", i), i as f64)).collect();
        let out = reduce_to_rank(&rows, 12, |e| e.hits_rate, |r| collapse_events(r, &EventAggregation::default()));
        assert_eq!(out.len(), 13);
        assert_eq!(out[0].host, "h15");
        assert_eq!(out[11].host, "h4");

        let others = &out[12];
        assert_eq!(others.host, OTHERS);
        assert_eq!(others.alias, OTHERS);
        assert_eq!(others.ip, OTHERS);
        assert!((others.hits_rate - (1.0 + 2.0 + 3.0)).abs() < 1e-12);
        assert_eq!(others.bandwidth, 3000);
    }

    #[test]
    fn test_custom_aggregation_and_tags() {
        let rows: Vec<FailoverEvent> = (1..=4).map(|i| event(0, "S", &format!("h{}", i), i as f64)).collect();
        let ops = EventAggregation {
            hits_rate: Aggregation::Max,
            bandwidth: Aggregation::Mean,
            tag_fields: vec![TagField::Host],
            ..Default::default()
        };
        let out = reduce_to_rank(&rows, 1, |e| e.hits_rate, |r| collapse_events(r, &ops));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].hits_rate, 3.0);
        assert_eq!(out[1].bandwidth, 1000);
        assert_eq!(out[1].host, OTHERS);
        assert_eq!(out[1].ip, "10.0.0.1");
    }

    #[test]
    fn test_reduce_history_groups_independently() {
        let mut history: Vec<FailoverEvent> = (1..=3).map(|i| event(0, "A", &format!("a{}", i), i as f64)).collect();
        history.extend((1..=3).map(|i| event(0, "B", &format!("b{}", i), i as f64)));
        history.push(event(3600, "A", "a1", 1.0));
        let reduced = reduce_history(&history, 2, &EventAggregation::default());
        assert_eq!(reduced.len(), 3 + 3 + 1);
        assert_eq!(reduced.iter().filter(|e| e.host == OTHERS).count(), 2);
    }

    #[test]
    fn test_merge_replaces_duplicates_and_evicts() {
        let old = vec![event(0, "A", "a1", 1.0), event(100 * 3600, "A", "a1", 1.0)];
        let merged = merge_events(old, vec![event(0, "A", "a1", 5.0)], 100 * 3600, 72);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].hits_rate, 5.0);
    }

    #[test]
    fn test_append_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(false, None).unwrap();
        let store = RecordStore::new(dir.path().join("h.csv"), dir.path().join("h.reduced.csv"), 72, 1);

        let events = vec![event(0, "A", "a1", 1.0), event(0, "A", "a2", 2.0)];
        let kept = store.append(events, 7200, &logger).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|e| e.timestamp == 7200));

        assert_eq!(store.load().unwrap().len(), 2);
        let reduced: Vec<FailoverEvent> = read_csv_file(&dir.path().join("h.reduced.csv")).unwrap().unwrap();
        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced[1].host, OTHERS);
    }

    #[test]
    fn test_append_uses_configured_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(false, None).unwrap();
        let store = RecordStore::new(dir.path().join("h.csv"), dir.path().join("h.reduced.csv"), 72, 1)
            .with_aggregation(EventAggregation {
                hits_rate: Aggregation::Max,
                tag_fields: vec![TagField::Host],
                ..Default::default()
            });

        let events = vec![event(0, "A", "a1", 1.0), event(0, "A", "a2", 2.0), event(0, "A", "a3", 3.0)];
        store.append(events, 7200, &logger).unwrap();

        let reduced: Vec<FailoverEvent> = read_csv_file(&dir.path().join("h.reduced.csv")).unwrap().unwrap();
        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced[0].host, "a3");
        assert_eq!(reduced[1].host, OTHERS);
        assert_eq!(reduced[1].hits_rate, 2.0);
        assert_eq!(reduced[1].ip, "10.0.0.1");
    }

    #[test]
    fn test_corrupt_history_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.csv");
        std::fs::write(&path, "Timestamp,Group\nnot-a-number,cms\n").unwrap();
        let logger = Logger::new(false, None).unwrap();
        let store = RecordStore::new(path, dir.path().join("r.csv"), 72, 12);
        assert!(store.load().is_err());
        assert!(store.load_or_empty(&logger).is_empty());
    }
}
