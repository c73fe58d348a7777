//! Per-host activity between two polls.

use crate::monitor::types::{DeltaRecord, TrafficSnapshot};

/// Computes hit and bandwidth deltas and rates for every host in `now`.
///
/// Hosts missing from `prev` are new this session and report their full
/// counts. Hosts only in `prev` are dropped. Negative deltas from counter
/// resets pass through unchanged. `elapsed_secs` must be positive; the caller
/// skips the cycle otherwise.
pub fn compute_deltas(now: &TrafficSnapshot, prev: &TrafficSnapshot, elapsed_secs: f64) -> Vec<DeltaRecord> {
    now.entries
        .iter()
        .map(|(key, cur)| {
            let (hits_delta, bandwidth_delta) = match prev.entries.get(key) {
                Some(old) => (
                    cur.hits as i64 - old.hits as i64,
                    cur.bandwidth as i64 - old.bandwidth as i64,
                ),
                None => (cur.hits as i64, cur.bandwidth as i64),
            };
            DeltaRecord {
                host: cur.host.clone(),
                ip: cur.ip,
                hits_delta,
                bandwidth_delta,
                hits_rate: hits_delta as f64 / elapsed_secs,
                bandwidth_rate: bandwidth_delta as f64 / elapsed_secs,
            }
        })
        .collect()
}

/// Seconds between two captures; non-positive when clocks went backwards.
pub fn elapsed_secs(now: &TrafficSnapshot, prev: &TrafficSnapshot) -> i64 {
    now.timestamp - prev.timestamp
}
