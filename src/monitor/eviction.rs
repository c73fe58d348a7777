//! Rolling-window eviction for the persisted logs.
//!
//! The failover history and the notification log only ever grow by appends,
//! so every write first drops rows that fell out of their retention window.

use crate::monitor::types::FailoverEvent;

const SECS_PER_HOUR: i64 = 3600;

/// Anything stamped with an epoch-seconds time.
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for FailoverEvent {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Oldest timestamp still inside a window of `span_hours` ending at `now`.
pub fn window_start(now: i64, span_hours: u64) -> i64 {
    now.saturating_sub((span_hours as i64).saturating_mul(SECS_PER_HOUR))
}

/// Keeps rows with `timestamp >= now - span_hours*3600`.
///
/// # Returns
/// Number of rows evicted.
pub fn evict<T: Timestamped>(rows: &mut Vec<T>, now: i64, span_hours: u64) -> usize {
    let cutoff = window_start(now, span_hours);
    let before = rows.len();
    rows.retain(|r| r.timestamp() >= cutoff);
    before - rows.len()
}
