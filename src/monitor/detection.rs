//! Site-level failover detection.
//!
//! Direct (non-squid) traffic is summed per site; a site whose summed hit
//! rate exceeds the group threshold is flagged, and every active host of that
//! site is reported, squids included, so operators see both sides.

use crate::monitor::types::TaggedDelta;
use std::collections::BTreeMap;

/// Outcome of one detection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// Summed direct hit rate of each flagged site.
    pub high_sites: BTreeMap<String, f64>,
    /// Active rows of flagged sites: by site, direct rows first, busiest first.
    pub offending:  Vec<TaggedDelta>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.high_sites.is_empty()
    }
}

/// A host with no positive hits or bandwidth delta was idle (or its counters
/// were reset) and takes no part in detection.
pub fn is_active(row: &TaggedDelta) -> bool {
    row.delta.hits_delta > 0 || row.delta.bandwidth_delta > 0
}

/// Summed direct hit rate per site over active rows.
pub fn direct_site_rates(rows: &[TaggedDelta]) -> BTreeMap<String, f64> {
    let mut rates: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows.iter().filter(|r| is_active(r) && !r.is_squid) {
        *rates.entry(row.site.clone()).or_insert(0.0) += row.delta.hits_rate;
    }
    rates
}

/// Flags sites whose direct hit rate exceeds `rate_threshold` queries/second.
pub fn detect(rows: &[TaggedDelta], rate_threshold: f64) -> Detection {
    // ── Per-site direct rate ─────────────────────────────────────────────────
    let high_sites: BTreeMap<String, f64> = direct_site_rates(rows)
        .into_iter()
        .filter(|(_, rate)| *rate > rate_threshold)
        .collect();

    // ── Offending set ────────────────────────────────────────────────────────
    let mut offending: Vec<TaggedDelta> = rows
        .iter()
        .filter(|r| is_active(r) && high_sites.contains_key(&r.site))
        .cloned()
        .collect();
    offending.sort_by(|a, b| {
        a.site
            .cmp(&b.site)
            .then(a.is_squid.cmp(&b.is_squid))
            .then(b.delta.hits_rate.total_cmp(&a.delta.hits_rate))
    });

    Detection { high_sites, offending }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::DeltaRecord;
    use std::net::Ipv4Addr;

    fn row(site: &str, host: &str, squid: bool, hits: i64, rate: f64) -> TaggedDelta {
        TaggedDelta {
            delta: DeltaRecord {
                host: host.into(),
                ip: Ipv4Addr::new(10, 0, 0, 1),
                hits_delta: hits,
                bandwidth_delta: hits * 1000,
                hits_rate: rate,
                bandwidth_rate: rate * 1000.0,
            },
            site: site.into(),
            alias: String::new(),
            is_squid: squid,
        }
    }

    #[test]
    fn test_site_over_threshold_flagged_with_squids() {
        let rows = vec![
            row("T2_US_FOO", "wn1", false, 1800, 2.0),
            row("T2_US_FOO", "wn2", false, 900, 1.0),
            row("T2_US_FOO", "squid", true, 90000, 100.0),
            row("T2_US_BAR", "wn3", false, 900, 1.0),
        ];
        let det = detect(&rows, 2.7);
        assert_eq!(det.high_sites.len(), 1);
        assert!((det.high_sites["T2_US_FOO"] - 3.0).abs() < 1e-12);
        let hosts: Vec<&str> = det.offending.iter().map(|r| r.delta.host.as_str()).collect();
        assert_eq!(hosts, vec!["wn1", "wn2", "squid"]);
    }

    #[test]
    fn test_squid_traffic_does_not_trigger() {
        let rows = vec![row("T2_US_FOO", "squid", true, 90000, 100.0)];
        assert!(detect(&rows, 1.0).is_empty());
    }

    #[test]
    fn test_threshold_is_strict() {
        let rows = vec![row("T2_US_FOO", "wn1", false, 100, 2.5)];
        assert!(detect(&rows, 2.5).is_empty());
        assert!(!detect(&rows, 2.49).is_empty());
    }

    #[test]
    fn test_inactive_rows_ignored() {
        let mut reset = row("T2_US_FOO", "wn1", false, -500, -5.0);
        reset.delta.bandwidth_delta = -1;
        let idle = row("T2_US_FOO", "wn2", false, 0, 0.0);
        let det = detect(&[reset, idle], 0.0);
        assert!(det.is_empty());
        assert!(det.offending.is_empty());
    }
}
