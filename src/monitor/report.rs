//! Plain-text failover report for one group.

use crate::monitor::tagger::SiteName;
use crate::monitor::types::TaggedDelta;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;

const RULE_WIDTH: usize = 96;

/// Renders the offending rows of one poll, one table per flagged site.
///
/// Within a site, direct rows come before squid rows, each busiest first.
/// Squid rows show their listed alias when it differs from the host.
pub fn render_report(group: &str, offending: &[TaggedDelta], timestamp: i64) -> String {
    let when = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string());

    let mut by_site: BTreeMap<&str, Vec<&TaggedDelta>> = BTreeMap::new();
    for row in offending {
        by_site.entry(row.site.as_str()).or_default().push(row);
    }

    let mut out = String::new();
    let _ = writeln!(out, "Failover report for {} at {}", group, when);
    if by_site.is_empty() {
        let _ = writeln!(out, "No site exceeded its direct-traffic threshold.");
        return out;
    }

    for (site, mut rows) in by_site {
        rows.sort_by(|a, b| {
            a.is_squid
                .cmp(&b.is_squid)
                .then(b.delta.hits_rate.total_cmp(&a.delta.hits_rate))
        });
        let direct: f64 = rows.iter().filter(|r| !r.is_squid).map(|r| r.delta.hits_rate).sum();

        let name = SiteName::parse(site);
        let _ = writeln!(out);
        if name.extra.is_empty() {
            let _ = writeln!(out, "Site: {}", name.base);
        } else {
            let _ = writeln!(out, "Site: {} ({})", name.base, name.extra);
        }
        let _ = writeln!(out, "Direct rate: {:.2} queries/s", direct);
        let _ = writeln!(
            out,
            "{:<40} {:<16} {:<7} {:>10} {:>10} {:>12}",
            "Host", "IP", "Kind", "Hits", "Hits/s", "Bytes/s"
        );
        let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
        for row in rows {
            let host = if row.is_squid && !row.alias.is_empty() {
                &row.alias
            } else {
                &row.delta.host
            };
            let _ = writeln!(
                out,
                "{:<40} {:<16} {:<7} {:>10} {:>10.2} {:>12.1}",
                host,
                row.delta.ip.to_string(),
                if row.is_squid { "squid" } else { "direct" },
                row.delta.hits_delta,
                row.delta.hits_rate,
                row.delta.bandwidth_rate,
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::DeltaRecord;
    use std::net::Ipv4Addr;

    fn row(site: &str, host: &str, alias: &str, squid: bool, rate: f64) -> TaggedDelta {
        TaggedDelta {
            delta: DeltaRecord {
                host: host.into(),
                ip: Ipv4Addr::new(10, 0, 0, 1),
                hits_delta: (rate * 3600.0) as i64,
                bandwidth_delta: 0,
                hits_rate: rate,
                bandwidth_rate: 0.0,
            },
            site: site.into(),
            alias: alias.into(),
            is_squid: squid,
        }
    }

    #[test]
    fn test_rows_ordered_direct_first() {
        let rows = vec![
            row("T2_US_FOO_XY", "squid.foo.edu", "frontier.foo.edu", true, 50.0),
            row("T2_US_FOO_XY", "wn1.foo.edu", "", false, 1.0),
            row("T2_US_FOO_XY", "wn2.foo.edu", "", false, 2.0),
        ];
        let text = render_report("CMS", &rows, 1_700_000_000);
        assert!(text.starts_with("Failover report for CMS at 2023-11-14 22:13 UTC\n"));
        assert!(text.contains("Site: T2_US_FOO (XY)"));
        assert!(text.contains("Direct rate: 3.00 queries/s"));

        let wn2 = text.find("wn2.foo.edu").unwrap();
        let wn1 = text.find("wn1.foo.edu").unwrap();
        let squid = text.find("frontier.foo.edu").unwrap();
        assert!(wn2 < wn1 && wn1 < squid);
        assert!(!text.contains("squid.foo.edu"));
    }

    #[test]
    fn test_empty_report() {
        let text = render_report("ATLAS", &[], 0);
        assert!(text.contains("No site exceeded"));
    }
}
