//! Text parsers for the geolist, the exception list and AWStats data files.
//!
//! None of these parsers fail. The geolist is not strictly parseable, so
//! chunks that do not look like a site are dropped silently; malformed
//! exception lines are returned to the caller as [`RejectedLine`]s so they can
//! be logged.

use crate::monitor::types::{
    ExceptionList, ProxyEntry, ProxySpec, RejectedLine, SiteAction, SiteHost, VisitorRow,
};
use chrono::NaiveDateTime;
use std::collections::BTreeSet;

/// Tokens in a geolist chunk that describes exactly one site:
/// `/INSTITUTION> LocalSite SITE HttpProxy SPECS </`.
const GEOLIST_SITE_TOKENS: usize = 6;

/// Parses the geolist dump into one [`ProxyEntry`] per distinct proxy of each site.
pub fn parse_geolist(text: &str) -> Vec<ProxyEntry> {
    let unquoted = text.replace('"', "");
    let collapsed = unquoted.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut entries = Vec::new();
    for chunk in collapsed.split("Directory") {
        let tokens: Vec<&str> = chunk.split_whitespace().collect();
        if tokens.len() != GEOLIST_SITE_TOKENS {
            continue;
        }

        let institution: String = tokens[0]
            .chars()
            .filter(|c| !matches!(c, '/' | '<' | '>'))
            .collect();
        let site = tokens[2];

        // BTreeSet: duplicates collapse and output order does not depend on
        // the order proxies were listed in.
        let proxies: BTreeSet<&str> = tokens[4]
            .split(|c| c == ';' || c == '|')
            .filter(|p| !p.is_empty() && *p != "DIRECT")
            .collect();

        for proxy in proxies {
            entries.push(ProxyEntry {
                institution: institution.clone(),
                site: site.to_string(),
                raw_host_spec: proxy.to_string(),
            });
        }
    }
    entries
}

/// Splits `[protocol://]host[:port]` into its parts.
pub fn parse_proxy_spec(raw: &str) -> ProxySpec {
    let cleaned = raw.replace('/', "");
    let parts: Vec<&str> = cleaned.split(':').collect();
    let (protocol, host, port) = match parts.as_slice() {
        [host] => ("", *host, ""),
        [first, second] if is_scheme(first) => (*first, *second, ""),
        [host, port] => ("", *host, *port),
        [protocol, host, port, ..] => (*protocol, *host, *port),
        [] => ("", "", ""),
    };
    ProxySpec {
        protocol: protocol.to_string(),
        host: host.to_string(),
        port: port.to_string(),
    }
}

fn is_scheme(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "http" | "https")
}

/// Parses the exception list.
///
/// Each directive line is `[+-]SITE [+-]HOST ...`. A line with any host token
/// lacking a prefix is rejected whole: neither its action nor its hosts apply.
pub fn parse_exception_list(text: &str) -> ExceptionList {
    let mut list = ExceptionList::default();

    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let head = match tokens.next() {
            Some(h) => h,
            None => continue,
        };
        let action = match head.chars().next() {
            Some('+') => SiteAction::Add,
            Some('-') => SiteAction::Remove,
            _ => SiteAction::Neutral,
        };
        let site = head.trim_matches(|c| c == '+' || c == '-');

        let hosts: Vec<&str> = tokens.collect();
        let mut monitoring: Vec<&str> = Vec::new();
        let mut worker_nodes: Vec<&str> = Vec::new();
        for token in &hosts {
            if let Some(h) = token.strip_prefix('+').filter(|h| !h.is_empty()) {
                if !monitoring.contains(&h) {
                    monitoring.push(h);
                }
            } else if let Some(h) = token.strip_prefix('-').filter(|h| !h.is_empty()) {
                if !worker_nodes.contains(&h) {
                    worker_nodes.push(h);
                }
            }
        }

        let prefixed = hosts
            .iter()
            .filter(|t| t.len() > 1 && (t.starts_with('+') || t.starts_with('-')))
            .count();
        if site.is_empty() || prefixed != hosts.len() {
            list.rejected.push(RejectedLine {
                line_no: idx + 1,
                site: site.to_string(),
                content: line.to_string(),
            });
            continue;
        }

        list.monitoring.extend(monitoring.into_iter().map(|h| SiteHost {
            site: site.to_string(),
            host: h.to_string(),
        }));
        list.worker_nodes.extend(worker_nodes.into_iter().map(|h| SiteHost {
            site: site.to_string(),
            host: h.to_string(),
        }));

        match action {
            SiteAction::Remove => {
                list.actions.insert(site.to_string(), SiteAction::Remove);
            }
            SiteAction::Add => {
                list.actions.entry(site.to_string()).or_insert(SiteAction::Add);
            }
            SiteAction::Neutral => {}
        }
    }

    list
}

/// Extracts the visitor table from an AWStats data file.
///
/// Returns `None` when the file has no `BEGIN_VISITOR` section. Rows that do
/// not carry numeric hits and bandwidth are skipped.
pub fn parse_awstats_visitors(text: &str) -> Option<Vec<VisitorRow>> {
    let mut lines = text.lines();
    lines.by_ref().find(|l| l.starts_with("BEGIN_VISITOR"))?;

    let mut rows = Vec::new();
    for line in lines {
        if line.starts_with("END_VISITOR") {
            break;
        }
        // Host - Pages - Hits - Bandwidth - Last visit date - [Start of last visit] - [Last page]
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (hits, bandwidth) = match (fields[2].parse::<u64>(), fields[3].parse::<u64>()) {
            (Ok(h), Ok(b)) => (h, b),
            _ => continue,
        };
        let last_visit = fields
            .get(4)
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S").ok())
            .map(|dt| dt.and_utc().timestamp());

        rows.push(VisitorRow {
            host: fields[0].to_string(),
            hits,
            bandwidth,
            last_visit,
        });
    }
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOLIST: &str = r#"
<Directory "/CERN">
    LocalSite "T0_CH_CERN"
    HttpProxy "http://squid1.cern.ch:3128|http://squid2.cern.ch:3128;DIRECT"
</Directory>
<Directory "/FNAL">
    LocalSite "T1_US_FNAL"
    HttpProxy "http://cmsfrontier.fnal.gov:3128;DIRECT|http://cmsfrontier.fnal.gov:3128"
</Directory>
<Directory "/Broken">
    LocalSite "T2_XX_BROKEN"
</Directory>
"#;

    #[test]
    fn test_geolist_extracts_sites() {
        let entries = parse_geolist(GEOLIST);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].institution, "CERN");
        assert_eq!(entries[0].site, "T0_CH_CERN");
        assert_eq!(entries[0].raw_host_spec, "http://squid1.cern.ch:3128");
        assert_eq!(entries[1].raw_host_spec, "http://squid2.cern.ch:3128");
        // duplicates collapse and DIRECT is stripped
        assert_eq!(entries[2].site, "T1_US_FNAL");
        assert_eq!(entries[2].raw_host_spec, "http://cmsfrontier.fnal.gov:3128");
    }

    #[test]
    fn test_geolist_drops_malformed_chunk() {
        let entries = parse_geolist(GEOLIST);
        assert!(entries.iter().all(|e| e.site != "T2_XX_BROKEN"));
    }

    #[test]
    fn test_geolist_proxy_order_independent() {
        let a = parse_geolist(r#"<Directory "/X"> LocalSite "T2_XX_A" HttpProxy "h1|h2;h3" </Directory>"#);
        let b = parse_geolist(r#"<Directory "/X"> LocalSite "T2_XX_A" HttpProxy "h3;h2|h1" </Directory>"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_proxy_spec_forms() {
        let full = parse_proxy_spec("http://squid.example.org:3128");
        assert_eq!(full.protocol, "http");
        assert_eq!(full.host, "squid.example.org");
        assert_eq!(full.port, "3128");

        let bare = parse_proxy_spec("squid.example.org");
        assert_eq!(bare.host, "squid.example.org");
        assert!(bare.protocol.is_empty() && bare.port.is_empty());

        let host_port = parse_proxy_spec("squid.example.org:8080");
        assert_eq!(host_port.host, "squid.example.org");
        assert_eq!(host_port.port, "8080");

        let no_port = parse_proxy_spec("http://squid.example.org");
        assert_eq!(no_port.protocol, "http");
        assert_eq!(no_port.host, "squid.example.org");
    }

    #[test]
    fn test_exception_list_partitions_hosts() {
        let text = "\
# comment line

+T2_US_NEW +mon1.example.org +mon2.example.org
T1_US_FNAL -wn1.fnal.gov +squid3.fnal.gov
-T3_XX_GONE
";
        let list = parse_exception_list(text);
        assert!(list.rejected.is_empty());
        assert_eq!(list.monitoring.len(), 3);
        assert_eq!(list.worker_nodes.len(), 1);
        assert_eq!(list.worker_nodes[0].site, "T1_US_FNAL");
        assert_eq!(list.worker_nodes[0].host, "wn1.fnal.gov");
        assert_eq!(list.actions.get("T2_US_NEW"), Some(&SiteAction::Add));
        assert_eq!(list.actions.get("T3_XX_GONE"), Some(&SiteAction::Remove));
        assert_eq!(list.actions.get("T1_US_FNAL"), None);
    }

    #[test]
    fn test_exception_line_missing_prefix_rejected_whole() {
        let list = parse_exception_list("-T2_XX_BAD +ok.example.org bare.example.org\n");
        assert!(list.monitoring.is_empty());
        assert!(list.worker_nodes.is_empty());
        assert!(list.actions.is_empty());
        assert_eq!(list.rejected.len(), 1);
        assert_eq!(list.rejected[0].line_no, 1);
        assert_eq!(list.rejected[0].site, "T2_XX_BAD");
    }

    #[test]
    fn test_remove_wins_over_add() {
        let list = parse_exception_list("+T2_XX_A\n-T2_XX_A\n+T2_XX_A\n");
        assert_eq!(list.actions.get("T2_XX_A"), Some(&SiteAction::Remove));
    }

    #[test]
    fn test_awstats_visitor_section() {
        let text = "\
POS_VISITOR 123
BEGIN_VISITOR 3
10.0.0.1 5 5 1000 20240105120000
wn.example.org 7 9 2000 20240105130000
garbage line
END_VISITOR
BEGIN_DAY 1
";
        let rows = parse_awstats_visitors(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].host, "10.0.0.1");
        assert_eq!(rows[1].hits, 9);
        assert_eq!(rows[1].bandwidth, 2000);
        assert!(rows[0].last_visit.is_some());
    }

    #[test]
    fn test_awstats_without_section() {
        assert!(parse_awstats_visitors("BEGIN_DAY 0\nEND_DAY\n").is_none());
    }
}
