//! Canonical site/host topology.
//!
//! Geolist entries are expanded into one record per resolved address, then
//! the exception list is applied in a fixed order: add monitoring hosts,
//! drop removed sites, drop worker nodes from the sites that remain.

use crate::monitor::config::UNKNOWN_ORG;
use crate::monitor::host::{OrgLookup, ResolutionTable, UNRESOLVED};
use crate::monitor::parsers::parse_proxy_spec;
use crate::monitor::types::{ExceptionList, ProxyEntry, Topology, TopologyRecord};
use std::collections::BTreeSet;

/// Builds the topology for one poll cycle.
///
/// `table` must already hold the resolutions of every geolist proxy and every
/// monitoring host; names missing from it are treated as unresolvable.
pub fn build_topology(
    entries:    &[ProxyEntry],
    exceptions: &ExceptionList,
    org:        &dyn OrgLookup,
    table:      &ResolutionTable,
) -> Topology {
    let base = expand_entries(entries, table);
    Topology::new(apply_exceptions(base, exceptions, org, table))
}

/// Expands each geolist proxy into one record per address it resolves to.
pub fn expand_entries(entries: &[ProxyEntry], table: &ResolutionTable) -> Vec<TopologyRecord> {
    entries
        .iter()
        .flat_map(|e| expand_host(&e.institution, &e.site, &e.raw_host_spec, table))
        .collect()
}

/// Applies exception edits to an already expanded record set.
///
/// Applying the same list to its own output changes nothing.
pub fn apply_exceptions(
    mut records: Vec<TopologyRecord>,
    exceptions:  &ExceptionList,
    org:         &dyn OrgLookup,
    table:       &ResolutionTable,
) -> Vec<TopologyRecord> {
    // Monitoring hosts are checked against the records as they were before
    // any of them was added, so one host listed for two sites lands in both.
    let mut additions = Vec::new();
    for mon in &exceptions.monitoring {
        let host = parse_proxy_spec(&mon.host).host;
        if records.iter().any(|r| r.matches_host(&host)) {
            continue;
        }
        let institution = institution_of(&host, org, table);
        additions.extend(expand_host(&institution, &mon.site, &mon.host, table));
    }
    records.extend(additions);

    let removed = exceptions.removed_sites();
    records.retain(|r| !removed.contains(r.site.as_str()));

    // Only sites still present: a removed site makes its worker-node edits moot.
    let present: BTreeSet<String> = records.iter().map(|r| r.site.clone()).collect();
    for wn in exceptions.worker_nodes.iter().filter(|wn| present.contains(&wn.site)) {
        records.retain(|r| !(r.site == wn.site && r.matches_host(&wn.host)));
    }

    records
}

fn expand_host(institution: &str, site: &str, raw_spec: &str, table: &ResolutionTable) -> Vec<TopologyRecord> {
    let spec = parse_proxy_spec(raw_spec);
    let resolved = table.lookup(&spec.host);
    let multi_homed = resolved.is_multi_homed();

    resolved
        .ips
        .iter()
        .map(|ip| TopologyRecord {
            institution: institution.to_string(),
            site: site.to_string(),
            host: if *ip == UNRESOLVED {
                spec.host.clone()
            } else {
                resolved.host_for(*ip, &spec.host)
            },
            alias: spec.host.clone(),
            ip: *ip,
            port: spec.port.clone(),
            is_multi_homed: multi_homed,
        })
        .collect()
}

/// Organization of a monitoring host: by name first, then by its address.
fn institution_of(host: &str, org: &dyn OrgLookup, table: &ResolutionTable) -> String {
    let by_name = org.organization(host);
    if by_name != UNKNOWN_ORG {
        return by_name;
    }
    let ip = table.lookup(host).primary_ip();
    if ip == UNRESOLVED {
        return by_name;
    }
    org.organization(&ip.to_string())
}

/// Every hostname the topology build will need resolved.
pub fn names_to_resolve(entries: &[ProxyEntry], exceptions: &ExceptionList) -> BTreeSet<String> {
    entries
        .iter()
        .map(|e| parse_proxy_spec(&e.raw_host_spec).host)
        .chain(exceptions.monitoring.iter().map(|m| parse_proxy_spec(&m.host).host))
        .filter(|h| !h.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::host::{ResolvedHost, TableOrgLookup};
    use crate::monitor::parsers::{parse_exception_list, parse_geolist};
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    const GEOLIST: &str = r#"
<Directory "/CERN">
    LocalSite "T0_CH_CERN"
    HttpProxy "http://squid1.cern.ch:3128|http://rr.cern.ch:3128;DIRECT"
</Directory>
<Directory "/FNAL">
    LocalSite "T1_US_FNAL"
    HttpProxy "http://squid.fnal.gov:3128|http://wn9.fnal.gov:3128"
</Directory>
"#;

    fn resolved(ips: &[[u8; 4]], name: Option<&str>) -> ResolvedHost {
        let ips: std::collections::BTreeSet<Ipv4Addr> = ips.iter().map(|o| Ipv4Addr::from(*o)).collect();
        let names: BTreeMap<Ipv4Addr, String> = match name {
            Some(n) => ips.iter().map(|ip| (*ip, n.to_string())).collect(),
            None => BTreeMap::new(),
        };
        ResolvedHost { ips, names }
    }

    fn table() -> ResolutionTable {
        let mut t = ResolutionTable::default();
        t.insert("squid1.cern.ch", resolved(&[[10, 0, 0, 1]], Some("squid1-real.cern.ch")));
        t.insert("rr.cern.ch", resolved(&[[10, 0, 0, 2], [10, 0, 0, 3]], None));
        t.insert("squid.fnal.gov", resolved(&[[10, 1, 0, 1]], None));
        t.insert("wn9.fnal.gov", resolved(&[[10, 1, 0, 9]], Some("worker9.fnal.gov")));
        t.insert("mon.example.org", resolved(&[[10, 2, 0, 1]], None));
        t
    }

    fn org() -> TableOrgLookup {
        TableOrgLookup::parse("10.2.0.0/16 Example Lab\n")
    }

    #[test]
    fn test_expansion_per_address() {
        let entries = parse_geolist(GEOLIST);
        let topo = build_topology(&entries, &ExceptionList::default(), &org(), &table());
        assert_eq!(topo.len(), 5);

        let squid1 = topo.records().iter().find(|r| r.alias == "squid1.cern.ch").unwrap();
        assert_eq!(squid1.host, "squid1-real.cern.ch");
        assert_eq!(squid1.port, "3128");
        assert!(!squid1.is_multi_homed);

        let rr: Vec<_> = topo.records().iter().filter(|r| r.alias == "rr.cern.ch").collect();
        assert_eq!(rr.len(), 2);
        assert!(rr.iter().all(|r| r.is_multi_homed));
    }

    #[test]
    fn test_unresolvable_host_keeps_alias() {
        let entries = parse_geolist(r#"<Directory "/X"> LocalSite "T2_XX_A" HttpProxy "http://nowhere.example:3128" </Directory>"#);
        let topo = build_topology(&entries, &ExceptionList::default(), &org(), &table());
        assert_eq!(topo.len(), 1);
        assert_eq!(topo.records()[0].ip, UNRESOLVED);
        assert_eq!(topo.records()[0].host, "nowhere.example");
    }

    #[test]
    fn test_monitoring_host_added_with_institution() {
        let entries = parse_geolist(GEOLIST);
        let exc = parse_exception_list("+T2_XX_LAB +mon.example.org +squid1.cern.ch\n");
        let topo = build_topology(&entries, &exc, &org(), &table());

        let mon: Vec<_> = topo.records_for_site("T2_XX_LAB").collect();
        assert_eq!(mon.len(), 1);
        assert_eq!(mon[0].institution, "ExampleLab");
        assert_eq!(mon[0].ip, Ipv4Addr::new(10, 2, 0, 1));
        // squid1 is already listed, so it is not duplicated under the new site
        assert!(topo.records().iter().filter(|r| r.alias == "squid1.cern.ch").count() == 1);
    }

    #[test]
    fn test_removed_site_has_no_records() {
        let entries = parse_geolist(GEOLIST);
        let exc = parse_exception_list("-T1_US_FNAL\n");
        let topo = build_topology(&entries, &exc, &org(), &table());
        assert_eq!(topo.records_for_site("T1_US_FNAL").count(), 0);
        assert_eq!(topo.records_for_site("T0_CH_CERN").count(), 3);
    }

    #[test]
    fn test_worker_node_removed_by_alias_or_host() {
        let entries = parse_geolist(GEOLIST);

        let by_alias = build_topology(&entries, &parse_exception_list("T1_US_FNAL -wn9.fnal.gov\n"), &org(), &table());
        assert_eq!(by_alias.records_for_site("T1_US_FNAL").count(), 1);

        let by_host = build_topology(&entries, &parse_exception_list("T1_US_FNAL -worker9.fnal.gov\n"), &org(), &table());
        assert_eq!(by_host.records_for_site("T1_US_FNAL").count(), 1);

        // same host under a different site is untouched
        let other = build_topology(&entries, &parse_exception_list("T0_CH_CERN -wn9.fnal.gov\n"), &org(), &table());
        assert_eq!(other.records_for_site("T1_US_FNAL").count(), 2);
    }

    #[test]
    fn test_exceptions_idempotent() {
        let entries = parse_geolist(GEOLIST);
        let exc = parse_exception_list(
            "+T2_XX_LAB +mon.example.org\n\
             T1_US_FNAL -wn9.fnal.gov\n\
             -T0_CH_CERN -squid1.cern.ch\n",
        );
        let base = expand_entries(&entries, &table());
        let once = apply_exceptions(base, &exc, &org(), &table());
        let twice = apply_exceptions(once.clone(), &exc, &org(), &table());
        assert_eq!(Topology::new(once), Topology::new(twice));
    }

    #[test]
    fn test_single_site_removed_end_to_end() {
        let entries = parse_geolist(r#"<Directory "/Lab"> LocalSite "T2_XX_LAB" HttpProxy "http://mon.example.org:3128" </Directory>"#);
        assert_eq!(entries.len(), 1);
        let topo = build_topology(&entries, &parse_exception_list("-T2_XX_LAB\n"), &org(), &table());
        assert!(topo.is_empty());
    }

    #[test]
    fn test_names_to_resolve_covers_monitoring_hosts() {
        let entries = parse_geolist(GEOLIST);
        let exc = parse_exception_list("+T2_XX_LAB +mon.example.org\n");
        let names = names_to_resolve(&entries, &exc);
        assert!(names.contains("mon.example.org"));
        assert!(names.contains("squid1.cern.ch"));
        assert_eq!(names.len(), 5);
    }
}
