//! Site membership of traffic hosts.
//!
//! Site names follow `TIER_COUNTRY_NAME[_QUALIFIER]`. To keep display strings
//! short, sites that differ only by tier are compacted: `T1_US_FOO` and
//! `T2_US_FOO` become `T1,T2_US_FOO`.

use crate::monitor::config::UNKNOWN_ORG;
use crate::monitor::host::{OrgLookup, UNRESOLVED};
use crate::monitor::types::{DeltaRecord, TaggedDelta, Topology};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Hosts that always tag as `"localhost"`.
const LOOPBACK_IDENTITIES: [&str; 4] = ["127.0.0.1", "localhost", "localhost6", "::1"];

/// Longest fourth segment still read as a tier qualifier.
const MAX_QUALIFIER_LEN: usize = 2;

/// A site name split into its base and optional qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteName {
    /// `TIER_COUNTRY_NAME`, or the whole name when it cannot be split.
    pub base:  String,
    /// Short qualifier after the base, e.g. `XY` in `T2_US_FOO_XY`.
    pub extra: String,
}

impl SiteName {
    pub fn parse(name: &str) -> Self {
        let parts: Vec<&str> = name.splitn(4, '_').collect();
        match parts.as_slice() {
            [t, c, n, q] if q.len() <= MAX_QUALIFIER_LEN => Self {
                base:  format!("{}_{}_{}", t, c, n),
                extra: q.to_string(),
            },
            // A long fourth segment is part of the name, not a qualifier.
            _ => Self {
                base:  name.to_string(),
                extra: String::new(),
            },
        }
    }
}

/// Splits a site name at its first underscore into `(tier, rest)`.
pub fn split_tier(site: &str) -> (&str, &str) {
    site.split_once('_').unwrap_or(("", site))
}

/// Builds a key → display string map from `(key, site)` pairs.
///
/// For each key, tiers sharing a base are joined with `,` in sorted order;
/// the distinct `tiers_base` strings are then sorted and joined with `; `.
pub fn compact_sites<K, I>(pairs: I) -> BTreeMap<K, String>
where
    K: Ord,
    I: IntoIterator<Item = (K, String)>,
{
    let mut grouped: BTreeMap<K, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
    for (key, site) in pairs {
        let (tier, base) = split_tier(&site);
        grouped
            .entry(key)
            .or_default()
            .entry(base.to_string())
            .or_default()
            .insert(tier.to_string());
    }

    grouped
        .into_iter()
        .map(|(key, bases)| {
            let labels: BTreeSet<String> = bases
                .into_iter()
                .map(|(base, tiers)| {
                    let tiers: Vec<String> = tiers.into_iter().filter(|t| !t.is_empty()).collect();
                    if tiers.is_empty() {
                        base
                    } else {
                        format!("{}_{}", tiers.join(","), base)
                    }
                })
                .collect();
            (key, labels.into_iter().collect::<Vec<_>>().join("; "))
        })
        .collect()
}

/// Classifies traffic hosts against one cycle's topology.
pub struct SiteTagger {
    ip_to_sites:          BTreeMap<Ipv4Addr, String>,
    institution_to_sites: BTreeMap<String, String>,
    /// Lower-cased host or alias of every single-address squid → listed alias.
    squid_names:          HashMap<String, String>,
    org:                  Arc<dyn OrgLookup>,
}

impl SiteTagger {
    pub fn new(topology: &Topology, org: Arc<dyn OrgLookup>) -> Self {
        let valid_squids = topology
            .records()
            .iter()
            .filter(|r| r.ip != UNRESOLVED && !r.is_multi_homed);

        let ip_to_sites = compact_sites(valid_squids.map(|r| (r.ip, r.site.clone())));

        let mut institution_to_sites = compact_sites(
            topology
                .records()
                .iter()
                .map(|r| (r.institution.clone(), r.site.clone())),
        );
        institution_to_sites.insert(UNKNOWN_ORG.to_string(), UNKNOWN_ORG.to_string());

        let mut squid_names = HashMap::new();
        for r in topology.records().iter().filter(|r| !r.is_multi_homed) {
            squid_names.insert(r.host.to_ascii_lowercase(), r.alias.clone());
            squid_names.insert(r.alias.to_ascii_lowercase(), r.alias.clone());
        }

        Self {
            ip_to_sites,
            institution_to_sites,
            squid_names,
            org,
        }
    }

    /// Site string for a traffic host (IP or hostname).
    ///
    /// Falls back to the organization name itself when the organization owns
    /// no listed site.
    pub fn tag_host(&self, identity: &str) -> String {
        if LOOPBACK_IDENTITIES.contains(&identity) {
            return "localhost".to_string();
        }
        let institution = self.org.organization(identity);
        match self.institution_to_sites.get(&institution) {
            Some(sites) => sites.clone(),
            None => institution,
        }
    }

    /// Compacted sites served by a squid at `ip`, if it is one.
    #[cfg(test)]
    pub fn squid_sites(&self, ip: Ipv4Addr) -> Option<&str> {
        self.ip_to_sites.get(&ip).map(String::as_str)
    }

    /// True when the host is a known single-address cache.
    pub fn is_squid(&self, host: &str, ip: Ipv4Addr) -> bool {
        self.ip_to_sites.contains_key(&ip) || self.squid_names.contains_key(&host.to_ascii_lowercase())
    }

    /// Listed alias of a squid; empty when it matches `host` or `host` is no squid.
    pub fn squid_alias(&self, host: &str) -> String {
        match self.squid_names.get(&host.to_ascii_lowercase()) {
            Some(alias) if !alias.eq_ignore_ascii_case(host) => alias.clone(),
            _ => String::new(),
        }
    }

    /// Tags delta records, identifying each host by IP when it has one.
    pub fn tag(&self, deltas: Vec<DeltaRecord>) -> Vec<TaggedDelta> {
        deltas
            .into_iter()
            .map(|delta| {
                let identity = if delta.ip == UNRESOLVED {
                    delta.host.clone()
                } else {
                    delta.ip.to_string()
                };
                let is_squid = self.is_squid(&delta.host, delta.ip);
                let alias = if is_squid {
                    self.squid_alias(&delta.host)
                } else {
                    String::new()
                };
                TaggedDelta {
                    site: self.tag_host(&identity),
                    alias,
                    is_squid,
                    delta,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::host::TableOrgLookup;
    use crate::monitor::types::TopologyRecord;

    fn record(inst: &str, site: &str, host: &str, alias: &str, ip: [u8; 4], multi: bool) -> TopologyRecord {
        TopologyRecord {
            institution: inst.into(),
            site: site.into(),
            host: host.into(),
            alias: alias.into(),
            ip: Ipv4Addr::from(ip),
            port: "3128".into(),
            is_multi_homed: multi,
        }
    }

    fn tagger() -> SiteTagger {
        let topo = Topology::new(vec![
            record("FNAL", "T1_US_FNAL", "squid1.fnal.gov", "cmsfrontier.fnal.gov", [10, 1, 0, 1], false),
            record("FNAL", "T3_US_FNAL", "squid1.fnal.gov", "cmsfrontier.fnal.gov", [10, 1, 0, 1], false),
            record("FNAL", "T2_US_FNALLPC", "squid2.fnal.gov", "squid2.fnal.gov", [10, 1, 0, 2], false),
            record("CERN", "T0_CH_CERN", "rr1.cern.ch", "rr.cern.ch", [10, 0, 0, 2], true),
            record("CERN", "T0_CH_CERN", "rr2.cern.ch", "rr.cern.ch", [10, 0, 0, 3], true),
            record("CERN", "T2_CH_CERN", "dead.cern.ch", "dead.cern.ch", [0, 0, 0, 0], false),
        ]);
        let org = TableOrgLookup::parse(
            "10.1.0.0/16 FNAL\n\
             10.0.0.0/16 CERN\n\
             10.9.0.0/16 Some Campus\n",
        );
        SiteTagger::new(&topo, Arc::new(org))
    }

    #[test]
    fn test_site_name_split() {
        assert_eq!(SiteName::parse("T1_US_FOO"), SiteName { base: "T1_US_FOO".into(), extra: "".into() });
        assert_eq!(SiteName::parse("T2_US_FOO_XY"), SiteName { base: "T2_US_FOO".into(), extra: "XY".into() });
        assert_eq!(
            SiteName::parse("T2_US_FOO_LONGTAIL"),
            SiteName { base: "T2_US_FOO_LONGTAIL".into(), extra: "".into() }
        );
        assert_eq!(SiteName::parse("Unknown").base, "Unknown");
    }

    #[test]
    fn test_compaction_groups_tiers() {
        let map = compact_sites(vec![
            ("k", "T2_US_FOO".to_string()),
            ("k", "T1_US_FOO".to_string()),
            ("k", "T2_US_BAR".to_string()),
            ("k", "T1_US_FOO".to_string()),
            ("j", "Plain".to_string()),
        ]);
        assert_eq!(map["k"], "T1,T2_US_FOO; T2_US_BAR");
        assert_eq!(map["j"], "Plain");
    }

    #[test]
    fn test_compaction_order_independent() {
        let a = compact_sites(vec![(1, "T1_A_B".to_string()), (1, "T2_A_B".to_string()), (1, "T3_C_D".to_string())]);
        let b = compact_sites(vec![(1, "T3_C_D".to_string()), (1, "T2_A_B".to_string()), (1, "T1_A_B".to_string())]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tag_host() {
        let t = tagger();
        assert_eq!(t.tag_host("127.0.0.1"), "localhost");
        assert_eq!(t.tag_host("::1"), "localhost");
        assert_eq!(t.tag_host("10.1.7.7"), "T1,T3_US_FNAL; T2_US_FNALLPC");
        assert_eq!(t.tag_host("10.9.1.1"), "SomeCampus");
        assert_eq!(t.tag_host("172.16.0.1"), "Unknown");
    }

    #[test]
    fn test_squid_membership_excludes_multi_homed_and_sentinel() {
        let t = tagger();
        assert!(t.is_squid("whatever", Ipv4Addr::new(10, 1, 0, 1)));
        assert_eq!(t.squid_sites(Ipv4Addr::new(10, 1, 0, 1)), Some("T1,T3_US_FNAL"));
        assert!(!t.is_squid("client.cern.ch", Ipv4Addr::new(10, 0, 0, 2)));
        assert!(!t.is_squid("client", UNRESOLVED));
        assert!(t.is_squid("SQUID2.fnal.gov", UNRESOLVED));
    }

    #[test]
    fn test_squid_alias() {
        let t = tagger();
        assert_eq!(t.squid_alias("squid1.fnal.gov"), "cmsfrontier.fnal.gov");
        assert_eq!(t.squid_alias("squid2.fnal.gov"), "");
        assert_eq!(t.squid_alias("client.example.org"), "");
    }

    #[test]
    fn test_tag_deltas() {
        let t = tagger();
        let deltas = vec![
            DeltaRecord {
                host: "squid1.fnal.gov".into(),
                ip: Ipv4Addr::new(10, 1, 0, 1),
                hits_delta: 10,
                bandwidth_delta: 100,
                hits_rate: 0.1,
                bandwidth_rate: 1.0,
            },
            DeltaRecord {
                host: "wn.fnal.gov".into(),
                ip: Ipv4Addr::new(10, 1, 3, 3),
                hits_delta: 10,
                bandwidth_delta: 100,
                hits_rate: 0.1,
                bandwidth_rate: 1.0,
            },
        ];
        let tagged = t.tag(deltas);
        assert!(tagged[0].is_squid);
        assert_eq!(tagged[0].alias, "cmsfrontier.fnal.gov");
        assert!(!tagged[1].is_squid);
        assert_eq!(tagged[1].site, tagged[0].site);
    }
}
