use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Set to `true` by the Ctrl+C handler; a poll checks it before writing state.
pub type ShutdownFlag = Arc<AtomicBool>;

/// One site's proxy as listed in the geolist, before any resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProxyEntry {
    /// Institution name taken from the `<Directory "/...">` path segment.
    pub institution: String,
    /// Site name from the `LocalSite` directive.
    pub site: String,
    /// Proxy as written in `HttpProxy`, e.g. `http://squid1.example.org:3128`.
    pub raw_host_spec: String,
}

/// A proxy spec split into its parts. Bare hostnames leave protocol and port empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub protocol: String,
    pub host: String,
    pub port: String,
}

/// Site-level directive carried by the first token of an exception line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteAction {
    /// `+SITE`: the site is added or kept.
    Add,
    /// `-SITE`: every record of the site is dropped from the topology.
    Remove,
    /// No prefix: only the host edits on the line apply.
    Neutral,
}

/// A `(site, host)` pair from the exception list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SiteHost {
    pub site: String,
    pub host: String,
}

/// An exception line that was rejected as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number in the exception list text.
    pub line_no: usize,
    pub site: String,
    pub content: String,
}

/// Parsed exception list, split into the three views the topology builder needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExceptionList {
    /// Site-level actions. Only `Add` and `Remove` are recorded; `Remove` wins
    /// when a site appears on several lines.
    pub actions: BTreeMap<String, SiteAction>,
    /// `-host` tokens: hosts to strip from their site.
    pub worker_nodes: Vec<SiteHost>,
    /// `+host` tokens: monitoring hosts to add to their site.
    pub monitoring: Vec<SiteHost>,
    /// Lines skipped because a host token had no `+`/`-` prefix.
    pub rejected: Vec<RejectedLine>,
}

impl ExceptionList {
    /// Sites whose action is `Remove`.
    pub fn removed_sites(&self) -> BTreeSet<&str> {
        self.actions
            .iter()
            .filter(|(_, a)| **a == SiteAction::Remove)
            .map(|(s, _)| s.as_str())
            .collect()
    }
}

/// Canonical topology unit: one per (listed host, resolved address) occurrence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopologyRecord {
    pub institution: String,
    pub site: String,
    /// Reverse-DNS name of `ip`, or the alias when `ip` is the unresolvable sentinel.
    pub host: String,
    /// Hostname exactly as listed in the geolist or exception list.
    pub alias: String,
    pub ip: Ipv4Addr,
    pub port: String,
    /// The alias resolved to more than one address: a DNS round-robin name,
    /// not a single cache. Excluded from squid-IP membership tests.
    pub is_multi_homed: bool,
}

impl TopologyRecord {
    /// True when this record names `host` either as listed or as resolved.
    pub fn matches_host(&self, host: &str) -> bool {
        self.alias == host || self.host == host
    }
}

/// The canonical topology for one poll cycle. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    records: Vec<TopologyRecord>,
}

impl Topology {
    pub fn new(mut records: Vec<TopologyRecord>) -> Self {
        records.sort();
        records.dedup();
        Self { records }
    }

    pub fn records(&self) -> &[TopologyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn sites(&self) -> BTreeSet<&str> {
        self.records.iter().map(|r| r.site.as_str()).collect()
    }

    #[cfg(test)]
    pub fn records_for_site<'a>(&'a self, site: &'a str) -> impl Iterator<Item = &'a TopologyRecord> + 'a {
        self.records.iter().filter(move |r| r.site == site)
    }
}

/// Per-host counters read from the access-log aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorRow {
    /// Host as reported by AWStats: a dotted IPv4 address or a hostname.
    pub host: String,
    pub hits: u64,
    pub bandwidth: u64,
    /// Epoch seconds of the last visit, when it could be parsed.
    pub last_visit: Option<i64>,
}

/// One row of a traffic snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotEntry {
    pub host: String,
    pub ip: Ipv4Addr,
    pub hits: u64,
    pub bandwidth: u64,
    pub last_visit: Option<i64>,
}

/// Cumulative per-host counters captured at one poll.
///
/// Keys are the host identity: the IP when the host resolved to a real
/// address, the hostname otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficSnapshot {
    /// Capture time in epoch seconds.
    pub timestamp: i64,
    pub entries: BTreeMap<String, SnapshotEntry>,
}

/// Activity of one host between two polls.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    pub host: String,
    pub ip: Ipv4Addr,
    /// May be negative after a counter reset; filtered downstream.
    pub hits_delta: i64,
    pub bandwidth_delta: i64,
    pub hits_rate: f64,
    pub bandwidth_rate: f64,
}

/// A delta record tagged with its site membership.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedDelta {
    pub delta: DeltaRecord,
    /// Compacted site string, institution name, or `"localhost"`.
    pub site: String,
    /// Listed alias when the host is a known squid, empty otherwise.
    pub alias: String,
    pub is_squid: bool,
}

/// One row of the failover history. Never mutated after creation.
///
/// Uniquely identified by `(timestamp, group, host)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailoverEvent {
    pub timestamp: i64,
    pub group: String,
    pub site: String,
    pub host: String,
    pub alias: String,
    /// Dotted address, or `"Others"` on a collapsed row.
    pub ip: String,
    pub is_squid: bool,
    pub hits: i64,
    pub hits_rate: f64,
    pub bandwidth: i64,
    pub bandwidth_rate: f64,
}

impl FailoverEvent {
    pub fn from_tagged(timestamp: i64, group: &str, row: &TaggedDelta) -> Self {
        Self {
            timestamp,
            group: group.to_string(),
            site: row.site.clone(),
            host: row.delta.host.clone(),
            alias: row.alias.clone(),
            ip: row.delta.ip.to_string(),
            is_squid: row.is_squid,
            hits: row.delta.hits_delta,
            hits_rate: row.delta.hits_rate,
            bandwidth: row.delta.bandwidth_delta,
            bandwidth_rate: row.delta.bandwidth_rate,
        }
    }
}
