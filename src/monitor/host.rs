//! Host resolution and organization lookup.
//!
//! Every lookup here is best-effort. A failed or slow forward lookup yields
//! the `0.0.0.0` sentinel ([`UNRESOLVED`]); a failed reverse lookup falls back
//! to the name as listed; a failed organization lookup yields `"Unknown"`.
//! Callers never see a resolution error.

use crate::error::{FailoverError, Result};
use crate::monitor::config::UNKNOWN_ORG;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Address standing for "could not be resolved". Never a routable host.
pub const UNRESOLVED: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// True for four dot-separated decimal octets, each in `0..=255`.
pub fn is_valid_ipv4(address: &str) -> bool {
    let parts: Vec<&str> = address.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|p| {
            !p.is_empty()
                && p.bytes().all(|b| b.is_ascii_digit())
                && p.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}

/// Parses a dotted address, tolerating leading zeros the way [`is_valid_ipv4`] does.
fn parse_ipv4(address: &str) -> Option<Ipv4Addr> {
    if !is_valid_ipv4(address) {
        return None;
    }
    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(address.split('.')) {
        *slot = part.parse::<u16>().ok()? as u8;
    }
    Some(Ipv4Addr::from(octets))
}

pub fn is_multi_homed(ips: &BTreeSet<Ipv4Addr>) -> bool {
    ips.len() > 1
}

/// Blocking name-service primitives. Injected so tests never touch real DNS.
pub trait NameService: Send + Sync {
    /// Forward lookup restricted to IPv4 results.
    fn forward(&self, name: &str) -> io::Result<Vec<Ipv4Addr>>;
    /// Reverse lookup of one address.
    fn reverse(&self, ip: Ipv4Addr) -> io::Result<String>;
}

/// The system resolver (`getaddrinfo` / `getnameinfo`).
pub struct SystemNameService;

impl NameService for SystemNameService {
    fn forward(&self, name: &str) -> io::Result<Vec<Ipv4Addr>> {
        let addrs = dns_lookup::lookup_host(name)?;
        Ok(addrs
            .into_iter()
            .filter_map(|a| match a {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect())
    }

    fn reverse(&self, ip: Ipv4Addr) -> io::Result<String> {
        dns_lookup::lookup_addr(&IpAddr::V4(ip))
    }
}

/// Resolves a hostname or dotted address to its IPv4 set.
///
/// Never empty: a failed lookup, or one that returns no IPv4 address,
/// yields `{0.0.0.0}`.
pub fn resolve_ipv4(service: &dyn NameService, host: &str) -> BTreeSet<Ipv4Addr> {
    if let Some(ip) = parse_ipv4(host) {
        return BTreeSet::from([ip]);
    }
    match service.forward(host) {
        Ok(ips) if !ips.is_empty() => ips.into_iter().collect(),
        _ => BTreeSet::from([UNRESOLVED]),
    }
}

/// Reverse name of `ip`, or `listed` when there is none.
pub fn reverse_name(service: &dyn NameService, ip: Ipv4Addr, listed: &str) -> String {
    if ip == UNRESOLVED {
        return listed.to_string();
    }
    match service.reverse(ip) {
        Ok(name) if !name.is_empty() => name,
        _ => listed.to_string(),
    }
}

/// Everything learned about one listed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub ips: BTreeSet<Ipv4Addr>,
    /// Reverse name per address, the listed name where reverse lookup failed.
    pub names: BTreeMap<Ipv4Addr, String>,
}

impl ResolvedHost {
    pub fn unresolved() -> Self {
        Self {
            ips: BTreeSet::from([UNRESOLVED]),
            names: BTreeMap::new(),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.ips.iter().all(|ip| *ip == UNRESOLVED)
    }

    pub fn is_multi_homed(&self) -> bool {
        is_multi_homed(&self.ips)
    }

    /// Canonical host name for `ip`, falling back to the listed alias.
    pub fn host_for(&self, ip: Ipv4Addr, alias: &str) -> String {
        self.names
            .get(&ip)
            .cloned()
            .unwrap_or_else(|| alias.to_string())
    }

    /// First real address, or the sentinel.
    pub fn primary_ip(&self) -> Ipv4Addr {
        self.ips
            .iter()
            .copied()
            .find(|ip| *ip != UNRESOLVED)
            .unwrap_or(UNRESOLVED)
    }
}

/// Resolutions gathered for one poll cycle. Read-only once collected.
#[derive(Debug, Clone, Default)]
pub struct ResolutionTable {
    hosts: HashMap<String, ResolvedHost>,
}

impl ResolutionTable {
    pub fn insert(&mut self, name: impl Into<String>, resolved: ResolvedHost) {
        self.hosts.insert(name.into(), resolved);
    }

    /// Resolution of `name`. Unknown names are unresolved unless they are
    /// dotted addresses, which stand for themselves.
    pub fn lookup(&self, name: &str) -> ResolvedHost {
        if let Some(r) = self.hosts.get(name) {
            return r.clone();
        }
        match parse_ipv4(name) {
            Some(ip) => ResolvedHost {
                ips: BTreeSet::from([ip]),
                names: BTreeMap::new(),
            },
            None => ResolvedHost::unresolved(),
        }
    }

    /// Names that resolved to nothing but the sentinel, sorted.
    pub fn unresolved(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .hosts
            .iter()
            .filter(|(_, r)| r.is_unresolved())
            .map(|(n, _)| n.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }
}

/// Bounded-concurrency resolver with a per-lookup timeout.
///
/// Results are cached for the lifetime of the resolver, so a name listed in
/// both the geolist and a traffic snapshot is looked up once per run.
pub struct HostResolver {
    service: Arc<dyn NameService>,
    workers: usize,
    timeout: Duration,
    cache:   Arc<DashMap<String, ResolvedHost>>,
}

impl HostResolver {
    pub fn new(service: Arc<dyn NameService>, workers: usize, timeout: Duration) -> Self {
        Self {
            service,
            workers: workers.max(1),
            timeout,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Resolves every name, at most `workers` at a time, and returns once all
    /// of them have finished or timed out.
    pub async fn resolve_all<I, S>(&self, names: I) -> ResolutionTable
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wanted: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for name in wanted.iter().filter(|n| !self.cache.contains_key(*n)) {
            let name = name.clone();
            let service = Arc::clone(&self.service);
            let permits = Arc::clone(&permits);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let resolved = resolve_one(service, permits, &name, timeout).await;
                (name, resolved)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok((name, resolved)) = joined {
                self.cache.insert(name, resolved);
            }
        }

        let mut table = ResolutionTable::default();
        for name in wanted {
            let resolved = self
                .cache
                .get(&name)
                .map(|r| r.value().clone())
                .unwrap_or_else(ResolvedHost::unresolved);
            table.insert(name, resolved);
        }
        table
    }
}

/// Forward then reverse lookups for one name, each bounded by `timeout`.
///
/// Lookups run on the blocking pool. A timed-out lookup keeps its thread until
/// the system resolver gives up, but the poll no longer waits for it. Each
/// lookup holds a worker permit until its closure returns, so abandoned
/// lookups still count against the pool.
async fn resolve_one(
    service: Arc<dyn NameService>,
    permits: Arc<Semaphore>,
    name:    &str,
    timeout: Duration,
) -> ResolvedHost {
    let svc = Arc::clone(&service);
    let owned = name.to_string();
    // The semaphore is never closed, so acquisition only fails on shutdown.
    let permit = Arc::clone(&permits).acquire_owned().await.ok();
    let lookup = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        resolve_ipv4(svc.as_ref(), &owned)
    });
    let ips = match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(found)) => found,
        _ => BTreeSet::from([UNRESOLVED]),
    };

    let mut names = BTreeMap::new();
    for ip in ips.iter().copied().filter(|ip| *ip != UNRESOLVED) {
        let svc = Arc::clone(&service);
        let listed = name.to_string();
        let permit = Arc::clone(&permits).acquire_owned().await.ok();
        let lookup = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            reverse_name(svc.as_ref(), ip, &listed)
        });
        if let Ok(Ok(reverse)) = tokio::time::timeout(timeout, lookup).await {
            names.insert(ip, reverse);
        }
    }

    ResolvedHost { ips, names }
}

// ── Organization lookup ──────────────────────────────────────────────────────

/// Maps a hostname or address to the organization that owns it.
///
/// Implementations never fail: anything unknown maps to `"Unknown"`.
pub trait OrgLookup: Send + Sync {
    fn organization(&self, host_or_ip: &str) -> String;
}

/// Lookup used when no organization table is configured.
pub struct UnknownOrg;

impl OrgLookup for UnknownOrg {
    fn organization(&self, _host_or_ip: &str) -> String {
        UNKNOWN_ORG.to_string()
    }
}

/// Organization names carry no whitespace in the geolist, so lookups are
/// normalised the same way.
pub fn normalise_org(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        UNKNOWN_ORG.to_string()
    } else {
        compact
    }
}

/// Organization table loaded from text: one `<key> <organization>` per line,
/// where `key` is a CIDR block, a single address, or a hostname.
#[derive(Debug, Clone, Default)]
pub struct TableOrgLookup {
    /// `(network, prefix length, organization)`, searched longest prefix first.
    networks: Vec<(u32, u8, String)>,
    names:    HashMap<String, String>,
}

impl TableOrgLookup {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| FailoverError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    /// Lines that are blank, commented, or carry an unusable key are skipped.
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, org) = match line.split_once(char::is_whitespace) {
                Some((k, o)) => (k, normalise_org(o)),
                None => continue,
            };

            if let Some((net, len)) = key.split_once('/') {
                if let (Some(ip), Ok(len)) = (parse_ipv4(net), len.parse::<u8>()) {
                    if len <= 32 {
                        table.networks.push((u32::from(ip) & prefix_mask(len), len, org));
                    }
                }
            } else if let Some(ip) = parse_ipv4(key) {
                table.networks.push((u32::from(ip), 32, org));
            } else {
                table.names.insert(key.to_ascii_lowercase(), org);
            }
        }
        table.networks.sort_by(|a, b| b.1.cmp(&a.1));
        table
    }
}

fn prefix_mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - len as u32)
    }
}

impl OrgLookup for TableOrgLookup {
    fn organization(&self, host_or_ip: &str) -> String {
        if let Some(ip) = parse_ipv4(host_or_ip) {
            let addr = u32::from(ip);
            return self
                .networks
                .iter()
                .find(|(net, len, _)| addr & prefix_mask(*len) == *net)
                .map(|(_, _, org)| org.clone())
                .unwrap_or_else(|| UNKNOWN_ORG.to_string());
        }
        self.names
            .get(&host_or_ip.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_ORG.to_string())
    }
}
