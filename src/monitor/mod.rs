//! Failover detection engine.
//!
//! One invocation is one poll. The topology is built once from the geolist
//! and exception list, then every configured group runs the same pipeline:
//!
//! 1. load the group's AWStats visitor tables and snapshot them,
//! 2. diff against the previous snapshot and tag hosts with their sites,
//! 3. flag sites whose direct traffic exceeds the threshold,
//! 4. fold the flagged rows into the retained history,
//! 5. notify sites that were flagged in consecutive polls, once per cool-down.
//!
//! Everything is computed before anything is written, and the shutdown flag is
//! checked in between, so an interrupted poll leaves every state file as it was.

pub mod config;
pub mod dedup;
pub mod delta;
pub mod detection;
pub mod eviction;
pub mod host;
pub mod parsers;
pub mod records;
pub mod report;
pub mod snapshot;
pub mod sources;
pub mod storage;
pub mod tagger;
pub mod topology;
pub mod types;

use crate::error::{FailoverError, Result};
use crate::logger::{Event, SharedLogger};
use crate::monitor::config::{GroupConfig, Settings};
use crate::monitor::dedup::{mark_persistent, select_for_notification, NotificationLog};
use crate::monitor::delta::{compute_deltas, elapsed_secs};
use crate::monitor::detection::{detect, Detection};
use crate::monitor::host::{is_valid_ipv4, HostResolver, OrgLookup};
use crate::monitor::parsers::{parse_exception_list, parse_geolist};
use crate::monitor::records::RecordStore;
use crate::monitor::report::render_report;
use crate::monitor::sources::{fetch_text, load_visitors};
use crate::monitor::tagger::SiteTagger;
use crate::monitor::topology::{build_topology, names_to_resolve};
use crate::monitor::types::{FailoverEvent, ShutdownFlag, Topology, TrafficSnapshot};

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Everything a poll needs, assembled once in `main`.
pub struct MonitorConfig {
    pub settings: Settings,
    /// Shared across groups so a name is resolved once per invocation.
    pub resolver: HostResolver,
    pub org:      Arc<dyn OrgLookup>,
    pub logger:   SharedLogger,
    /// Set by the Ctrl+C handler; checked before the write phase.
    pub shutdown: ShutdownFlag,
    /// Compute and report, never write state files.
    pub dry_run:  bool,
}

/// Result of polling one group.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub group:        String,
    /// Hosts in the current snapshot.
    pub hosts:        usize,
    /// Cumulative hits summed over the current snapshot.
    pub hits:         u64,
    /// Seconds since the previous snapshot; `None` when nothing was compared.
    pub elapsed_secs: Option<i64>,
    pub detection:    Detection,
    /// Flagged sites whose failover is persistent and due for notification.
    pub notified:     Vec<String>,
    /// Persistent sites held back by the cool-down.
    pub suppressed:   Vec<String>,
    /// Rendered report of the flagged sites, when any were flagged.
    pub report:       Option<String>,
}

/// Fetches both lists, resolves every listed host and builds the topology.
///
/// Rejected exception lines and unresolvable hosts are logged; only a list
/// that cannot be fetched at all fails the run.
pub async fn load_topology(cfg: &MonitorConfig) -> Result<Topology> {
    let general = &cfg.settings.general;
    let timeout = cfg.settings.resolve_timeout();

    let geolist = parse_geolist(&fetch_text(&general.geolist, timeout).await?);
    cfg.logger.log(&Event::ListLoaded { list: "geolist", entries: geolist.len() });

    let exceptions = parse_exception_list(&fetch_text(&general.exceptionlist, timeout).await?);
    cfg.logger.log(&Event::ListLoaded {
        list:    "exceptionlist",
        entries: exceptions.actions.len() + exceptions.worker_nodes.len() + exceptions.monitoring.len(),
    });
    for rejected in &exceptions.rejected {
        cfg.logger.log(&Event::ExceptionRejected {
            line_no: rejected.line_no,
            site:    &rejected.site,
            content: &rejected.content,
        });
    }

    // Every resolution must be in before the topology is built: site removal
    // runs before host removal over the complete record set.
    let table = cfg.resolver.resolve_all(names_to_resolve(&geolist, &exceptions)).await;
    for host in table.unresolved() {
        cfg.logger.log(&Event::Unresolved { host });
    }

    let topology = build_topology(&geolist, &exceptions, cfg.org.as_ref(), &table);
    cfg.logger.log(&Event::TopologyBuilt {
        records: topology.len(),
        sites:   topology.sites().len(),
    });
    Ok(topology)
}

/// Runs one poll of one group at time `now` (epoch seconds).
///
/// # Arguments
/// * `cfg`    - Shared run configuration.
/// * `tagger` - Site tagger built from this invocation's topology.
/// * `name`   - Group key in the configuration.
/// * `group`  - The group's settings.
/// * `now`    - Poll time; stamps the snapshot and every new history row.
///
/// # Errors
/// I/O failures while writing state, or [`FailoverError::Interrupted`] when a
/// shutdown was requested before the write phase.
pub async fn run_poll(
    cfg:    &MonitorConfig,
    tagger: &SiteTagger,
    name:   &str,
    group:  &GroupConfig,
    now:    i64,
) -> Result<PollOutcome> {
    let general = &cfg.settings.general;
    let logger = &cfg.logger;

    // ── Current snapshot ─────────────────────────────────────────────────────
    let visitors = load_visitors(
        &general.awstats_dir,
        &group.instances,
        &general.awstats_date_format,
        now,
        logger,
    )
    .await;
    let names: BTreeSet<String> = visitors
        .iter()
        .filter(|v| !is_valid_ipv4(&v.host))
        .map(|v| v.host.clone())
        .collect();
    let table = cfg.resolver.resolve_all(names).await;
    let current = TrafficSnapshot::from_visitors(now, &visitors, &table);

    let previous = match TrafficSnapshot::load(&group.snapshot_file) {
        Ok(p) => p,
        Err(e) => {
            logger.log(&Event::Warning {
                message: &format!("previous snapshot unusable, treating as first poll: {}", e),
            });
            None
        }
    };

    let mut outcome = PollOutcome {
        group: name.to_string(),
        hosts: current.entries.len(),
        hits: current.total_hits(),
        ..Default::default()
    };

    // ── Comparison ───────────────────────────────────────────────────────────
    let compared = match &previous {
        None => {
            logger.log(&Event::FirstPoll { group: name });
            None
        }
        Some(prev) => {
            let elapsed = elapsed_secs(&current, prev);
            if elapsed <= 0 {
                logger.log(&Event::Warning {
                    message: &format!("{}: no time elapsed since previous snapshot, skipping comparison", name),
                });
                None
            } else {
                let tagged = tagger.tag(compute_deltas(&current, prev, elapsed as f64));
                Some((elapsed, detect(&tagged, group.rate_threshold)))
            }
        }
    };

    // ── Write phase ──────────────────────────────────────────────────────────
    if cfg.shutdown.load(Ordering::SeqCst) {
        return Err(FailoverError::Interrupted(name.to_string()));
    }
    if !cfg.dry_run {
        current.save(&group.snapshot_file)?;
    }

    let (elapsed, detection) = match compared {
        Some(c) => c,
        None => {
            log_summary(cfg, &outcome);
            return Ok(outcome);
        }
    };
    outcome.elapsed_secs = Some(elapsed);

    for (site, rate) in &detection.high_sites {
        logger.log(&Event::SiteFlagged {
            group:       name,
            site,
            direct_rate: *rate,
            hosts:       detection.offending.iter().filter(|r| &r.site == site).count(),
        });
    }

    let events: Vec<FailoverEvent> = detection
        .offending
        .iter()
        .map(|row| FailoverEvent::from_tagged(now, name, row))
        .collect();
    let store = RecordStore::new(
        group.history_file.clone(),
        group.reduced_path(),
        general.history_span_hours,
        general.ranks,
    )
    .with_aggregation(general.reduction.clone());
    let history = if cfg.dry_run {
        store.preview(events, now, logger)
    } else {
        store.append(events, now, logger)?
    };

    // ── Notification ─────────────────────────────────────────────────────────
    let current_sites: BTreeSet<String> = detection.high_sites.keys().cloned().collect();
    let persistent = mark_persistent(&history);
    let mut log = match NotificationLog::load(&general.notification_log) {
        Ok(l) => l,
        Err(e) => {
            logger.log(&Event::Warning {
                message: &format!("notification log unreadable, starting empty: {}", e),
            });
            NotificationLog::empty(&general.notification_log)
        }
    };
    let (notify, suppressed) =
        select_for_notification(&persistent, &current_sites, &log, now, general.notify_cooldown_hours);

    for site in &notify {
        logger.log(&Event::Notify { group: name, site });
        log.record(site, name, now);
    }
    for site in &suppressed {
        logger.log(&Event::Suppressed { group: name, site });
    }
    if !cfg.dry_run && !notify.is_empty() {
        log.save(now, general.notify_cooldown_hours)?;
    }

    if !detection.is_empty() {
        outcome.report = Some(render_report(&group.display_name, &detection.offending, now));
    }
    outcome.detection = detection;
    outcome.notified = notify;
    outcome.suppressed = suppressed;
    log_summary(cfg, &outcome);
    Ok(outcome)
}

fn log_summary(cfg: &MonitorConfig, outcome: &PollOutcome) {
    cfg.logger.log(&Event::PollSummary {
        group:        &outcome.group,
        hosts:        outcome.hosts,
        hits:         outcome.hits,
        elapsed_secs: outcome.elapsed_secs.unwrap_or(0),
        flagged:      outcome.detection.high_sites.len(),
        notified:     outcome.notified.len(),
        dry_run:      cfg.dry_run,
    });
}
