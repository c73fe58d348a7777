mod cli;
mod error;
mod logger;
mod monitor;

use anyhow::{bail, Context};
use clap::Parser;
use cli::Cli;
use logger::{Event, Logger, SharedLogger};
use monitor::config::Settings;
use monitor::host::{HostResolver, OrgLookup, SystemNameService, TableOrgLookup, UnknownOrg};
use monitor::tagger::SiteTagger;
use monitor::types::ShutdownFlag;
use monitor::{load_topology, run_poll, MonitorConfig};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logger: SharedLogger = match Logger::new(cli.json, cli.log_file.as_deref()) {
        Ok(l) => Arc::new(l),
        Err(e) => {
            eprintln!("cannot open log file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli, Arc::clone(&logger)).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            logger.log(&Event::Warning { message: &format!("{:#}", e) });
            ExitCode::FAILURE
        }
    }
}

/// Polls every selected group once.
///
/// # Returns
/// `Ok(true)` when every group completed, `Ok(false)` when at least one failed.
async fn run(cli: Cli, logger: SharedLogger) -> anyhow::Result<bool> {
    // ── Configuration ────────────────────────────────────────────────────────
    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("loading configuration {}", cli.config.display()))?;
    if let Some(workers) = cli.workers {
        settings.general.resolver_workers = workers.max(1);
    }
    if let Some(secs) = cli.resolve_timeout {
        settings.general.resolve_timeout_secs = secs;
    }
    if let Some(ranks) = cli.ranks {
        settings.general.ranks = ranks;
    }

    let selected: Vec<String> = if cli.groups.is_empty() {
        settings.groups.keys().cloned().collect()
    } else {
        for name in &cli.groups {
            if !settings.groups.contains_key(name) {
                bail!("group '{}' is not defined in {}", name, cli.config.display());
            }
        }
        cli.groups.clone()
    };

    let org: Arc<dyn OrgLookup> = match &settings.general.org_table {
        Some(path) => Arc::new(
            TableOrgLookup::load(path)
                .with_context(|| format!("loading organization table {}", path.display()))?,
        ),
        None => {
            logger.log(&Event::Info { message: "No organization table configured; all hosts map to Unknown" });
            Arc::new(UnknownOrg)
        }
    };

    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));
    register_shutdown_handler(Arc::clone(&shutdown), Arc::clone(&logger))?;

    let cfg = MonitorConfig {
        resolver: HostResolver::new(
            Arc::new(SystemNameService),
            settings.general.resolver_workers,
            settings.resolve_timeout(),
        ),
        settings,
        org,
        logger: Arc::clone(&logger),
        shutdown,
        dry_run: cli.dry_run,
    };

    // ── Topology ─────────────────────────────────────────────────────────────
    let topology = load_topology(&cfg).await.context("building topology")?;
    let tagger = SiteTagger::new(&topology, Arc::clone(&cfg.org));

    // ── Groups ───────────────────────────────────────────────────────────────
    let now = chrono::Utc::now().timestamp();
    let mut all_ok = true;
    for name in &selected {
        let group = &cfg.settings.groups[name];
        match run_poll(&cfg, &tagger, name, group, now).await {
            Ok(outcome) => {
                if let Some(report) = &outcome.report {
                    if !outcome.notified.is_empty() || cfg.dry_run {
                        println!("{}", report);
                    }
                }
            }
            Err(e) => {
                all_ok = false;
                logger.log(&Event::Warning { message: &format!("group {} failed: {}", name, e) });
            }
        }
    }
    Ok(all_ok)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Registers a Ctrl+C handler that asks the current poll to stop before it writes.
fn register_shutdown_handler(shutdown: ShutdownFlag, logger: SharedLogger) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        logger.log(&Event::Info { message: "Ctrl+C received, aborting before state is written" });
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("registering Ctrl+C handler")
}
