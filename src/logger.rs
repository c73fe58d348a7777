//! Structured logging for the failover monitor.
//!
//! Provides a [`Logger`] that writes events to stdout and optionally to a log
//! file. Output can be formatted as human-readable plain text or as
//! newline-delimited JSON (NDJSON) for log shippers.

use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds a poll can emit.
///
/// The `#[serde(tag = "event")]` attribute puts an `"event"` key in the JSON
/// form so consumers can filter by type.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// Something was degraded but the poll continues.
    Warning { message: &'a str },

    /// A topology list was fetched and parsed.
    ListLoaded { list: &'a str, entries: usize },

    /// An exception line was skipped as a whole.
    ExceptionRejected {
        line_no: usize,
        site:    &'a str,
        content: &'a str,
    },

    /// A listed host did not resolve and maps to `0.0.0.0`.
    Unresolved { host: &'a str },

    /// The canonical topology for this cycle is ready.
    TopologyBuilt { records: usize, sites: usize },

    /// No previous snapshot (or no elapsed time); nothing to compare yet.
    FirstPoll { group: &'a str },

    /// A site's direct traffic exceeded the group threshold.
    SiteFlagged {
        group:       &'a str,
        site:        &'a str,
        direct_rate: f64,
        hosts:       usize,
    },

    /// A persistent failover outside its cool-down.
    Notify { group: &'a str, site: &'a str },

    /// A persistent failover still inside its cool-down.
    Suppressed { group: &'a str, site: &'a str },

    /// Per-group summary at the end of a poll.
    PollSummary {
        group:        &'a str,
        hosts:        usize,
        hits:         u64,
        elapsed_secs: i64,
        flagged:      usize,
        notified:     usize,
        dry_run:      bool,
    },
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared, thread-safe structured logger.
///
/// Constructed once in `main` and passed as an `Arc<Logger>`. The internal
/// `Mutex` serialises file writes so lines are never interleaved.
pub struct Logger {
    /// Whether to format events as NDJSON instead of plain text.
    json:   bool,
    /// Optional buffered file writer. `None` when `--log-file` was not given.
    file:   Option<Mutex<BufWriter<std::fs::File>>>,
}

/// Type alias used throughout the codebase for convenience.
pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `json`     - Emit NDJSON instead of plain text when `true`.
    /// * `log_path` - If `Some`, open (or create) this file for appended writes.
    ///
    /// # Errors
    /// Returns an `io::Error` if the log file cannot be opened or created.
    pub fn new(json: bool, log_path: Option<&str>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, file })
    }

    /// Logs a single [`Event`], writing to stdout and optionally to the log file.
    ///
    /// NDJSON output gets a `"timestamp"` field injected alongside the event
    /// fields.
    pub fn log(&self, event: &Event) {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        let line = if self.json {
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert(
                    "timestamp".to_string(),
                    serde_json::Value::String(timestamp.clone()),
                );
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, self.plain_text(event))
        };

        println!("{}", line);

        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    /// Formats an [`Event`] as a human-readable plain-text string (no timestamp).
    fn plain_text(&self, event: &Event) -> String {
        match event {
            Event::Info { message } =>
                format!("[INFO] {}", message),

            Event::Warning { message } =>
                format!("[WARN] {}", message),

            Event::ListLoaded { list, entries } =>
                format!("[LIST] {} loaded with {} entries", list, entries),

            Event::ExceptionRejected { line_no, site, content } =>
                format!("[REJECTED] exception line {} ({}): {}", line_no, site, content),

            Event::Unresolved { host } =>
                format!("[UNRESOLVED] {} -> 0.0.0.0", host),

            Event::TopologyBuilt { records, sites } =>
                format!("[TOPOLOGY] {} records across {} sites", records, sites),

            Event::FirstPoll { group } =>
                format!("[FIRST POLL] {}: snapshot saved, no comparison this cycle", group),

            Event::SiteFlagged { group, site, direct_rate, hosts } =>
                format!("[FLAGGED] {} {} direct {:.2} q/s over {} hosts", group, site, direct_rate, hosts),

            Event::Notify { group, site } =>
                format!("[NOTIFY] {} {} is failing over persistently", group, site),

            Event::Suppressed { group, site } =>
                format!("[SUPPRESSED] {} {} already notified within cool-down", group, site),

            Event::PollSummary {
                group, hosts, hits, elapsed_secs, flagged, notified, dry_run
            } => format!(
                "[SUMMARY] {} hosts={} hits={} elapsed={}s flagged={} notified={}{}",
                group, hosts, hits, elapsed_secs, flagged, notified,
                if *dry_run { " (dry run)" } else { "" }
            ),
        }
    }
}
