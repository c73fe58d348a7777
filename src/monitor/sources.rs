//! Inputs of a poll: the two topology lists and the AWStats visitor files.

use crate::error::{FailoverError, Result};
use crate::logger::{Event, Logger};
use crate::monitor::parsers::parse_awstats_visitors;
use crate::monitor::types::VisitorRow;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Reads a list from a URL or from disk.
///
/// # Arguments
/// * `location` - `http://`/`https://` URL, or a filesystem path.
/// * `timeout`  - Upper bound on the whole HTTP request.
pub async fn fetch_text(location: &str, timeout: Duration) -> Result<String> {
    if !is_url(location) {
        return tokio::fs::read_to_string(location)
            .await
            .map_err(|e| FailoverError::io(location, e));
    }

    let http = |source| FailoverError::Http {
        url: location.to_string(),
        source,
    };
    let client = reqwest::Client::builder().timeout(timeout).build().map_err(http)?;
    let response = client
        .get(location)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(http)?;
    response.text().await.map_err(http)
}

/// `{dir}/{instance}/awstats{date}.{instance}.txt`, `date` taken from `now` (UTC).
///
/// # Errors
/// [`FailoverError::Config`] when `date_format` holds an unknown specifier.
pub fn awstats_path(dir: &Path, instance: &str, date_format: &str, now: i64) -> Result<PathBuf> {
    let when: DateTime<Utc> = DateTime::from_timestamp(now, 0).unwrap_or_default();
    let mut date = String::new();
    write!(date, "{}", when.format(date_format))
        .map_err(|_| FailoverError::Config(format!("invalid AWStats date format '{}'", date_format)))?;
    Ok(dir.join(instance).join(format!("awstats{}.{}.txt", date, instance)))
}

/// Sums rows of the same host across instances; the last visit is the latest one.
pub fn aggregate_instances<I>(per_instance: I) -> Vec<VisitorRow>
where
    I: IntoIterator<Item = Vec<VisitorRow>>,
{
    let mut merged: BTreeMap<String, VisitorRow> = BTreeMap::new();
    for row in per_instance.into_iter().flatten() {
        match merged.get_mut(&row.host) {
            Some(total) => {
                total.hits = total.hits.saturating_add(row.hits);
                total.bandwidth = total.bandwidth.saturating_add(row.bandwidth);
                total.last_visit = total.last_visit.max(row.last_visit);
            }
            None => {
                merged.insert(row.host.clone(), row);
            }
        }
    }
    merged.into_values().collect()
}

/// Loads and aggregates the visitor tables of a group's instances.
///
/// A missing or section-less file is logged and contributes nothing.
pub async fn load_visitors(
    dir:         &Path,
    instances:   &[String],
    date_format: &str,
    now:         i64,
    logger:      &Logger,
) -> Vec<VisitorRow> {
    let mut per_instance = Vec::with_capacity(instances.len());
    for instance in instances {
        let path = match awstats_path(dir, instance, date_format, now) {
            Ok(p) => p,
            Err(e) => {
                logger.log(&Event::Warning { message: &e.to_string() });
                continue;
            }
        };
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) => {
                logger.log(&Event::Warning {
                    message: &format!("AWStats file {} unreadable: {}", path.display(), e),
                });
                continue;
            }
        };
        match parse_awstats_visitors(&text) {
            Some(rows) => per_instance.push(rows),
            None => logger.log(&Event::Warning {
                message: &format!("no visitor section in {}", path.display()),
            }),
        }
    }
    aggregate_instances(per_instance)
}
