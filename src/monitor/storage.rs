//! Atomic file replacement and CSV helpers shared by the state files.

use crate::error::{FailoverError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replaces `path` with `contents` via a temporary file in the same directory.
///
/// Readers see either the old file or the new one, never a partial write, and
/// an interrupted run leaves the old file in place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| FailoverError::io(dir, e))?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| FailoverError::io(dir, e))?;
    temp.as_file_mut()
        .write_all(contents)
        .map_err(|e| FailoverError::io(temp.path(), e))?;
    temp.as_file().sync_all().map_err(|e| FailoverError::io(temp.path(), e))?;
    temp.persist(path).map_err(|e| FailoverError::io(path, e.error))?;
    Ok(())
}

/// Serializes rows as CSV with a header taken from the first row.
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| FailoverError::Csv(csv::Error::from(e.into_error())))
}

pub fn from_csv<T: DeserializeOwned>(text: &str) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let rows = reader.deserialize().collect::<std::result::Result<Vec<T>, csv::Error>>()?;
    Ok(rows)
}

/// Reads a whole CSV file. `Ok(None)` when the file does not exist.
pub fn read_csv_file<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>> {
    match fs::read_to_string(path) {
        Ok(text) => from_csv(&text).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FailoverError::io(path, e)),
    }
}
