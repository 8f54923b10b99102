//! Snapshot file format and atomic writes.
//!
//! A snapshot is one JSON object mapping `TYPE:domain` to
//! `{"value": ..., "expiration": <unix seconds, 0 = never>}`.

use super::key::{CacheKey, CacheValue};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
struct SnapshotEntry {
    value: Value,
    expiration: i64,
}

/// Builds the on-disk form of one entry; `expiration` 0 means never.
pub(crate) fn entry_json(value: &CacheValue, expiration: i64) -> Value {
    serde_json::json!({ "value": value.to_json(), "expiration": expiration })
}

/// An entry read back from disk.
#[derive(Debug)]
pub(crate) struct LoadedEntry {
    pub key: CacheKey,
    pub value: CacheValue,
    /// `None` when stored without expiry.
    pub expires_at: Option<OffsetDateTime>,
}

/// Converts an internal nanosecond timestamp to wall-clock time.
///
/// Anything outside years 1..=9999 is treated as corrupt.
pub(crate) fn valid_instant_nanos(nanos: i128) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .filter(|t| (1..=9999).contains(&t.year()))
}

fn valid_instant_secs(secs: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .filter(|t| (1..=9999).contains(&t.year()))
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Renames the finished temp file over the snapshot.
type Rename = fn(&Path, &Path) -> io::Result<()>;

/// Writes `entries` to `path` via `<path>.tmp`, or removes `path` when empty.
pub(crate) fn write(path: &Path, entries: Map<String, Value>) -> Result<(), NetError> {
    write_with(path, entries, |from, to| fs::rename(from, to))
}

/// [`write`] with the rename step supplied. When it fails (a bind-mounted
/// snapshot cannot be replaced), the temp file is copied over `path` and
/// then removed.
fn write_with(path: &Path, entries: Map<String, Value>, rename: Rename) -> Result<(), NetError> {
    if entries.is_empty() {
        return match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(NetError::cache_io(path, e)),
            _ => Ok(()),
        };
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).cache_context(parent)?;
    }

    let json =
        serde_json::to_vec_pretty(&Value::Object(entries)).map_err(|e| NetError::CacheFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let tmp = tmp_path(path);
    fs::write(&tmp, &json).cache_context(&tmp)?;

    if let Err(e) = rename(&tmp, path) {
        tracing::debug!(path = %path.display(), error = %e, "rename failed, copying snapshot");
        let data = fs::read(&tmp).cache_context(&tmp)?;
        fs::write(path, data).cache_context(path)?;
        let _ = fs::remove_file(&tmp);
    }
    Ok(())
}

/// Reads a snapshot. A missing or blank file yields no entries; entries that
/// are malformed, corrupt, or already expired at `now` are skipped.
pub(crate) fn read(path: &Path, now: OffsetDateTime) -> Result<Vec<LoadedEntry>, NetError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(NetError::cache_io(path, e)),
    };
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let format_error = |message: String| NetError::CacheFormat {
        path: path.to_path_buf(),
        message,
    };
    let root: Value = serde_json::from_str(&text).map_err(|e| format_error(e.to_string()))?;
    let Value::Object(map) = root else {
        return Err(format_error("snapshot is not a JSON object".to_string()));
    };

    let mut entries = Vec::with_capacity(map.len());
    for (raw_key, raw_entry) in map {
        let key = match raw_key.parse::<CacheKey>() {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(error = %e, "skipping snapshot entry");
                continue;
            }
        };
        let entry = match serde_json::from_value::<SnapshotEntry>(raw_entry) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "skipping malformed snapshot entry");
                continue;
            }
        };

        let expires_at = if entry.expiration == 0 {
            None
        } else {
            match valid_instant_secs(entry.expiration) {
                Some(t) if t > now => Some(t),
                Some(_) => continue,
                None => {
                    tracing::debug!(
                        key = %key,
                        expiration = entry.expiration,
                        "skipping entry with invalid expiration"
                    );
                    continue;
                }
            }
        };

        entries.push(LoadedEntry {
            key,
            value: CacheValue::from_json(entry.value),
            expires_at,
        });
    }
    Ok(entries)
}
