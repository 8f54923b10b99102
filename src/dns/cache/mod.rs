//! Durable DNS cache.
//!
//! An in-memory table keyed by `(record type, normalized domain)` with a
//! per-entry expiry. The table is periodically written to a JSON snapshot
//! and reloaded at startup, so resolved names survive restarts.
//!
//! # Example
//!
//! ```rust,ignore
//! use fwdproxy::dns::cache::DnsCache;
//! use fwdproxy::dns::CacheConfig;
//!
//! let cache = DnsCache::open(CacheConfig::new().enabled(true).path("dns.json"));
//! cache.set(RecordType::A, "example.com", vec![ip], Duration::from_secs(300));
//! // ...
//! cache.shutdown().await?;
//! ```

mod key;
mod snapshot;

pub use key::{CacheKey, CacheValue, InvalidKey};

use super::config::CacheConfig;
use crate::base::neterror::NetError;
use hickory_resolver::proto::rr::RecordType;
use serde_json::Map;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    /// Unix nanoseconds; `None` never expires.
    expires_at: Option<i128>,
}

impl Entry {
    fn is_expired(&self, now: i128) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

struct Saver {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

fn now_nanos() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos()
}

fn deadline(now: i128, ttl: Duration) -> i128 {
    now.saturating_add(i128::try_from(ttl.as_nanos()).unwrap_or(i128::MAX))
}

/// Expiring key/value store with snapshot persistence.
///
/// Reads take a shared lock and writes an exclusive one; [`save`](Self::save)
/// builds its snapshot under the shared lock so it never observes a torn
/// table. Use one store per snapshot path.
pub struct DnsCache {
    config: CacheConfig,
    table: RwLock<HashMap<CacheKey, Entry>>,
    save_lock: Mutex<()>,
    saver: Mutex<Option<Saver>>,
}

impl DnsCache {
    /// Creates an empty store without loading or background work.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            table: RwLock::new(HashMap::new()),
            save_lock: Mutex::new(()),
            saver: Mutex::new(None),
        }
    }

    /// Loads the snapshot and starts the periodic save and cleanup task.
    ///
    /// A snapshot that cannot be read is logged and ignored. Must be called
    /// from within a Tokio runtime.
    pub fn open(config: CacheConfig) -> Arc<Self> {
        let cache = Arc::new(Self::new(config));
        match cache.load() {
            Ok(count) => {
                tracing::info!(
                    path = %cache.config.path.display(),
                    entries = count,
                    "DNS cache loaded"
                )
            }
            Err(e) => tracing::warn!(error = %e, "failed to load DNS cache, starting empty"),
        }
        cache.start_background();
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn read_table(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, Entry>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, Entry>> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live value for `domain`; expired entries read as absent.
    pub fn get(&self, record_type: RecordType, domain: &str) -> Option<CacheValue> {
        let key = CacheKey::new(record_type, domain);
        let now = now_nanos();
        self.read_table()
            .get(&key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Stores `value` for `ttl`, or for the default TTL when `ttl` is zero.
    pub fn set(
        &self,
        record_type: RecordType,
        domain: &str,
        value: impl Into<CacheValue>,
        ttl: Duration,
    ) {
        let ttl = if ttl.is_zero() { self.config.default_ttl } else { ttl };
        let entry = Entry {
            value: value.into(),
            expires_at: Some(deadline(now_nanos(), ttl)),
        };
        self.write_table().insert(CacheKey::new(record_type, domain), entry);
    }

    /// Stores `value` without expiry.
    pub fn set_forever(&self, record_type: RecordType, domain: &str, value: impl Into<CacheValue>) {
        let entry = Entry {
            value: value.into(),
            expires_at: None,
        };
        self.write_table().insert(CacheKey::new(record_type, domain), entry);
    }

    pub fn delete(&self, record_type: RecordType, domain: &str) {
        self.write_table().remove(&CacheKey::new(record_type, domain));
    }

    pub fn flush_all(&self) {
        self.write_table().clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read_table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_table().is_empty()
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn delete_expired(&self) -> usize {
        let now = now_nanos();
        let mut table = self.write_table();
        let before = table.len();
        table.retain(|_, entry| !entry.is_expired(now));
        before - table.len()
    }

    /// Writes every live entry to the snapshot file and returns the count.
    ///
    /// Entries whose expiry does not map to a year in 1..=9999 are left out
    /// of the snapshot but stay in memory. With nothing to save, an existing
    /// snapshot is removed.
    pub fn save(&self) -> Result<usize, NetError> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = now_nanos();

        let entries = {
            let table = self.read_table();
            let mut entries = Map::with_capacity(table.len());
            for (key, entry) in table.iter() {
                let expiration = match entry.expires_at {
                    None => 0,
                    Some(t) if t <= now => continue,
                    Some(t) => match snapshot::valid_instant_nanos(t) {
                        Some(at) => at.unix_timestamp(),
                        None => {
                            tracing::warn!(
                                key = %key,
                                "dropping entry with corrupt expiration from snapshot"
                            );
                            continue;
                        }
                    },
                };
                entries.insert(key.to_string(), snapshot::entry_json(&entry.value, expiration));
            }
            entries
        };

        let count = entries.len();
        snapshot::write(&self.config.path, entries)?;
        tracing::debug!(path = %self.config.path.display(), entries = count, "DNS cache saved");
        Ok(count)
    }

    /// Merges the snapshot file into the table and returns how many entries
    /// were loaded. Entries stored without expiry get the default TTL.
    pub fn load(&self) -> Result<usize, NetError> {
        let now = OffsetDateTime::now_utc();
        let loaded = snapshot::read(&self.config.path, now)?;
        let now_nanos = now.unix_timestamp_nanos();

        let count = loaded.len();
        let mut table = self.write_table();
        for entry in loaded {
            let expires_at = match entry.expires_at {
                Some(at) => at.unix_timestamp_nanos(),
                None => deadline(now_nanos, self.config.default_ttl),
            };
            table.insert(
                entry.key,
                Entry {
                    value: entry.value,
                    expires_at: Some(expires_at),
                },
            );
        }
        Ok(count)
    }

    fn start_background(self: &Arc<Self>) {
        let token = CancellationToken::new();
        let cache = Arc::downgrade(self);
        let handle = tokio::spawn(run_background(
            cache,
            token.clone(),
            self.config.save_interval,
            self.config.cleanup_interval,
        ));

        let previous = self
            .saver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Saver { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    /// [`save`](Self::save) on the blocking pool, off the runtime workers.
    pub async fn save_async(self: &Arc<Self>) -> Result<usize, NetError> {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.save())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "DNS cache save task failed");
                NetError::cache_io(self.config.path.clone(), io::Error::other(e))
            })?
    }

    /// Stops the background task, waits for it, then saves one last time.
    pub async fn shutdown(self: &Arc<Self>) -> Result<usize, NetError> {
        let saver = self.saver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(saver) = saver {
            saver.token.cancel();
            if let Err(e) = saver.handle.await {
                tracing::warn!(error = %e, "DNS cache background task failed");
            }
        }

        let count = self.save_async().await?;
        tracing::info!(
            path = %self.config.path.display(),
            entries = count,
            "DNS cache saved on shutdown"
        );
        Ok(count)
    }
}

impl Drop for DnsCache {
    fn drop(&mut self) {
        let saver = self.saver.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(saver) = saver {
            saver.token.cancel();
        }
    }
}

impl std::fmt::Debug for DnsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}

async fn run_background(
    cache: Weak<DnsCache>,
    token: CancellationToken,
    save_interval: Duration,
    cleanup_interval: Duration,
) {
    let period = |d: Duration| d.max(Duration::from_millis(1));
    let start = tokio::time::Instant::now();
    let mut save_tick =
        tokio::time::interval_at(start + period(save_interval), period(save_interval));
    let mut cleanup_tick =
        tokio::time::interval_at(start + period(cleanup_interval), period(cleanup_interval));

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = save_tick.tick() => {
                let Some(cache) = cache.upgrade() else { break };
                if let Err(e) = cache.save_async().await {
                    tracing::warn!(error = %e, "periodic DNS cache save failed");
                }
            }
            _ = cleanup_tick.tick() => {
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.delete_expired();
                if removed > 0 {
                    tracing::debug!(removed, "expired DNS cache entries removed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
    }

    fn store() -> (tempfile::TempDir, DnsCache) {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new().enabled(true).path(dir.path().join("dns.json"));
        (dir, DnsCache::new(config))
    }

    #[test]
    fn test_set_get_normalizes() {
        let (_dir, cache) = store();
        cache.set(RecordType::A, "Example.COM.", vec![ip(1)], Duration::from_secs(60));

        assert_eq!(cache.get(RecordType::A, " example.com "), Some(CacheValue::Addrs(vec![ip(1)])));
        assert_eq!(cache.get(RecordType::AAAA, "example.com"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_uses_default() {
        let (_dir, cache) = store();
        cache.set(RecordType::A, "example.com", vec![ip(1)], Duration::ZERO);

        let expires_at = cache.read_table().values().next().unwrap().expires_at.unwrap();
        let remaining = expires_at - now_nanos();
        assert!(remaining > Duration::from_secs(590).as_nanos() as i128);
        assert!(remaining <= Duration::from_secs(600).as_nanos() as i128);
    }

    #[test]
    fn test_delete_and_flush() {
        let (_dir, cache) = store();
        cache.set(RecordType::A, "a.example", vec![ip(1)], Duration::from_secs(60));
        cache.set_forever(RecordType::CNAME, "b.example", "a.example");

        cache.delete(RecordType::A, "A.EXAMPLE");
        assert!(cache.get(RecordType::A, "a.example").is_none());
        assert_eq!(cache.len(), 1);

        cache.flush_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_expired() {
        let (_dir, cache) = store();
        cache.set(RecordType::A, "short.example", vec![ip(1)], Duration::from_millis(1));
        cache.set(RecordType::A, "long.example", vec![ip(2)], Duration::from_secs(60));
        cache.set_forever(RecordType::A, "pinned.example", vec![ip(3)]);
        std::thread::sleep(Duration::from_millis(10));

        assert!(cache.get(RecordType::A, "short.example").is_none());
        assert_eq!(cache.delete_expired(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_save_skips_corrupt_expiry_but_keeps_it_live() {
        let (_dir, cache) = store();
        // Roughly 9000 years out: past the end of year 9999.
        let far = Duration::from_secs(9_000 * 365 * 24 * 3600);
        cache.set(RecordType::A, "far.example", vec![ip(1)], far);
        cache.set(RecordType::A, "near.example", vec![ip(2)], Duration::from_secs(60));

        assert_eq!(cache.save().unwrap(), 1);
        assert!(cache.get(RecordType::A, "far.example").is_some());

        let reloaded = DnsCache::new(cache.config().clone());
        assert_eq!(reloaded.load().unwrap(), 1);
        assert!(reloaded.get(RecordType::A, "far.example").is_none());
        assert!(reloaded.get(RecordType::A, "near.example").is_some());
    }

    #[test]
    fn test_forever_reloads_with_default_ttl() {
        let (_dir, cache) = store();
        cache.set_forever(RecordType::TXT, "txt.example", "hello");
        cache.save().unwrap();

        let reloaded = DnsCache::new(cache.config().clone());
        reloaded.load().unwrap();
        assert_eq!(
            reloaded.get(RecordType::TXT, "txt.example"),
            Some(CacheValue::Text("hello".into()))
        );
        assert!(reloaded.read_table().values().all(|e| e.expires_at.is_some()));
    }

    #[tokio::test]
    async fn test_background_saves_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dns.json");
        let config = CacheConfig::new()
            .enabled(true)
            .path(&path)
            .save_interval(Duration::from_millis(20))
            .cleanup_interval(Duration::from_millis(20));

        let cache = DnsCache::open(config);
        cache.set(RecordType::A, "example.com", vec![ip(9)], Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(path.exists());

        cache.set(RecordType::A, "late.example", vec![ip(10)], Duration::from_secs(60));
        assert_eq!(cache.shutdown().await.unwrap(), 2);
        assert!(cache.saver.lock().unwrap().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_save_async_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dns.json");
        let cache = Arc::new(DnsCache::new(CacheConfig::new().enabled(true).path(&path)));
        cache.set(RecordType::A, "example.com", vec![ip(11)], Duration::from_secs(60));

        assert_eq!(cache.save_async().await.unwrap(), 1);
        assert!(path.exists());

        cache.delete(RecordType::A, "example.com");
        assert_eq!(cache.save_async().await.unwrap(), 0);
        assert!(!path.exists());
    }
}
