//! Resolver and cache configuration.
//!
//! All structs deserialize with serde; durations are written in whole
//! seconds (`"default_ttl": 600`).

use super::option::ResolveOption;
use crate::socket::priority::IpPriority;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable enabling the cache (`1`, `true`, `yes`, `on`).
pub const ENV_CACHE_ENABLED: &str = "FWDPROXY_DNS_CACHE";
/// Environment variable overriding the snapshot path.
pub const ENV_CACHE_FILE: &str = "FWDPROXY_DNS_CACHE_FILE";
/// Environment variable overriding the default TTL, in seconds.
pub const ENV_CACHE_TTL: &str = "FWDPROXY_DNS_CACHE_TTL";

pub(crate) mod duration_secs {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Settings for [`DnsCache`](super::cache::DnsCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Snapshot file.
    pub path: PathBuf,
    /// TTL used when a caller passes zero, and for non-expiring entries on reload.
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    #[serde(with = "duration_secs")]
    pub save_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("dns_cache.json"),
            default_ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(300),
            save_interval: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    /// Defaults overridden by the `FWDPROXY_DNS_CACHE*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_CACHE_ENABLED) {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.enabled = true,
                "0" | "false" | "no" | "off" | "" => config.enabled = false,
                other => {
                    tracing::warn!(var = ENV_CACHE_ENABLED, value = other, "ignoring invalid value")
                }
            }
        }
        if let Some(path) = lookup(ENV_CACHE_FILE).filter(|p| !p.trim().is_empty()) {
            config.path = PathBuf::from(path.trim());
        }
        if let Some(ttl) = lookup(ENV_CACHE_TTL) {
            match ttl.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.default_ttl = Duration::from_secs(secs),
                _ => tracing::warn!(var = ENV_CACHE_TTL, value = %ttl, "ignoring invalid value"),
            }
        }

        config
    }
}

/// Settings for the dial-side resolution chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub cache: CacheConfig,
    pub ip_priority: IpPriority,
    /// Hosts file override; the platform default when unset.
    pub hosts_path: Option<PathBuf>,
    #[serde(with = "duration_secs")]
    pub query_timeout: Duration,
    #[serde(skip_serializing)]
    pub options: Vec<ResolveOption>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            ip_priority: IpPriority::default(),
            hosts_path: None,
            query_timeout: Duration::from_secs(30),
            options: Vec::new(),
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn ip_priority(mut self, priority: IpPriority) -> Self {
        self.ip_priority = priority;
        self
    }

    pub fn hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.hosts_path = Some(path.into());
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn options(mut self, options: Vec<ResolveOption>) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_cache_defaults() {
        let config = CacheConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.path, PathBuf::from("dns_cache.json"));
        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.cleanup_interval, Duration::from_secs(300));
        assert_eq!(config.save_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_cache_from_env() {
        let vars: HashMap<&str, &str> = [
            (ENV_CACHE_ENABLED, "True"),
            (ENV_CACHE_FILE, "/var/lib/fwdproxy/dns.json"),
            (ENV_CACHE_TTL, "120"),
        ]
        .into_iter()
        .collect();

        let config = CacheConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(config.enabled);
        assert_eq!(config.path, PathBuf::from("/var/lib/fwdproxy/dns.json"));
        assert_eq!(config.default_ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_cache_from_env_ignores_garbage() {
        let config = CacheConfig::from_lookup(|k| match k {
            ENV_CACHE_ENABLED => Some("maybe".into()),
            ENV_CACHE_TTL => Some("-5".into()),
            _ => None,
        });
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_resolver_config_deserialize() {
        let config: ResolverConfig = serde_json::from_str(
            r#"{
                "cache": {"enabled": true, "path": "/tmp/dns.json", "default_ttl": 60},
                "ip_priority": "ipv6-first",
                "query_timeout": 5,
                "options": [{"url": "https://dns.google/dns-query", "ip": "8.8.8.8"}]
            }"#,
        )
        .unwrap();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(60));
        assert_eq!(config.cache.save_interval, Duration::from_secs(30));
        assert_eq!(config.ip_priority, IpPriority::Ipv6First);
        assert_eq!(config.query_timeout, Duration::from_secs(5));
        assert_eq!(config.options.len(), 1);
        assert!(config.hosts_path.is_none());
    }
}
