//! Caching decorator over any [`Resolve`] implementation.

use super::cache::DnsCache;
use super::name::Name;
use super::resolve::{merge_unique, Addrs, Network, Resolve, Resolving, ResolvingOne};
use crate::base::neterror::NetError;
use hickory_resolver::proto::rr::RecordType;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Record types cleared by [`CachingResolver::invalidate`].
const INVALIDATED_TYPES: [RecordType; 6] = [
    RecordType::A,
    RecordType::AAAA,
    RecordType::CNAME,
    RecordType::MX,
    RecordType::TXT,
    RecordType::NS,
];

/// Snapshot of cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

fn record_type_of(ip: &IpAddr) -> RecordType {
    if ip.is_ipv4() {
        RecordType::A
    } else {
        RecordType::AAAA
    }
}

fn network_of(record_type: RecordType) -> Network {
    if record_type == RecordType::AAAA {
        Network::Ipv6
    } else {
        Network::Ipv4
    }
}

/// Memoizes results of the wrapped resolver in a [`DnsCache`].
///
/// Without a store every call goes straight to the wrapped resolver. Fresh
/// results are cached with the store's default TTL.
#[derive(Clone)]
pub struct CachingResolver {
    inner: Arc<dyn Resolve>,
    cache: Option<Arc<DnsCache>>,
    counters: Arc<Counters>,
}

impl CachingResolver {
    pub fn new(inner: Arc<dyn Resolve>, cache: Option<Arc<DnsCache>>) -> Self {
        Self {
            inner,
            cache,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> Option<&Arc<DnsCache>> {
        self.cache.as_ref()
    }

    /// Drops every cached record for `name`.
    pub fn invalidate(&self, name: &str) {
        if let Some(cache) = &self.cache {
            for record_type in INVALIDATED_TYPES {
                cache.delete(record_type, name);
            }
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.flush_all();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entries: self.cache.as_ref().map_or(0, |c| c.len()),
        }
    }

    fn cached(&self, cache: &DnsCache, record_type: RecordType, name: &Name) -> Option<Addrs> {
        let addrs = cache
            .get(record_type, name.as_str())
            .and_then(|value| value.as_addrs().map(<[IpAddr]>::to_vec))
            .filter(|addrs| !addrs.is_empty());

        let counter = if addrs.is_some() { &self.counters.hits } else { &self.counters.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        addrs
    }

    /// One family: cache first, then the wrapped resolver.
    ///
    /// Hosts-file answers arrive with both families whatever the hint, so
    /// the result is split and each family cached under its own type. The
    /// returned list may be empty.
    async fn lookup_family(
        &self,
        cache: &DnsCache,
        record_type: RecordType,
        name: &Name,
    ) -> Result<Addrs, NetError> {
        if let Some(addrs) = self.cached(cache, record_type, name) {
            tracing::debug!(domain = %name, record_type = %record_type, "DNS cache hit");
            return Ok(addrs);
        }

        let found = self.inner.lookup_all(network_of(record_type), name.clone()).await?;
        let (v4, v6): (Addrs, Addrs) = found.into_iter().partition(IpAddr::is_ipv4);
        for (family, addrs) in [(RecordType::A, &v4), (RecordType::AAAA, &v6)] {
            if !addrs.is_empty() {
                cache.set(family, name.as_str(), addrs.clone(), Duration::ZERO);
            }
        }
        Ok(if record_type == RecordType::AAAA { v6 } else { v4 })
    }

    async fn lookup(&self, network: Network, name: Name) -> Result<Addrs, NetError> {
        let Some(cache) = self.cache.as_deref() else {
            return self.inner.lookup_all(network, name).await;
        };

        let record_type = match network {
            Network::Ipv4 => RecordType::A,
            Network::Ipv6 => RecordType::AAAA,
            Network::Ip => return self.lookup_both(cache, name).await,
        };
        let addrs = self.lookup_family(cache, record_type, &name).await?;
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved {
                domain: name.to_string(),
            });
        }
        Ok(addrs)
    }

    async fn lookup_both(&self, cache: &DnsCache, name: Name) -> Result<Addrs, NetError> {
        let v4 = self.lookup_family(cache, RecordType::A, &name).await;
        let v6 = self.lookup_family(cache, RecordType::AAAA, &name).await;

        let mut addrs = Vec::new();
        let mut errors = Vec::new();
        for half in [v4, v6] {
            match half {
                Ok(found) => merge_unique(&mut addrs, found),
                Err(e) => errors.push(e),
            }
        }

        if addrs.is_empty() {
            for e in &errors {
                tracing::debug!(domain = %name, error = %e, "lookup failed");
            }
            return Err(NetError::NameNotResolved {
                domain: name.to_string(),
            });
        }
        Ok(addrs)
    }

    async fn lookup_one(&self, name: Name) -> Result<IpAddr, NetError> {
        let Some(cache) = self.cache.as_deref() else {
            return self.inner.resolve_one(name).await;
        };

        for record_type in [RecordType::A, RecordType::AAAA] {
            let hit = self
                .cached(cache, record_type, &name)
                .and_then(|addrs| addrs.into_iter().next());
            if let Some(ip) = hit {
                tracing::debug!(domain = %name, record_type = %record_type, "DNS cache hit");
                return Ok(ip);
            }
        }

        let ip = self.inner.resolve_one(name.clone()).await?;
        cache.set(record_type_of(&ip), name.as_str(), vec![ip], Duration::ZERO);
        Ok(ip)
    }
}

impl Resolve for CachingResolver {
    fn lookup_all(&self, network: Network, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move { resolver.lookup(network, name).await })
    }

    fn resolve_one(&self, name: Name) -> ResolvingOne {
        let resolver = self.clone();
        Box::pin(async move { resolver.lookup_one(name).await })
    }
}
