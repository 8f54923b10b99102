//! # fwdproxy
//!
//! Name-resolution core of a forward proxy.
//!
//! `fwdproxy` turns a hostname into an address to dial without depending on
//! the OS resolver: the hosts file, DNS-over-HTTPS over HTTP/2 or HTTP/3,
//! or hosts-then-DoH with fallback, memoized in a TTL cache that survives
//! restarts through a JSON snapshot.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fwdproxy::dns::{CacheConfig, DnsCache, ResolverConfig};
//! use fwdproxy::socket::Dialer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fwdproxy::base::neterror::NetError> {
//!     let config = ResolverConfig::new().cache(CacheConfig::from_env());
//!     let cache = DnsCache::open(config.cache.clone());
//!     let dialer = Dialer::from_config(&config, Some(cache.clone()))?;
//!     let stream = dialer.dial("example.com:443").await?;
//!     cache.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and IO error context
//! - [`dns`] - Resolution strategies, DoH query fan-out, and the durable cache
//! - [`socket`] - Dial orchestration, IP family priority, and DoH TLS settings

pub mod base;
pub mod dns;
pub mod socket;
