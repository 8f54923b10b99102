//! DNS Resolution Module
//!
//! Provides pluggable name resolution for outbound connections:
//! - Hosts-file lookup
//! - DNS-over-HTTPS over HTTP/2 and, with the `http3` feature, HTTP/3
//! - Hosts-then-DoH composite with ordered fallback
//! - A caching decorator backed by a durable, TTL-aware store
//!
//! # Architecture
//!
//! The `Resolve` trait is the core abstraction; every strategy implements
//! it and [`CachingResolver`] wraps any of them. DoH strategies send their
//! queries through [`fanout`], which talks to endpoints via the
//! [`DnsExchange`] seam.
//!
//! # Example
//!
//! ```rust,ignore
//! use fwdproxy::dns::{HostsResolver, HostsThenDohResolver, Name, Resolve, Transports};
//!
//! let transports = Transports::https_default()?;
//! let resolver = HostsThenDohResolver::new(HostsResolver::new(), options, transports);
//! let ip = resolver.resolve_one(Name::new("example.com")).await?;
//! ```

pub mod cache;
pub mod caching;
pub mod composite;
pub mod config;
pub mod doh;
pub mod fanout;
#[cfg(feature = "http3")]
pub mod h3;
pub mod hosts;
pub mod name;
pub mod option;
pub mod resolve;
pub mod transport;

pub use cache::{CacheKey, CacheValue, DnsCache};
pub use caching::{CacheStats, CachingResolver};
pub use composite::HostsThenDohResolver;
pub use config::{CacheConfig, ResolverConfig};
pub use doh::{Doh3Resolver, DohResolver};
pub use fanout::{query_endpoint, FanoutResult};
#[cfg(feature = "http3")]
pub use h3::H3Exchange;
pub use hosts::{parse_hosts, HostsResolver};
pub use name::{normalize_domain, Name};
pub use option::{Alpn, ResolveOption, Shuffler};
pub use resolve::{Addrs, Network, Resolve, Resolving, ResolvingOne};
pub use transport::{DnsExchange, Exchanging, HttpsExchange, Transports};
