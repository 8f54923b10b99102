//! Core DNS resolution types and traits.
//!
//! This module defines the `Resolve` trait and supporting types that form
//! the foundation of the resolution layer.

use super::name::Name;
use crate::base::neterror::NetError;
use std::{future::Future, net::IpAddr, pin::Pin, str::FromStr, sync::Arc};

/// Resolved addresses. Order carries no meaning.
pub type Addrs = Vec<IpAddr>;

/// Alias for the `Future` type returned by [`Resolve::lookup_all`].
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, NetError>> + Send>>;

/// Alias for the `Future` type returned by [`Resolve::resolve_one`].
pub type ResolvingOne = Pin<Box<dyn Future<Output = Result<IpAddr, NetError>> + Send>>;

/// Address family hint, as carried by dial network names (`tcp4`, `udp6`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// Both families.
    #[default]
    Ip,
    /// IPv4 only (A records).
    Ipv4,
    /// IPv6 only (AAAA records).
    Ipv6,
}

impl Network {
    /// Parses a network name; anything not ending in `4` or `6` means both families.
    pub fn from_hint(hint: &str) -> Self {
        if hint.ends_with('6') {
            Network::Ipv6
        } else if hint.ends_with('4') {
            Network::Ipv4
        } else {
            Network::Ip
        }
    }

    /// Record types to query for this hint, comma separated.
    pub fn record_types(self) -> &'static str {
        match self {
            Network::Ip => "A,AAAA",
            Network::Ipv4 => "A",
            Network::Ipv6 => "AAAA",
        }
    }

    /// Whether `ip` belongs to this family.
    pub fn admits(self, ip: &IpAddr) -> bool {
        match self {
            Network::Ip => true,
            Network::Ipv4 => ip.is_ipv4(),
            Network::Ipv6 => ip.is_ipv6(),
        }
    }

    /// Keeps only the addresses admitted by this hint.
    pub fn filter(self, addrs: Addrs) -> Addrs {
        addrs.into_iter().filter(|ip| self.admits(ip)).collect()
    }
}

impl FromStr for Network {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Network::from_hint(s))
    }
}

/// Trait for name resolution.
///
/// Every strategy (hosts file, DoH, DoH3, composite) implements this, and
/// the caching decorator wraps any implementation. Implementations must be
/// thread-safe.
///
/// # Design Notes
///
/// - Uses `&self` for concurrent resolution without mutable access.
/// - Returns boxed `'static` futures for trait object compatibility;
///   implementations clone their (cheap, `Arc`-backed) state into the future.
pub trait Resolve: Send + Sync {
    /// Resolves all addresses for `name` admitted by `network`.
    fn lookup_all(&self, network: Network, name: Name) -> Resolving;

    /// Resolves a single address: the first of [`lookup_all`](Self::lookup_all).
    fn resolve_one(&self, name: Name) -> ResolvingOne {
        let lookup = self.lookup_all(Network::Ip, name.clone());
        Box::pin(async move {
            lookup.await?.into_iter().next().ok_or_else(|| NetError::NameNotResolved {
                domain: name.to_string(),
            })
        })
    }
}

/// Blanket implementation for Arc-wrapped resolvers.
impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn lookup_all(&self, network: Network, name: Name) -> Resolving {
        (**self).lookup_all(network, name)
    }

    fn resolve_one(&self, name: Name) -> ResolvingOne {
        (**self).resolve_one(name)
    }
}

/// Appends addresses from `extra` that are not already in `addrs`.
pub(crate) fn merge_unique(addrs: &mut Addrs, extra: impl IntoIterator<Item = IpAddr>) {
    for ip in extra {
        if !addrs.contains(&ip) {
            addrs.push(ip);
        }
    }
}
