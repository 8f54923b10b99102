//! DNS-over-HTTPS resolvers.
//!
//! Both resolvers shuffle their endpoints and try them in turn; the first
//! endpoint that yields an address wins and later ones are never queried.

use super::fanout;
use super::name::Name;
use super::option::{ResolveOption, Shuffler};
use super::resolve::{Addrs, Network, Resolve, Resolving};
use super::transport::{DnsExchange, Transports};
use crate::base::neterror::NetError;
use std::sync::Arc;

/// Queries one endpoint and returns its addresses or its errors.
pub(crate) async fn query_option(
    exchange: Arc<dyn DnsExchange>,
    name: &Name,
    record_types: &str,
    network: Network,
    option: &ResolveOption,
) -> Result<Addrs, NetError> {
    fanout::query_endpoint(exchange, name.as_str(), record_types, option)
        .await
        .into_addrs(name.as_str(), network)
}

/// Tries each endpoint in order, collecting every failure.
async fn try_endpoints(
    exchange: Arc<dyn DnsExchange>,
    endpoints: Vec<ResolveOption>,
    name: &Name,
    record_types: &str,
    network: Network,
) -> Result<Addrs, NetError> {
    if endpoints.is_empty() {
        return Err(NetError::NoResolveOptions);
    }

    let mut errors = Vec::new();
    for option in &endpoints {
        match query_option(exchange.clone(), name, record_types, network, option).await {
            Ok(addrs) => {
                tracing::debug!(
                    domain = %name,
                    endpoint = %option,
                    count = addrs.len(),
                    "resolved via DoH"
                );
                return Ok(addrs);
            }
            Err(e) => {
                tracing::debug!(
                    domain = %name,
                    endpoint = %option,
                    error = %e,
                    "DoH endpoint failed"
                );
                errors.push(e);
            }
        }
    }

    Err(NetError::resolution_failed(name.as_str(), errors))
}

/// DoH over HTTP/2; ignores options that ask for `h3`.
#[derive(Clone)]
pub struct DohResolver {
    options: Arc<[ResolveOption]>,
    exchange: Arc<dyn DnsExchange>,
    shuffler: Shuffler,
}

impl DohResolver {
    pub fn new(options: Vec<ResolveOption>, exchange: Arc<dyn DnsExchange>) -> Self {
        let options: Vec<_> = options.into_iter().filter(|o| !o.alpn.is_h3()).collect();
        Self {
            options: options.into(),
            exchange,
            shuffler: Shuffler::new(),
        }
    }

    pub fn from_transports(options: Vec<ResolveOption>, transports: &Transports) -> Self {
        Self::new(options, transports.https())
    }

    pub fn with_shuffler(mut self, shuffler: Shuffler) -> Self {
        self.shuffler = shuffler;
        self
    }

    pub fn options(&self) -> &[ResolveOption] {
        &self.options
    }
}

impl Resolve for DohResolver {
    fn lookup_all(&self, network: Network, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let endpoints = resolver.shuffler.shuffled(&resolver.options);
            let record_types = network.record_types();
            try_endpoints(resolver.exchange, endpoints, &name, record_types, network).await
        })
    }
}

/// DoH over HTTP/3; only considers options that ask for `h3`.
///
/// Always asks for both A and AAAA, then filters by the requested family.
#[derive(Clone)]
pub struct Doh3Resolver {
    options: Arc<[ResolveOption]>,
    exchange: Option<Arc<dyn DnsExchange>>,
    shuffler: Shuffler,
}

impl Doh3Resolver {
    pub fn new(options: Vec<ResolveOption>, exchange: Arc<dyn DnsExchange>) -> Self {
        Self::with_optional_exchange(options, Some(exchange))
    }

    /// Without an HTTP/3 exchange every lookup fails with `Http3Unavailable`.
    pub fn from_transports(options: Vec<ResolveOption>, transports: &Transports) -> Self {
        Self::with_optional_exchange(options, transports.http3().ok())
    }

    fn with_optional_exchange(
        options: Vec<ResolveOption>,
        exchange: Option<Arc<dyn DnsExchange>>,
    ) -> Self {
        let options: Vec<_> = options.into_iter().filter(|o| o.alpn.is_h3()).collect();
        Self {
            options: options.into(),
            exchange,
            shuffler: Shuffler::new(),
        }
    }

    pub fn with_shuffler(mut self, shuffler: Shuffler) -> Self {
        self.shuffler = shuffler;
        self
    }

    pub fn options(&self) -> &[ResolveOption] {
        &self.options
    }
}

impl Resolve for Doh3Resolver {
    fn lookup_all(&self, network: Network, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            if resolver.options.is_empty() {
                return Err(NetError::NoResolveOptions);
            }
            let exchange = resolver.exchange.ok_or(NetError::Http3Unavailable)?;
            let endpoints = resolver.shuffler.shuffled(&resolver.options);
            try_endpoints(exchange, endpoints, &name, Network::Ip.record_types(), network).await
        })
    }
}
