//! Hosts file first, DNS-over-HTTPS second.

use super::doh::query_option;
use super::hosts::HostsResolver;
use super::name::Name;
use super::option::{ResolveOption, Shuffler};
use super::resolve::{Addrs, Network, Resolve, Resolving};
use super::transport::Transports;
use crate::base::neterror::NetError;
use std::sync::Arc;

/// Consults the hosts file, then each DoH option in shuffled order.
///
/// `h3` options go through the HTTP/3 exchange and query both families;
/// the rest use HTTPS with the record types implied by the network hint.
/// When everything fails the hosts error is returned, and the DoH errors
/// are only logged.
#[derive(Clone)]
pub struct HostsThenDohResolver {
    hosts: HostsResolver,
    options: Arc<[ResolveOption]>,
    transports: Transports,
    shuffler: Shuffler,
}

impl HostsThenDohResolver {
    pub fn new(hosts: HostsResolver, options: Vec<ResolveOption>, transports: Transports) -> Self {
        Self {
            hosts,
            options: options.into(),
            transports,
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

    async fn lookup_doh(
        &self,
        network: Network,
        name: &Name,
        option: &ResolveOption,
    ) -> Result<Addrs, NetError> {
        let exchange = self.transports.for_alpn(option.alpn)?;
        let record_types = if option.alpn.is_h3() {
            Network::Ip.record_types()
        } else {
            network.record_types()
        };
        query_option(exchange, name, record_types, network, option).await
    }

    pub async fn lookup(&self, network: Network, name: &Name) -> Result<Addrs, NetError> {
        let hosts_err = match self.hosts.lookup(name).await {
            Ok(addrs) => return Ok(addrs),
            Err(e) => e,
        };

        for option in self.shuffler.shuffled(&self.options) {
            match self.lookup_doh(network, name, &option).await {
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
                        "DoH fallback failed"
                    );
                }
            }
        }

        Err(hosts_err)
    }
}

impl Resolve for HostsThenDohResolver {
    fn lookup_all(&self, network: Network, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move { resolver.lookup(network, &name).await })
    }
}
