//! Resolution-aware dialing.
//!
//! Resolves `host:port` through the hosts file and the configured DoH
//! options (optionally cached), picks one address by [`IpPriority`], and
//! connects. If resolution fails the original host is handed to the raw
//! dialer unchanged, so the system resolver gets the last word.

use super::priority::{select_ip, IpPriority};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::dns::cache::DnsCache;
use crate::dns::caching::CachingResolver;
use crate::dns::composite::HostsThenDohResolver;
use crate::dns::config::ResolverConfig;
use crate::dns::hosts::HostsResolver;
use crate::dns::name::Name;
use crate::dns::option::{ResolveOption, Shuffler};
use crate::dns::resolve::{Network, Resolve};
use crate::dns::transport::Transports;
use crate::socket::tls::TlsConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Where the raw dialer should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    Resolved(SocketAddr),
    /// Resolution failed; connect by name.
    Unresolved { host: String, port: u16 },
}

impl DialTarget {
    pub fn port(&self) -> u16 {
        match self {
            DialTarget::Resolved(addr) => addr.port(),
            DialTarget::Unresolved { port, .. } => *port,
        }
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialTarget::Resolved(addr) => write!(f, "{addr}"),
            DialTarget::Unresolved { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Opens the actual connection once a target is chosen.
pub trait RawDial: Send + Sync {
    type Conn: Send + 'static;

    fn dial(&self, target: DialTarget) -> BoxFuture<'static, io::Result<Self::Conn>>;
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl RawDial for TcpDialer {
    type Conn = TcpStream;

    fn dial(&self, target: DialTarget) -> BoxFuture<'static, io::Result<TcpStream>> {
        async move {
            match target {
                DialTarget::Resolved(addr) => TcpStream::connect(addr).await,
                DialTarget::Unresolved { host, port } => {
                    TcpStream::connect((host.as_str(), port)).await
                }
            }
        }
        .boxed()
    }
}

/// Splits `host:port`, accepting bracketed IPv6 (`[::1]:443`).
pub fn split_host_port(addr: &str) -> Result<(String, u16), NetError> {
    let invalid = || NetError::AddressInvalid {
        addr: addr.to_string(),
    };

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
        None if host.contains(':') => return Err(invalid()),
        None => host,
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// Dial orchestration: resolve, select, connect.
///
/// # Example
///
/// ```rust,ignore
/// let dialer = Dialer::new(Transports::https_default()?)
///     .options(options)
///     .cache(cache)
///     .priority(IpPriority::Ipv6First);
/// let stream = dialer.dial("example.com:443").await?;
/// ```
#[derive(Clone)]
pub struct Dialer<D = TcpDialer> {
    options: Vec<ResolveOption>,
    cache: Option<Arc<DnsCache>>,
    use_cache: bool,
    priority: IpPriority,
    transports: Transports,
    hosts: HostsResolver,
    shuffler: Shuffler,
    raw: D,
}

impl Dialer<TcpDialer> {
    pub fn new(transports: Transports) -> Self {
        Self {
            options: Vec::new(),
            cache: None,
            use_cache: true,
            priority: IpPriority::default(),
            transports,
            hosts: HostsResolver::new(),
            shuffler: Shuffler::new(),
            raw: TcpDialer,
        }
    }

    /// Builds a dialer with the built-in exchanges from `config`.
    pub fn from_config(
        config: &ResolverConfig,
        cache: Option<Arc<DnsCache>>,
    ) -> Result<Self, NetError> {
        let transports = Transports::with_config(TlsConfig::for_doh(), config.query_timeout)?;
        let mut dialer = Self::new(transports)
            .options(config.options.clone())
            .priority(config.ip_priority);
        if let Some(path) = &config.hosts_path {
            dialer = dialer.hosts(HostsResolver::with_path(path));
        }
        if let Some(cache) = cache {
            dialer = dialer.cache(cache);
        }
        Ok(dialer)
    }
}

impl<D: RawDial> Dialer<D> {
    pub fn options(mut self, options: Vec<ResolveOption>) -> Self {
        self.options = options;
        self
    }

    pub fn cache(mut self, cache: Arc<DnsCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Per-dialer switch; the cache is consulted only when this is set and
    /// the store itself is enabled.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn priority(mut self, priority: IpPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn transports(mut self, transports: Transports) -> Self {
        self.transports = transports;
        self
    }

    pub fn hosts(mut self, hosts: HostsResolver) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn shuffler(mut self, shuffler: Shuffler) -> Self {
        self.shuffler = shuffler;
        self
    }

    /// Replaces the connection layer, e.g. with a proxy-chained dialer.
    pub fn raw_dialer<R: RawDial>(self, raw: R) -> Dialer<R> {
        Dialer {
            options: self.options,
            cache: self.cache,
            use_cache: self.use_cache,
            priority: self.priority,
            transports: self.transports,
            hosts: self.hosts,
            shuffler: self.shuffler,
            raw,
        }
    }

    fn resolver(&self) -> Arc<dyn Resolve> {
        let composite = HostsThenDohResolver::new(
            self.hosts.clone(),
            self.options.clone(),
            self.transports.clone(),
        )
        .with_shuffler(self.shuffler.clone());

        match &self.cache {
            Some(cache) if self.use_cache && cache.is_enabled() => {
                Arc::new(CachingResolver::new(Arc::new(composite), Some(cache.clone())))
            }
            _ => Arc::new(composite),
        }
    }

    /// Chooses what to connect to for `addr`.
    ///
    /// Only a malformed address is an error; failed resolution yields
    /// [`DialTarget::Unresolved`].
    pub async fn resolve_target(&self, addr: &str) -> Result<DialTarget, NetError> {
        let (host, port) = split_host_port(addr)?;
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(DialTarget::Resolved(SocketAddr::new(ip, port)));
        }

        let resolved = match self.resolver().lookup_all(Network::Ip, Name::new(&host)).await {
            Ok(addrs) => select_ip(&addrs, self.priority, &self.shuffler),
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "resolution failed, dialing by name");
                None
            }
        };

        Ok(match resolved {
            Some(ip) => {
                tracing::debug!(
                    host = %host,
                    ip = %ip,
                    priority = %self.priority,
                    "resolved dial target"
                );
                DialTarget::Resolved(SocketAddr::new(ip, port))
            }
            None => DialTarget::Unresolved { host, port },
        })
    }

    pub async fn dial(&self, addr: &str) -> Result<D::Conn, NetError> {
        let target = self.resolve_target(addr).await?;
        self.connect(target).await
    }

    /// Like [`dial`](Self::dial), but the connect step aborts with
    /// `Canceled` once `token` fires.
    pub async fn dial_with_cancel(
        &self,
        addr: &str,
        token: CancellationToken,
    ) -> Result<D::Conn, NetError> {
        let target = self.resolve_target(addr).await?;
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(addr = %target, "dial canceled");
                Err(NetError::Canceled)
            }
            result = self.connect(target.clone()) => result,
        }
    }

    async fn connect(&self, target: DialTarget) -> Result<D::Conn, NetError> {
        let (host, port) = match &target {
            DialTarget::Resolved(addr) => (addr.ip().to_string(), addr.port()),
            DialTarget::Unresolved { host, port } => (host.clone(), *port),
        };
        let result = self.raw.dial(target).await;
        if let Err(e) = &result {
            tracing::debug!(host = %host, port, error = %e, "dial failed");
        }
        result.connection_context(&host, port)
    }
}

impl<D> fmt::Debug for Dialer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("options", &self.options.len())
            .field("cache", &self.cache.is_some())
            .field("use_cache", &self.use_cache)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
