//! Resolution options supplied by the routing layer, and the shuffling
//! applied before iterating them.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use url::{Host, Url};

/// Transport protocol requested for a DoH endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Alpn {
    /// No preference; served over HTTP/2.
    #[default]
    Any,
    /// HTTP/2.
    H2,
    /// HTTP/3 over QUIC.
    H3,
}

impl Alpn {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "h3" => Alpn::H3,
            "h2" => Alpn::H2,
            _ => Alpn::Any,
        }
    }

    pub fn is_h3(self) -> bool {
        self == Alpn::H3
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Alpn::Any => "",
            Alpn::H2 => "h2",
            Alpn::H3 => "h3",
        }
    }
}

/// One candidate DoH endpoint.
///
/// `pinned_ips` bypass bootstrap resolution of the endpoint host itself;
/// when empty, the transport resolves the URL host through the system.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawResolveOption")]
pub struct ResolveOption {
    pub endpoint: Url,
    pub pinned_ips: Vec<IpAddr>,
    pub alpn: Alpn,
}

#[derive(Deserialize)]
struct RawResolveOption {
    url: String,
    #[serde(default)]
    ip: String,
    #[serde(default)]
    alpn: String,
}

impl TryFrom<RawResolveOption> for ResolveOption {
    type Error = NetError;

    fn try_from(raw: RawResolveOption) -> Result<Self, Self::Error> {
        Ok(ResolveOption::new(&raw.url)?
            .with_pinned_ips(&raw.ip)?
            .with_alpn(Alpn::parse(&raw.alpn)))
    }
}

impl ResolveOption {
    /// Parses an endpoint URL such as `https://1.1.1.1/dns-query`.
    pub fn new(endpoint: &str) -> Result<Self, NetError> {
        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| NetError::InvalidUrl(format!("{endpoint}: {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(NetError::InvalidUrl(endpoint.to_string()));
        }
        Ok(Self {
            endpoint,
            pinned_ips: Vec::new(),
            alpn: Alpn::Any,
        })
    }

    /// Pins the endpoint to a comma-separated list of server IPs.
    pub fn with_pinned_ips(mut self, ips: &str) -> Result<Self, NetError> {
        self.pinned_ips = ips
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>().map_err(|_| NetError::AddressInvalid {
                    addr: s.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn with_alpn(mut self, alpn: Alpn) -> Self {
        self.alpn = alpn;
        self
    }

    /// Host of the endpoint URL, without the brackets of an IPv6 literal.
    ///
    /// This is the name used for SNI and certificate checks.
    pub fn host(&self) -> &str {
        let host = self.endpoint.host_str().unwrap_or_default();
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// The URL host, if it is an IP literal.
    pub fn host_ip(&self) -> Option<IpAddr> {
        match self.endpoint.host()? {
            Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
            Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
            Host::Domain(_) => None,
        }
    }

    /// Addresses to connect to: the pinned IPs, else a literal URL host,
    /// else whatever the system resolver returns for the host.
    pub async fn server_addrs(&self) -> Result<Vec<SocketAddr>, NetError> {
        let port = self.port();
        if !self.pinned_ips.is_empty() {
            return Ok(self.pinned_ips.iter().map(|ip| SocketAddr::new(*ip, port)).collect());
        }
        if let Some(ip) = self.host_ip() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }
        let host = self.host();
        Ok(tokio::net::lookup_host((host, port)).await.dns_context(host)?.collect())
    }

    /// Port of the endpoint URL (443 for `https` when omitted).
    pub fn port(&self) -> u16 {
        self.endpoint.port_or_known_default().unwrap_or(443)
    }
}

impl fmt::Display for ResolveOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)?;
        if !self.pinned_ips.is_empty() {
            let ips: Vec<String> = self.pinned_ips.iter().map(ToString::to_string).collect();
            write!(f, " @{}", ips.join(","))?;
        }
        if self.alpn != Alpn::Any {
            write!(f, " ({})", self.alpn.as_str())?;
        }
        Ok(())
    }
}

/// Randomizes trial order of options and candidate addresses.
///
/// Returns permuted copies; inputs are never reordered in place. A seeded
/// shuffler is reproducible, and [`Shuffler::preserve_order`] is a
/// deterministic stub for tests.
#[derive(Clone, Default)]
pub struct Shuffler {
    mode: ShuffleMode,
}

#[derive(Clone, Default)]
enum ShuffleMode {
    #[default]
    Thread,
    Seeded(Arc<Mutex<StdRng>>),
    Preserve,
}

impl Shuffler {
    /// Shuffles with the thread-local RNG.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reproducible shuffling from a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            mode: ShuffleMode::Seeded(Arc::new(Mutex::new(StdRng::seed_from_u64(seed)))),
        }
    }

    /// Keeps input order unchanged.
    pub fn preserve_order() -> Self {
        Self {
            mode: ShuffleMode::Preserve,
        }
    }

    /// Returns a permuted copy of `items`.
    pub fn shuffled<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let mut out = items.to_vec();
        match &self.mode {
            ShuffleMode::Thread => out.shuffle(&mut rand::rng()),
            ShuffleMode::Seeded(rng) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                out.shuffle(&mut *rng);
            }
            ShuffleMode::Preserve => {}
        }
        out
    }

    /// Picks one element after shuffling.
    pub fn pick<T: Clone>(&self, items: &[T]) -> Option<T> {
        self.shuffled(items).into_iter().next()
    }
}

impl fmt::Debug for Shuffler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            ShuffleMode::Thread => "thread",
            ShuffleMode::Seeded(_) => "seeded",
            ShuffleMode::Preserve => "preserve",
        };
        f.debug_struct("Shuffler").field("mode", &mode).finish()
    }
}
