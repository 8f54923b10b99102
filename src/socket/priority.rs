//! Address family preference when a name resolves to several addresses.

use crate::dns::option::Shuffler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IpPriority {
    #[default]
    Ipv4First,
    Ipv6First,
    /// Any address of either family.
    Random,
}

impl IpPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            IpPriority::Ipv4First => "ipv4-first",
            IpPriority::Ipv6First => "ipv6-first",
            IpPriority::Random => "random",
        }
    }
}

impl fmt::Display for IpPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognized priority name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown IP priority: {0}")]
pub struct UnknownPriority(pub String);

impl FromStr for IpPriority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "ipv4-first" | "ipv4" => Ok(IpPriority::Ipv4First),
            "ipv6-first" | "ipv6" => Ok(IpPriority::Ipv6First),
            "random" => Ok(IpPriority::Random),
            _ => Err(UnknownPriority(s.to_string())),
        }
    }
}

/// Picks one address according to `priority`.
///
/// The preferred family is used when it has any address, otherwise the
/// other family; `Random` draws from all of them. The pick within the
/// chosen set is random.
pub fn select_ip(addrs: &[IpAddr], priority: IpPriority, shuffler: &Shuffler) -> Option<IpAddr> {
    let (v4, v6): (Vec<IpAddr>, Vec<IpAddr>) = addrs.iter().copied().partition(|ip| ip.is_ipv4());

    let candidates = match priority {
        IpPriority::Ipv4First if !v4.is_empty() => v4,
        IpPriority::Ipv4First => v6,
        IpPriority::Ipv6First if !v6.is_empty() => v6,
        IpPriority::Ipv6First => v4,
        IpPriority::Random => addrs.to_vec(),
    };
    shuffler.pick(&candidates)
}
