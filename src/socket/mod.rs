//! Outbound connection establishment.
//!
//! - [`dial`]: resolve `host:port`, pick an address, connect, fall back to dialing by name
//! - [`priority`]: IPv4/IPv6 preference among resolved addresses
//! - [`tls`]: TLS configuration with BoringSSL for DoH connections

pub mod dial;
pub mod priority;
pub mod tls;

pub use dial::{split_host_port, DialTarget, Dialer, RawDial, TcpDialer};
pub use priority::{select_ip, IpPriority};
