use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Connect canceled")]
    Canceled,
    #[error("Address invalid: {addr}")]
    AddressInvalid { addr: String },
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("HTTP/2 protocol error: {0}")]
    Http2ProtocolError(String),

    // Name Resolution Errors
    #[error("Name not resolved: no addresses found for {domain}")]
    NameNotResolved { domain: String },
    #[error("Name {domain} not resolved: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Name resolution failed for {domain}: {}", ErrorList(.errors))]
    NameResolutionFailed { domain: String, errors: Vec<NetError> },
    #[error("{domain} not found in hosts file")]
    NotInHosts { domain: String },
    #[error("Hosts file {} unreadable: {source}", .path.display())]
    HostsFile {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("No resolve options configured")]
    NoResolveOptions,
    #[error("HTTP/3 DNS transport unavailable")]
    Http3Unavailable,
    #[error("Invalid DNS name: {domain}")]
    InvalidName { domain: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("DNS transport to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
    #[error("DNS server {endpoint} answered {rcode}")]
    DnsResponse { endpoint: String, rcode: String },

    // Cache Persistence Errors
    #[error("DNS cache file {} I/O error: {source}", .path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("DNS cache file {} malformed: {message}", .path.display())]
    CacheFormat { path: PathBuf, message: String },
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionFailed => -104,
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved { .. } => -105,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::AddressInvalid { .. } => -108,
            NetError::SslProtocolError => -107,
            NetError::ConnectionTimedOut => -118,
            NetError::NameResolutionFailed { .. } => -137,
            NetError::InvalidUrl(_) => -300,
            NetError::Http2ProtocolError(_) => -337,
            NetError::Canceled => -3,
            // Resolution core codes (custom range starting at -1000)
            NetError::NotInHosts { .. } => -1000,
            NetError::HostsFile { .. } => -1001,
            NetError::NoResolveOptions => -1002,
            NetError::Http3Unavailable => -1003,
            NetError::InvalidName { .. } => -1004,
            NetError::Transport { .. } => -1005,
            NetError::DnsResponse { .. } => -1006,
            NetError::CacheIo { .. } => -1010,
            NetError::CacheFormat { .. } => -1011,
        }
    }

    /// Aggregates sub-query failures for `domain`.
    ///
    /// A single error is returned unchanged so callers keep the most
    /// specific diagnostic; an empty list becomes `NameNotResolved`.
    pub fn resolution_failed(domain: &str, mut errors: Vec<NetError>) -> Self {
        match errors.len() {
            0 => NetError::NameNotResolved {
                domain: domain.to_string(),
            },
            1 => errors.remove(0),
            _ => NetError::NameResolutionFailed {
                domain: domain.to_string(),
                errors,
            },
        }
    }

    pub fn connection_failed_to(host: &str, port: u16, source: io::Error) -> Self {
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            source: Arc::new(source),
        }
    }

    pub fn dns_failed(domain: &str, source: io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            source: Arc::new(source),
        }
    }

    pub fn cache_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        NetError::CacheIo {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

struct ErrorList<'a>(&'a [NetError]);

impl fmt::Display for ErrorList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}
