//! DNS message exchange with DoH endpoints.
//!
//! The resolution strategies only need "send this query to this endpoint,
//! get the answer back". [`DnsExchange`] is that seam. [`HttpsExchange`] is
//! the built-in RFC 8484 implementation (POST over HTTP/2 with BoringSSL).
//! With the `http3` feature, `h3` endpoints are served by
//! [`H3Exchange`](super::h3::H3Exchange); any other exchange can be
//! registered on [`Transports`] instead.

use super::option::{Alpn, ResolveOption};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::tls::TlsConfig;
use boring::ssl::SslConnector;
use bytes::Bytes;
use dashmap::DashMap;
use hickory_resolver::proto::op::Message;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Media type of DNS wire-format bodies (RFC 8484).
pub const DNS_MESSAGE: &str = "application/dns-message";

/// Default per-query timeout for HTTPS exchanges.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Alias for the `Future` type returned by [`DnsExchange::exchange`].
pub type Exchanging = Pin<Box<dyn Future<Output = Result<Message, NetError>> + Send>>;

/// Sends one DNS query to one endpoint.
pub trait DnsExchange: Send + Sync {
    fn exchange(&self, request: Message, endpoint: ResolveOption) -> Exchanging;
}

impl<E: DnsExchange + ?Sized> DnsExchange for Arc<E> {
    fn exchange(&self, request: Message, endpoint: ResolveOption) -> Exchanging {
        (**self).exchange(request, endpoint)
    }
}

pub(crate) fn transport_error(endpoint: &ResolveOption, message: impl fmt::Display) -> NetError {
    NetError::Transport {
        endpoint: endpoint.endpoint.to_string(),
        message: message.to_string(),
    }
}

/// The exchanges available to the DoH strategies.
#[derive(Clone)]
pub struct Transports {
    https: Arc<dyn DnsExchange>,
    http3: Option<Arc<dyn DnsExchange>>,
}

impl Transports {
    /// Uses `https` for every non-`h3` endpoint; `h3` endpoints stay unavailable
    /// until [`with_http3`](Self::with_http3) is called.
    pub fn new(https: Arc<dyn DnsExchange>) -> Self {
        Self { https, http3: None }
    }

    /// Built-in exchanges with default settings.
    pub fn https_default() -> Result<Self, NetError> {
        Self::with_config(TlsConfig::for_doh(), DEFAULT_QUERY_TIMEOUT)
    }

    /// Built-in exchanges: HTTPS always, HTTP/3 when the `http3` feature is
    /// enabled. Both share `timeout`.
    pub fn with_config(tls: TlsConfig, timeout: Duration) -> Result<Self, NetError> {
        let transports = Self::new(Arc::new(HttpsExchange::with_config(tls, timeout)?));
        #[cfg(feature = "http3")]
        let transports = {
            let h3 = super::h3::H3Exchange::with_timeout(timeout)?;
            transports.with_http3(Arc::new(h3))
        };
        Ok(transports)
    }

    pub fn with_http3(mut self, http3: Arc<dyn DnsExchange>) -> Self {
        self.http3 = Some(http3);
        self
    }

    pub fn https(&self) -> Arc<dyn DnsExchange> {
        self.https.clone()
    }

    pub fn http3(&self) -> Result<Arc<dyn DnsExchange>, NetError> {
        self.http3.clone().ok_or(NetError::Http3Unavailable)
    }

    /// Exchange serving endpoints with the given ALPN.
    pub fn for_alpn(&self, alpn: Alpn) -> Result<Arc<dyn DnsExchange>, NetError> {
        if alpn.is_h3() {
            self.http3()
        } else {
            Ok(self.https())
        }
    }
}

impl fmt::Debug for Transports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transports")
            .field("http3", &self.http3.is_some())
            .finish_non_exhaustive()
    }
}

/// DNS-over-HTTPS client over HTTP/2.
///
/// One HTTP/2 connection is kept per endpoint (URL plus pinned IPs) and
/// reused for concurrent queries; a closed connection is replaced on the
/// next query. Each exchange, connection setup included, is bounded by the
/// configured timeout.
#[derive(Clone)]
pub struct HttpsExchange {
    inner: Arc<HttpsInner>,
}

/// Per-endpoint connection slot. The lock is held while connecting, so
/// concurrent queries to a fresh endpoint share one handshake.
pub(crate) type Slot<T> = Arc<tokio::sync::Mutex<Option<T>>>;

/// Slots holding a connection, or locked because one is being set up.
pub(crate) fn live_slots<T>(slots: &DashMap<String, Slot<T>>) -> usize {
    slots
        .iter()
        .filter(|slot| slot.value().try_lock().map_or(true, |s| s.is_some()))
        .count()
}

struct HttpsInner {
    connector: SslConnector,
    timeout: Duration,
    senders: DashMap<String, Slot<SendRequest<Full<Bytes>>>>,
}

impl HttpsExchange {
    pub fn new() -> Result<Self, NetError> {
        Self::with_config(TlsConfig::for_doh(), DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_config(tls: TlsConfig, timeout: Duration) -> Result<Self, NetError> {
        Ok(Self {
            inner: Arc::new(HttpsInner {
                connector: tls.connector()?,
                timeout,
                senders: DashMap::new(),
            }),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Number of pooled HTTP/2 connections, including ones being set up.
    pub fn connection_count(&self) -> usize {
        live_slots(&self.inner.senders)
    }
}

impl fmt::Debug for HttpsExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsExchange")
            .field("timeout", &self.inner.timeout)
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl DnsExchange for HttpsExchange {
    fn exchange(&self, request: Message, endpoint: ResolveOption) -> Exchanging {
        let inner = self.inner.clone();
        Box::pin(async move {
            match tokio::time::timeout(inner.timeout, inner.round_trip(request, &endpoint)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        timeout = ?inner.timeout,
                        "DoH query timed out"
                    );
                    Err(NetError::ConnectionTimedOut)
                }
            }
        })
    }
}

impl HttpsInner {
    async fn round_trip(
        &self,
        request: Message,
        endpoint: &ResolveOption,
    ) -> Result<Message, NetError> {
        let body = request.to_vec().map_err(|e| transport_error(endpoint, e))?;
        let key = endpoint.to_string();
        let mut sender = self.sender_for(&key, endpoint).await?;

        let req = Request::builder()
            .method(Method::POST)
            .uri(endpoint.endpoint.as_str())
            .header(CONTENT_TYPE, DNS_MESSAGE)
            .header(ACCEPT, DNS_MESSAGE)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| NetError::InvalidUrl(e.to_string()))?;

        let response = match sender.ready().await {
            Ok(()) => sender.send_request(req).await,
            Err(e) => Err(e),
        };
        let response = response.map_err(|e| {
            self.senders.remove(&key);
            NetError::Http2ProtocolError(e.to_string())
        })?;

        if !response.status().is_success() {
            return Err(transport_error(endpoint, format!("HTTP status {}", response.status())));
        }

        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| NetError::Http2ProtocolError(e.to_string()))?
            .to_bytes();

        Message::from_vec(&bytes)
            .map_err(|e| transport_error(endpoint, format!("invalid DNS response: {e}")))
    }

    async fn sender_for(
        &self,
        key: &str,
        endpoint: &ResolveOption,
    ) -> Result<SendRequest<Full<Bytes>>, NetError> {
        let slot = self.senders.entry(key.to_string()).or_default().value().clone();
        let mut slot = slot.lock().await;
        if let Some(sender) = slot.as_ref().filter(|s| !s.is_closed()) {
            return Ok(sender.clone());
        }

        match self.connect(endpoint).await {
            Ok(sender) => {
                *slot = Some(sender.clone());
                Ok(sender)
            }
            Err(e) => {
                drop(slot);
                self.senders.remove(key);
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        endpoint: &ResolveOption,
    ) -> Result<SendRequest<Full<Bytes>>, NetError> {
        let host = endpoint.host();
        let port = endpoint.port();
        let addrs = endpoint.server_addrs().await?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => return self.handshake(endpoint, stream).await,
                Err(e) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        addr = %addr,
                        error = %e,
                        "DoH connect failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e).connection_context(host, port),
            None => Err(NetError::ConnectionFailed),
        }
    }

    async fn handshake(
        &self,
        endpoint: &ResolveOption,
        stream: TcpStream,
    ) -> Result<SendRequest<Full<Bytes>>, NetError> {
        let host = endpoint.host();
        let mut config = self.connector.configure().map_err(|_| NetError::SslProtocolError)?;
        config.set_use_server_name_indication(TlsConfig::should_set_sni(host));
        let tls = tokio_boring::connect(config, host, stream).await.map_err(|e| {
            tracing::debug!(endpoint = %endpoint, error = ?e, "DoH TLS handshake failed");
            NetError::SslProtocolError
        })?;

        let (sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(tls))
            .await
            .map_err(|e| NetError::Http2ProtocolError(e.to_string()))?;

        let label = endpoint.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(endpoint = %label, error = %e, "DoH connection closed");
            }
        });

        tracing::debug!(endpoint = %endpoint, "DoH connection established");
        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl DnsExchange for Echo {
        fn exchange(&self, request: Message, _endpoint: ResolveOption) -> Exchanging {
            Box::pin(async move { Ok(request) })
        }
    }

    #[test]
    fn test_transports_for_alpn() {
        let transports = Transports::new(Arc::new(Echo));
        assert!(transports.for_alpn(Alpn::Any).is_ok());
        assert!(transports.for_alpn(Alpn::H2).is_ok());
        assert!(matches!(transports.for_alpn(Alpn::H3), Err(NetError::Http3Unavailable)));

        let transports = transports.with_http3(Arc::new(Echo));
        assert!(transports.for_alpn(Alpn::H3).is_ok());
    }

    #[tokio::test]
    async fn test_arc_exchange_delegates() {
        let exchange: Arc<dyn DnsExchange> = Arc::new(Echo);
        let endpoint = ResolveOption::new("https://dns.example/dns-query").unwrap();
        let mut request = Message::new();
        request.set_id(0);
        let echoed = Arc::new(exchange).exchange(request, endpoint).await.unwrap();
        assert_eq!(echoed.id(), 0);
    }

    #[cfg(feature = "http3")]
    #[test]
    fn test_builtin_transports_serve_h3() {
        let transports = Transports::https_default().unwrap();
        assert!(transports.for_alpn(Alpn::H3).is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_one_connect() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Accepts and holds connections without ever answering the TLS handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        let exchange =
            HttpsExchange::with_config(TlsConfig::for_doh(), Duration::from_secs(10)).unwrap();
        let endpoint = ResolveOption::new(&format!("https://localhost:{port}/dns-query"))
            .unwrap()
            .with_pinned_ips("127.0.0.1")
            .unwrap();
        let queries: Vec<_> = (0..2)
            .map(|_| tokio::spawn(exchange.exchange(Message::new(), endpoint.clone())))
            .collect();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(exchange.connection_count(), 1);
        for query in queries {
            query.abort();
        }
    }

    #[tokio::test]
    async fn test_https_exchange_connect_refused() {
        // Nothing listens on the discard port of localhost in test environments.
        let exchange =
            HttpsExchange::with_config(TlsConfig::for_doh(), Duration::from_secs(5)).unwrap();
        let endpoint = ResolveOption::new("https://localhost:9/dns-query")
            .unwrap()
            .with_pinned_ips("127.0.0.1")
            .unwrap();

        let err = exchange.exchange(Message::new(), endpoint).await.unwrap_err();
        assert!(
            matches!(
                err,
                NetError::ConnectionFailedTo { port: 9, .. } | NetError::ConnectionTimedOut
            ),
            "unexpected error: {err:?}"
        );
        assert_eq!(exchange.connection_count(), 0);
    }
}
