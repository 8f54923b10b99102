//! DNS-over-HTTPS over HTTP/3.
//!
//! RFC 8484 POST on an HTTP/3 request stream, carried by QUIC (quinn) with
//! rustls and the webpki root set. One QUIC connection and HTTP/3 session
//! is kept per endpoint and shared by concurrent queries.

use super::option::ResolveOption;
use super::transport::{
    live_slots, transport_error, DnsExchange, Exchanging, Slot, DEFAULT_QUERY_TIMEOUT, DNS_MESSAGE,
};
use crate::base::neterror::NetError;
use bytes::{Buf, Bytes};
use dashmap::DashMap;
use hickory_resolver::proto::op::Message;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

type H3Sender = h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>;

#[derive(Clone)]
struct Session {
    conn: quinn::Connection,
    sender: H3Sender,
}

impl Session {
    fn is_open(&self) -> bool {
        self.conn.close_reason().is_none()
    }
}

/// DNS-over-HTTPS client over HTTP/3.
///
/// The QUIC sockets are bound lazily on first use, one per address family.
#[derive(Clone)]
pub struct H3Exchange {
    inner: Arc<H3Inner>,
}

struct H3Inner {
    client_config: quinn::ClientConfig,
    timeout: Duration,
    v4: OnceCell<quinn::Endpoint>,
    v6: OnceCell<quinn::Endpoint>,
    sessions: DashMap<String, Slot<Session>>,
}

/// TLS 1.3 only, `h3` ALPN.
fn client_config() -> Result<quinn::ClientConfig, NetError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|_| NetError::SslProtocolError)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    crypto.alpn_protocols = vec![b"h3".to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|_| NetError::SslProtocolError)?;
    Ok(quinn::ClientConfig::new(Arc::new(quic)))
}

impl H3Exchange {
    pub fn new() -> Result<Self, NetError> {
        Self::with_timeout(DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, NetError> {
        Ok(Self {
            inner: Arc::new(H3Inner {
                client_config: client_config()?,
                timeout,
                v4: OnceCell::new(),
                v6: OnceCell::new(),
                sessions: DashMap::new(),
            }),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Number of pooled HTTP/3 sessions, including ones being set up.
    pub fn connection_count(&self) -> usize {
        live_slots(&self.inner.sessions)
    }
}

impl fmt::Debug for H3Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H3Exchange")
            .field("timeout", &self.inner.timeout)
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl DnsExchange for H3Exchange {
    fn exchange(&self, request: Message, endpoint: ResolveOption) -> Exchanging {
        let inner = self.inner.clone();
        Box::pin(async move {
            match tokio::time::timeout(inner.timeout, inner.round_trip(request, &endpoint)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        timeout = ?inner.timeout,
                        "DoH3 query timed out"
                    );
                    Err(NetError::ConnectionTimedOut)
                }
            }
        })
    }
}

impl H3Inner {
    async fn round_trip(
        &self,
        request: Message,
        endpoint: &ResolveOption,
    ) -> Result<Message, NetError> {
        let body = request.to_vec().map_err(|e| transport_error(endpoint, e))?;
        let key = endpoint.to_string();
        let mut session = self.session_for(&key, endpoint).await?;

        let req = Request::builder()
            .method(Method::POST)
            .uri(endpoint.endpoint.as_str())
            .header(CONTENT_TYPE, DNS_MESSAGE)
            .header(ACCEPT, DNS_MESSAGE)
            .body(())
            .map_err(|e| NetError::InvalidUrl(e.to_string()))?;

        let mut stream = match session.sender.send_request(req).await {
            Ok(stream) => stream,
            Err(e) => {
                self.sessions.remove(&key);
                return Err(transport_error(endpoint, format!("HTTP/3 request failed: {e}")));
            }
        };

        stream
            .send_data(Bytes::from(body))
            .await
            .map_err(|e| transport_error(endpoint, format!("HTTP/3 send failed: {e}")))?;
        stream
            .finish()
            .await
            .map_err(|e| transport_error(endpoint, format!("HTTP/3 send failed: {e}")))?;

        let response = stream
            .recv_response()
            .await
            .map_err(|e| transport_error(endpoint, format!("HTTP/3 response failed: {e}")))?;
        if !response.status().is_success() {
            return Err(transport_error(endpoint, format!("HTTP status {}", response.status())));
        }

        let mut bytes = Vec::new();
        while let Some(mut chunk) = stream
            .recv_data()
            .await
            .map_err(|e| transport_error(endpoint, format!("HTTP/3 body failed: {e}")))?
        {
            let remaining = chunk.remaining();
            bytes.extend_from_slice(&chunk.copy_to_bytes(remaining));
        }

        Message::from_vec(&bytes)
            .map_err(|e| transport_error(endpoint, format!("invalid DNS response: {e}")))
    }

    async fn session_for(&self, key: &str, endpoint: &ResolveOption) -> Result<Session, NetError> {
        let slot = self.sessions.entry(key.to_string()).or_default().value().clone();
        let mut slot = slot.lock().await;
        if let Some(session) = slot.as_ref().filter(|s| s.is_open()) {
            return Ok(session.clone());
        }

        match self.connect(endpoint).await {
            Ok(session) => {
                *slot = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                drop(slot);
                self.sessions.remove(key);
                Err(e)
            }
        }
    }

    async fn connect(&self, endpoint: &ResolveOption) -> Result<Session, NetError> {
        let mut last_err = None;
        for addr in endpoint.server_addrs().await? {
            match self.dial(endpoint, addr).await {
                Ok(conn) => return self.start_session(endpoint, conn).await,
                Err(e) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        addr = %addr,
                        error = %e,
                        "DoH3 connect failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(NetError::ConnectionFailed))
    }

    async fn dial(
        &self,
        endpoint: &ResolveOption,
        addr: SocketAddr,
    ) -> Result<quinn::Connection, NetError> {
        let (cell, bind) = if addr.is_ipv6() {
            (&self.v6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)))
        } else {
            (&self.v4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        };
        let socket = cell
            .get_or_try_init(|| async move {
                quinn::Endpoint::client(bind)
                    .map_err(|e| transport_error(endpoint, format!("QUIC bind {bind} failed: {e}")))
            })
            .await?;

        // Certificate checks use the unbracketed host, IP literals included.
        let connecting = socket
            .connect_with(self.client_config.clone(), addr, endpoint.host())
            .map_err(|e| transport_error(endpoint, format!("QUIC connect failed: {e}")))?;
        connecting
            .await
            .map_err(|e| transport_error(endpoint, format!("QUIC handshake failed: {e}")))
    }

    async fn start_session(
        &self,
        endpoint: &ResolveOption,
        conn: quinn::Connection,
    ) -> Result<Session, NetError> {
        let (mut driver, sender) = h3::client::new(h3_quinn::Connection::new(conn.clone()))
            .await
            .map_err(|e| transport_error(endpoint, format!("HTTP/3 handshake failed: {e}")))?;

        let label = endpoint.to_string();
        tokio::spawn(async move {
            let _ = futures::future::poll_fn(|cx| driver.poll_close(cx)).await;
            tracing::debug!(endpoint = %label, "DoH3 connection closed");
        });

        tracing::debug!(endpoint = %endpoint, "DoH3 connection established");
        Ok(Session { conn, sender })
    }
}
