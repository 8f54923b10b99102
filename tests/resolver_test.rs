//! Resolver Tests
//!
//! Covers:
//! - Fan-out aggregation with one failing and one succeeding endpoint
//! - `DohResolver` endpoint fallback in either order
//! - Error aggregation when every endpoint fails
//! - Diagnostics emitted through `tracing`
//! - `CachingResolver` over `HostsThenDohResolver`

use fwdproxy::base::neterror::NetError;
use fwdproxy::dns::{
    query_endpoint, CacheConfig, CachingResolver, DnsCache, DnsExchange, DohResolver, Exchanging,
    HostsResolver, HostsThenDohResolver, Name, Network, Resolve, ResolveOption, Shuffler,
    Transports,
};
use hickory_resolver::proto::op::{Message, MessageType, ResponseCode};
use hickory_resolver::proto::rr::rdata::{A, AAAA};
use hickory_resolver::proto::rr::{RData, Record, RecordType};
use std::collections::HashSet;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const GOOD_V4: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 80);
const GOOD_V6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x80);

/// Answers from `good.example` endpoints, fails everything else.
struct SplitExchange {
    calls: AtomicUsize,
}

impl SplitExchange {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl DnsExchange for SplitExchange {
    fn exchange(&self, request: Message, endpoint: ResolveOption) -> Exchanging {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if endpoint.host() != "good.example" {
                return Err(NetError::Transport {
                    endpoint: endpoint.endpoint.to_string(),
                    message: "connection reset".into(),
                });
            }
            let query = request.queries()[0].clone();
            let rdata = match query.query_type() {
                RecordType::AAAA => RData::AAAA(AAAA(GOOD_V6)),
                _ => RData::A(A(GOOD_V4)),
            };
            let mut response = Message::new();
            response.set_message_type(MessageType::Response);
            response.set_response_code(ResponseCode::NoError);
            response.add_answer(Record::from_rdata(query.name().clone(), 120, rdata));
            Ok(response)
        })
    }
}

fn endpoint(host: &str) -> ResolveOption {
    ResolveOption::new(&format!("https://{host}/dns-query")).unwrap()
}

fn good_set() -> HashSet<IpAddr> {
    HashSet::from([IpAddr::V4(GOOD_V4), IpAddr::V6(GOOD_V6)])
}

#[tokio::test]
async fn test_fanout_collects_answers_and_errors() {
    let exchange = SplitExchange::new();

    let good_endpoint = endpoint("good.example");
    let good = query_endpoint(exchange.clone(), "example.com", "A,AAAA", &good_endpoint).await;
    assert_eq!(good.answers.len(), 2);
    assert!(good.errors.is_empty());
    assert_eq!(good.addrs(Network::Ip).into_iter().collect::<HashSet<_>>(), good_set());

    let bad_endpoint = endpoint("bad.example");
    let bad = query_endpoint(exchange.clone(), "example.com", "A,AAAA", &bad_endpoint).await;
    assert!(bad.answers.is_empty());
    assert_eq!(bad.errors.len(), 2);

    let err = bad.into_addrs("example.com", Network::Ip).unwrap_err();
    match err {
        NetError::NameResolutionFailed { domain, errors } => {
            assert_eq!(domain, "example.com");
            assert_eq!(errors.len(), 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_fanout_multiple_domains() {
    let exchange = SplitExchange::new();
    let good = endpoint("good.example");
    let result = query_endpoint(exchange.clone(), "a.example, b.example,", "A", &good).await;
    assert_eq!(result.answers.len(), 2);
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_doh_fallback_in_either_order() {
    for order in [["bad.example", "good.example"], ["good.example", "bad.example"]] {
        let exchange = SplitExchange::new();
        let resolver = DohResolver::new(order.iter().map(|h| endpoint(h)).collect(), exchange)
            .with_shuffler(Shuffler::preserve_order());

        let addrs = resolver.lookup_all(Network::Ip, Name::new("example.com")).await.unwrap();
        assert_eq!(addrs.into_iter().collect::<HashSet<_>>(), good_set(), "order {order:?}");
    }
}

#[tokio::test]
async fn test_doh_all_endpoints_fail() {
    let endpoints = vec![endpoint("bad.example"), endpoint("worse.example")];
    let resolver = DohResolver::new(endpoints, SplitExchange::new());
    let err = resolver.lookup_all(Network::Ipv4, Name::new("example.com")).await.unwrap_err();
    match err {
        NetError::NameResolutionFailed { errors, .. } => assert_eq!(errors.len(), 2),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_failures_are_logged() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let resolver = DohResolver::new(vec![endpoint("bad.example")], SplitExchange::new());
    let _ = resolver.lookup_all(Network::Ipv4, Name::new("example.com")).await;

    let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("DoH endpoint failed"), "log output: {output}");
    assert!(output.contains("connection reset"), "log output: {output}");
}

#[tokio::test]
async fn test_cached_composite_serves_second_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = dir.path().join("hosts");
    std::fs::write(&hosts, "127.0.0.1 localhost\n").unwrap();
    let config = CacheConfig::new().enabled(true).path(dir.path().join("dns.json"));
    let store = Arc::new(DnsCache::new(config));

    let exchange = SplitExchange::new();
    let composite = HostsThenDohResolver::new(
        HostsResolver::with_path(&hosts),
        vec![endpoint("good.example")],
        Transports::new(exchange.clone()),
    );
    let resolver = CachingResolver::new(Arc::new(composite), Some(store.clone()));

    let first = resolver.lookup_all(Network::Ip, Name::new("example.com")).await.unwrap();
    let calls = exchange.calls.load(Ordering::SeqCst);
    let second = resolver.lookup_all(Network::Ip, Name::new("Example.com.")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(exchange.calls.load(Ordering::SeqCst), calls);
    assert_eq!(resolver.stats().hits, 2);
    assert!(store.get(RecordType::AAAA, "example.com").is_some());
}
