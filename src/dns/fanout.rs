//! Concurrent query fan-out against a single DoH endpoint.
//!
//! One task is spawned per `(domain, record type)` pair. The call joins every
//! task before returning, so a slow sub-query delays the whole fan-out up to
//! the exchange's own timeout.

use super::name::normalize_domain;
use super::option::ResolveOption;
use super::resolve::{merge_unique, Addrs, Network};
use super::transport::{transport_error, DnsExchange};
use crate::base::neterror::NetError;
use hickory_resolver::proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_resolver::proto::rr::{Name as DnsName, RData, RecordType};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Answers and errors accumulated by one fan-out call.
#[derive(Debug, Default)]
pub struct FanoutResult {
    pub answers: Vec<Message>,
    pub errors: Vec<NetError>,
}

impl FanoutResult {
    /// Addresses from all answers, restricted to `network`.
    pub fn addrs(&self, network: Network) -> Addrs {
        network.filter(extract_ips(&self.answers))
    }

    /// Addresses, or the collected errors when none were obtained.
    pub fn into_addrs(self, domain: &str, network: Network) -> Result<Addrs, NetError> {
        let addrs = self.addrs(network);
        if !addrs.is_empty() {
            return Ok(addrs);
        }
        Err(NetError::resolution_failed(domain, self.errors))
    }
}

/// Builds a recursive query for `domain`.
///
/// The transaction id is fixed at 0 so HTTP caches in front of the
/// endpoint can serve repeated queries (RFC 8484 section 4.1).
pub fn build_query(domain: &str, record_type: RecordType) -> Result<Message, NetError> {
    let invalid = || NetError::InvalidName {
        domain: domain.to_string(),
    };
    let domain = normalize_domain(domain);
    if domain.is_empty() {
        return Err(invalid());
    }
    let name = DnsName::from_ascii(format!("{domain}.")).map_err(|_| invalid())?;

    let mut message = Message::new();
    message
        .set_id(0)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, record_type));
    Ok(message)
}

/// Collects A and AAAA answers; every other record type (CNAME, ...) is ignored.
pub fn extract_ips(messages: &[Message]) -> Addrs {
    let mut addrs = Vec::new();
    for message in messages {
        let ips = message.answers().iter().filter_map(|record| match record.data() {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        });
        merge_unique(&mut addrs, ips);
    }
    addrs
}

fn parse_record_types(record_types: &str) -> Vec<RecordType> {
    record_types
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter_map(|t| match RecordType::from_str(&t.to_ascii_uppercase()) {
            Ok(rt) => Some(rt),
            Err(_) => {
                tracing::warn!(record_type = t, "ignoring unknown record type");
                None
            }
        })
        .collect()
}

async fn query_one(
    exchange: Arc<dyn DnsExchange>,
    domain: String,
    record_type: RecordType,
    endpoint: ResolveOption,
) -> Result<Message, NetError> {
    let request = build_query(&domain, record_type)?;
    let response = exchange.exchange(request, endpoint.clone()).await?;

    let rcode = response.response_code();
    if rcode != ResponseCode::NoError {
        return Err(NetError::DnsResponse {
            endpoint: endpoint.endpoint.to_string(),
            rcode: format!("{rcode:?}"),
        });
    }

    tracing::debug!(
        domain = %domain,
        record_type = %record_type,
        endpoint = %endpoint,
        answers = response.answers().len(),
        "DoH query answered"
    );
    Ok(response)
}

/// Queries every `(domain, record type)` pair against `endpoint` concurrently.
///
/// `domains` and `record_types` are comma separated (`"example.com"`,
/// `"A,AAAA"`). Result order is unspecified.
pub async fn query_endpoint(
    exchange: Arc<dyn DnsExchange>,
    domains: &str,
    record_types: &str,
    endpoint: &ResolveOption,
) -> FanoutResult {
    let record_types = parse_record_types(record_types);
    let mut tasks = JoinSet::new();

    for domain in domains.split(',').map(normalize_domain).filter(|d| !d.is_empty()) {
        for &record_type in &record_types {
            tasks.spawn(query_one(exchange.clone(), domain.clone(), record_type, endpoint.clone()));
        }
    }

    let mut result = FanoutResult::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(message)) => result.answers.push(message),
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %endpoint, error = %e, "DoH query failed");
                result.errors.push(e);
            }
            Err(e) => {
                let message = format!("query task failed: {e}");
                result.errors.push(transport_error(endpoint, message));
            }
        }
    }
    result
}
