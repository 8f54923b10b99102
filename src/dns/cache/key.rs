use crate::dns::name::normalize_domain;
use hickory_resolver::proto::rr::RecordType;
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Cache key: record type plus normalized domain.
///
/// Rendered as `TYPE:domain` (`A:example.com`) in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub record_type: RecordType,
    pub domain: String,
}

impl CacheKey {
    pub fn new(record_type: RecordType, domain: &str) -> Self {
        Self {
            record_type,
            domain: normalize_domain(domain),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.record_type, self.domain)
    }
}

/// Error returned when a snapshot key cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cache key: {0}")]
pub struct InvalidKey(pub String);

impl FromStr for CacheKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidKey(s.to_string());
        let (record_type, domain) = s.split_once(':').ok_or_else(invalid)?;
        let record_type = RecordType::from_str(&record_type.trim().to_ascii_uppercase())
            .map_err(|_| invalid())?;
        if let RecordType::Unknown(_) = record_type {
            return Err(invalid());
        }
        let key = CacheKey::new(record_type, domain);
        if key.domain.is_empty() {
            return Err(invalid());
        }
        Ok(key)
    }
}

/// A cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Resolved addresses (A/AAAA).
    Addrs(Vec<IpAddr>),
    /// Free-form text (CNAME target, TXT data).
    Text(String),
    /// Anything else.
    Json(Value),
}

impl CacheValue {
    pub fn as_addrs(&self) -> Option<&[IpAddr]> {
        match self {
            CacheValue::Addrs(addrs) => Some(addrs),
            _ => None,
        }
    }

    /// Snapshot form: address lists become arrays of literals.
    pub fn to_json(&self) -> Value {
        match self {
            CacheValue::Addrs(addrs) => {
                Value::Array(addrs.iter().map(|ip| Value::String(ip.to_string())).collect())
            }
            CacheValue::Text(text) => Value::String(text.clone()),
            CacheValue::Json(value) => value.clone(),
        }
    }

    /// Inverse of [`to_json`](Self::to_json). A non-empty array made only of
    /// address literals is read back as [`CacheValue::Addrs`].
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => CacheValue::Text(text),
            Value::Array(items) if !items.is_empty() => {
                let addrs: Option<Vec<IpAddr>> = items
                    .iter()
                    .map(|item| item.as_str().and_then(|s| s.parse().ok()))
                    .collect();
                match addrs {
                    Some(addrs) => CacheValue::Addrs(addrs),
                    None => CacheValue::Json(Value::Array(items)),
                }
            }
            other => CacheValue::Json(other),
        }
    }
}

impl From<Vec<IpAddr>> for CacheValue {
    fn from(addrs: Vec<IpAddr>) -> Self {
        CacheValue::Addrs(addrs)
    }
}

impl From<String> for CacheValue {
    fn from(text: String) -> Self {
        CacheValue::Text(text)
    }
}

impl From<&str> for CacheValue {
    fn from(text: &str) -> Self {
        CacheValue::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_key_normalizes() {
        let a = CacheKey::new(RecordType::A, "example.com.");
        let b = CacheKey::new(RecordType::A, "EXAMPLE.COM");
        let c = CacheKey::new(RecordType::A, " example.com ");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_ne!(a, CacheKey::new(RecordType::AAAA, "example.com"));
    }

    #[test]
    fn test_key_display_parse() {
        let key = CacheKey::new(RecordType::AAAA, "Example.com");
        assert_eq!(key.to_string(), "AAAA:example.com");
        assert_eq!("AAAA:example.com".parse::<CacheKey>().unwrap(), key);
        let key: CacheKey = "cname:www.example.com".parse().unwrap();
        assert_eq!(key.record_type, RecordType::CNAME);
    }

    #[test]
    fn test_key_parse_rejects() {
        assert!("example.com".parse::<CacheKey>().is_err());
        assert!("BOGUS:example.com".parse::<CacheKey>().is_err());
        assert!("A:".parse::<CacheKey>().is_err());

        let err = "BOGUS:example.com".parse::<CacheKey>().unwrap_err();
        assert_eq!(err.to_string(), "invalid cache key: BOGUS:example.com");
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn test_value_json() {
        let addrs = CacheValue::Addrs(vec![
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ]);
        assert_eq!(addrs.to_json(), json!(["93.184.216.34", "::1"]));
        assert_eq!(CacheValue::from_json(addrs.to_json()), addrs);

        assert_eq!(
            CacheValue::from_json(json!("alias.example")),
            CacheValue::Text("alias.example".into())
        );
        assert_eq!(
            CacheValue::from_json(json!(["v=spf1", "-all"])),
            CacheValue::Json(json!(["v=spf1", "-all"]))
        );
        assert_eq!(
            CacheValue::from_json(json!({"pref": 10})),
            CacheValue::Json(json!({"pref": 10}))
        );
    }
}
