use crate::base::neterror::NetError;
use boring::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode, SslVersion};

/// Client TLS settings for outbound DoH connections.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub min_version: Option<SslVersion>,
    pub max_version: Option<SslVersion>,
    pub alpn_protos: Vec<String>,
    pub verify_peer: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::for_doh()
    }
}

impl TlsConfig {
    /// TLS 1.2+ with `h2` as the only offered protocol (RFC 8484 requires HTTP/2 or later).
    pub fn for_doh() -> Self {
        Self {
            min_version: Some(SslVersion::TLS1_2),
            max_version: Some(SslVersion::TLS1_3),
            alpn_protos: vec!["h2".to_string()],
            verify_peer: true,
        }
    }

    /// Encodes `alpn_protos` in ALPN wire format (length-prefixed).
    pub fn alpn_wire(&self) -> Result<Vec<u8>, NetError> {
        let mut wire = Vec::new();
        for proto in &self.alpn_protos {
            if proto.is_empty() || proto.len() > 255 {
                return Err(NetError::SslProtocolError);
            }
            wire.push(proto.len() as u8);
            wire.extend_from_slice(proto.as_bytes());
        }
        Ok(wire)
    }

    /// Apply this configuration to an SSL connector builder.
    pub fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), NetError> {
        if let Some(min) = self.min_version {
            builder.set_min_proto_version(Some(min)).map_err(|_| NetError::SslProtocolError)?;
        }
        if let Some(max) = self.max_version {
            builder.set_max_proto_version(Some(max)).map_err(|_| NetError::SslProtocolError)?;
        }

        if !self.alpn_protos.is_empty() {
            builder.set_alpn_protos(&self.alpn_wire()?).map_err(|_| NetError::SslProtocolError)?;
        }

        builder.set_verify(if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        Ok(())
    }

    /// Builds a connector with this configuration applied.
    pub fn connector(&self) -> Result<SslConnector, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
        self.apply_to_builder(&mut builder)?;
        Ok(builder.build())
    }

    /// Check if SNI (Server Name Indication) should be set for this host.
    /// Per RFC 6066, SNI MUST NOT be set for raw IP addresses.
    pub fn should_set_sni(host: &str) -> bool {
        host.parse::<std::net::IpAddr>().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_wire() {
        let config = TlsConfig::for_doh();
        assert_eq!(config.alpn_wire().unwrap(), b"\x02h2".to_vec());

        let mut multi = TlsConfig::for_doh();
        multi.alpn_protos = vec!["h2".into(), "http/1.1".into()];
        assert_eq!(multi.alpn_wire().unwrap(), b"\x02h2\x08http/1.1".to_vec());
    }

    #[test]
    fn test_alpn_wire_rejects_empty_proto() {
        let mut config = TlsConfig::for_doh();
        config.alpn_protos = vec![String::new()];
        assert!(config.alpn_wire().is_err());
    }

    #[test]
    fn test_should_set_sni() {
        assert!(TlsConfig::should_set_sni("dns.google"));
        assert!(!TlsConfig::should_set_sni("8.8.8.8"));
        assert!(!TlsConfig::should_set_sni("2606:4700::1111"));
    }

    #[test]
    fn test_connector_builds() {
        assert!(TlsConfig::for_doh().connector().is_ok());
    }
}
