//! Hosts-file resolver.
//!
//! Reads the platform hosts file on every lookup, so edits take effect
//! without a restart.

use super::name::{normalize_domain, Name};
use super::resolve::{merge_unique, Network, Resolve, Resolving};
use crate::base::neterror::NetError;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Location of the system hosts file for the current platform.
pub fn default_hosts_path() -> PathBuf {
    if cfg!(windows) {
        let root = std::env::var_os("SystemRoot").unwrap_or_else(|| "C:\\Windows".into());
        PathBuf::from(root).join("System32").join("drivers").join("etc").join("hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/// Parses hosts-file text into a domain -> IP-literal multimap.
///
/// Domains are normalized. Repeated domains append in file order. Lines whose
/// first field is not an IP literal are ignored.
pub fn parse_hosts(text: &str) -> HashMap<String, Vec<String>> {
    let mut hosts: HashMap<String, Vec<String>> = HashMap::new();

    for line in text.lines() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let mut fields = line.split_whitespace();
        let Some(ip) = fields.next() else {
            continue;
        };
        // Zone suffixes (fe80::1%lo0) are not dialable from here.
        if ip.parse::<IpAddr>().is_err() {
            continue;
        }
        for domain in fields {
            let domain = normalize_domain(domain);
            if domain.is_empty() {
                continue;
            }
            hosts.entry(domain).or_default().push(ip.to_string());
        }
    }

    hosts
}

/// Resolves names from the hosts file only.
#[derive(Debug, Clone)]
pub struct HostsResolver {
    path: Arc<Path>,
}

impl Default for HostsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostsResolver {
    /// Resolver over the platform hosts file.
    pub fn new() -> Self {
        Self::with_path(default_hosts_path())
    }

    /// Resolver over an explicit hosts file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::from(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks `name` up, returning every literal listed for it.
    ///
    /// A hosts entry pins the name, so both families come back whatever the
    /// caller asked for.
    pub async fn lookup(&self, name: &Name) -> Result<Vec<IpAddr>, NetError> {
        let text = tokio::fs::read_to_string(&*self.path).await.map_err(|e| NetError::HostsFile {
            path: self.path.to_path_buf(),
            source: Arc::new(e),
        })?;

        let hosts = parse_hosts(&text);
        let mut addrs = Vec::new();
        if let Some(ips) = hosts.get(name.as_str()) {
            merge_unique(&mut addrs, ips.iter().filter_map(|ip| ip.parse::<IpAddr>().ok()));
        }

        if addrs.is_empty() {
            tracing::debug!(domain = %name, path = %self.path.display(), "not in hosts file");
            return Err(NetError::NotInHosts {
                domain: name.to_string(),
            });
        }

        tracing::debug!(domain = %name, count = addrs.len(), "resolved from hosts file");
        Ok(addrs)
    }
}

impl Resolve for HostsResolver {
    fn lookup_all(&self, _network: Network, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move { resolver.lookup(&name).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
# comment line
127.0.0.1   localhost
::1         localhost ip6-localhost
10.0.0.5    Build.Internal.  build   # trailing comment
10.0.0.6    build.internal
not-an-ip   broken.example
fe80::1%lo0 zoned.example
";

    fn hosts_file(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_hosts_appends() {
        let hosts = parse_hosts(SAMPLE);
        assert_eq!(hosts["build.internal"], vec!["10.0.0.5", "10.0.0.6"]);
        assert_eq!(hosts["localhost"], vec!["127.0.0.1", "::1"]);
        assert_eq!(hosts["build"], vec!["10.0.0.5"]);
        assert!(!hosts.contains_key("broken.example"));
        assert!(!hosts.contains_key("zoned.example"));
    }

    #[test]
    fn test_default_hosts_path() {
        let path = default_hosts_path();
        if cfg!(windows) {
            assert!(path.ends_with("drivers/etc/hosts") || path.ends_with("drivers\\etc\\hosts"));
        } else {
            assert_eq!(path, PathBuf::from("/etc/hosts"));
        }
    }

    #[tokio::test]
    async fn test_hosts_lookup_all() {
        let file = hosts_file(SAMPLE);
        let resolver = HostsResolver::with_path(file.path());

        let addrs = resolver.lookup_all(Network::Ip, Name::new("BUILD.internal.")).await.unwrap();
        assert_eq!(
            addrs,
            vec![
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6))
            ]
        );

        let localhost = resolver.lookup_all(Network::Ipv6, Name::new("localhost")).await.unwrap();
        assert_eq!(
            localhost,
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)]
        );
    }

    #[tokio::test]
    async fn test_hosts_ignores_family_hint() {
        let file = hosts_file(SAMPLE);
        let resolver = HostsResolver::with_path(file.path());

        // An IPv4-only entry still answers an IPv6 query.
        let addrs = resolver.lookup_all(Network::Ipv6, Name::new("build")).await.unwrap();
        assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))]);
    }

    #[tokio::test]
    async fn test_hosts_miss() {
        let file = hosts_file(SAMPLE);
        let resolver = HostsResolver::with_path(file.path());

        let err = resolver.resolve_one(Name::new("missing.example")).await.unwrap_err();
        assert!(matches!(err, NetError::NotInHosts { .. }));
    }

    #[tokio::test]
    async fn test_hosts_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = HostsResolver::with_path(dir.path().join("absent"));
        let err = resolver.resolve_one(Name::new("localhost")).await.unwrap_err();
        assert!(matches!(err, NetError::HostsFile { .. }));
    }
}
