//! Resolve hostnames through the cached hosts-then-DoH chain.
//!
//! Usage: `cargo run --example resolve -- example.com rust-lang.org`
//!
//! The cache snapshot is read on startup and written on exit, so a second
//! run answers from the cache. Set `RUST_LOG=fwdproxy=debug` to watch it.

use fwdproxy::dns::{
    CacheConfig, CachingResolver, DnsCache, HostsResolver, HostsThenDohResolver, Name, Network,
    Resolve, ResolveOption, Transports,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let names: Vec<String> = std::env::args().skip(1).collect();
    let names = if names.is_empty() { vec!["example.com".to_string()] } else { names };

    let options = vec![
        ResolveOption::new("https://cloudflare-dns.com/dns-query")?
            .with_pinned_ips("1.1.1.1,1.0.0.1")?,
        ResolveOption::new("https://dns.google/dns-query")?.with_pinned_ips("8.8.8.8,8.8.4.4")?,
    ];

    let cache = DnsCache::open(CacheConfig::from_env().enabled(true));
    let transports = Transports::https_default()?;
    let composite = HostsThenDohResolver::new(HostsResolver::new(), options, transports);
    let resolver = CachingResolver::new(Arc::new(composite), Some(cache.clone()));

    for name in &names {
        match resolver.lookup_all(Network::Ip, Name::new(name)).await {
            Ok(addrs) => {
                println!("{name}:");
                for addr in addrs {
                    println!("  {addr}");
                }
            }
            Err(e) => println!("{name}: {e} (code {})", e.as_i32()),
        }
    }

    let stats = resolver.stats();
    println!("cache: {} hits, {} misses, {} entries", stats.hits, stats.misses, stats.entries);

    let saved = cache.shutdown().await?;
    println!("saved {saved} entries to {}", cache.config().path.display());
    Ok(())
}
