//! Destination address resolution. Runs once at startup.

use std::net::SocketAddr;

use tokio::net::lookup_host;
use tracing::debug;

use crate::domain::error::ResolutionError;

/// Resolve `host:port` to one UDP destination.
///
/// An empty host means `localhost`. The first IPv4 or IPv6 result wins.
pub async fn resolve_destination(host: &str, port: u16) -> Result<SocketAddr, ResolutionError> {
    let host = if host.is_empty() { "localhost" } else { host };

    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|source| ResolutionError::Lookup {
            host: host.to_string(),
            source,
        })?;

    let addr = addrs
        .find(|a| a.is_ipv4() || a.is_ipv6())
        .ok_or_else(|| ResolutionError::NoUsableAddress {
            host: host.to_string(),
        })?;

    debug!(host = host, addr = %addr, "Resolved CoAP destination");
    Ok(addr)
}
