//! Target dialer: resolves a host the client requested and opens a TCP
//! connection to it.
//!
//! Grounded on the teacher's `dns-lookup` dependency (already in
//! `router-core`'s `Cargo.toml`) and its habit of disabling Nagle's
//! algorithm on every proxied socket (`app::proxy::ProxyApp::
//! optimize_tcp_socket`).

use std::net::{IpAddr, SocketAddr};

use dns_lookup::{lookup_host, AddrFamily};
use tokio::net::TcpStream;

use crate::error::GatewayError;

/// Resolves `host` (forcing IPv4 for literal/symbolic domains) and opens a
/// TCP connection to `host:port`, enabling `TCP_NODELAY` on success.
pub async fn dial(host: &str, port: u16) -> Result<TcpStream, GatewayError> {
    let ip = resolve_ipv4(host).await?;
    let addr = SocketAddr::new(ip, port);
    let stream = TcpStream::connect(addr)
        .await
        .map_err(GatewayError::DialFailure)?;
    // Best-effort: a failure to tune the socket never fails the dial itself.
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

async fn resolve_ipv4(host: &str) -> Result<IpAddr, GatewayError> {
    if let Ok(ip @ IpAddr::V4(_)) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let host = host.to_string();
    let resolved = tokio::task::spawn_blocking(move || {
        lookup_host_ipv4(&host)
    })
    .await
    .map_err(|e| GatewayError::AddressResolutionFailure(std::io::Error::other(e)))??;

    Ok(resolved)
}

fn lookup_host_ipv4(host: &str) -> Result<IpAddr, GatewayError> {
    let addrs = lookup_host(host).map_err(GatewayError::AddressResolutionFailure)?;
    addrs
        .into_iter()
        .find(|ip| matches!(ip, IpAddr::V4(_)))
        .ok_or_else(|| {
            GatewayError::AddressResolutionFailure(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no A record for host",
            ))
        })
}
