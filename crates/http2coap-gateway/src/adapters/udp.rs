//! Tokio UDP transport connected to the CoAP destination.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::info;

use crate::ports::outbound::CoapTransport;

/// UDP socket connected to one peer; datagrams from anyone else are
/// filtered by the kernel.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpTransport {
    /// Bind `local` (or the unspecified address of the destination's family)
    /// and connect to `destination`.
    pub async fn connect(destination: SocketAddr, local: Option<SocketAddr>) -> io::Result<Self> {
        let local = local.unwrap_or_else(|| unspecified_for(destination));
        let socket = UdpSocket::bind(local).await?;
        socket.connect(destination).await?;
        info!(
            local = %socket.local_addr()?,
            destination = %destination,
            "CoAP transport ready"
        );
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

fn unspecified_for(destination: SocketAddr) -> SocketAddr {
    let ip = match destination.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

#[async_trait]
impl CoapTransport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.send(datagram).await?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram write: {sent} of {} bytes", datagram.len()),
            ));
        }
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }
}
