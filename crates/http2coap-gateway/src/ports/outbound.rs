//! Outbound ports for the gateway.

use std::io;

use async_trait::async_trait;

/// Datagram transport to the single configured CoAP destination.
///
/// Only the dispatcher calls `recv`; `send` may be called from it alone as
/// well, so implementations need no internal ordering beyond the socket's.
#[async_trait]
pub trait CoapTransport: Send + Sync {
    /// Send one encoded PDU to the destination.
    async fn send(&self, datagram: &[u8]) -> io::Result<()>;

    /// Receive one datagram from the destination into `buf`.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}
