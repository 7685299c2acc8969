//! In-memory transport for unit tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::ports::outbound::CoapTransport;

pub struct ChannelTransport {
    inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    fail_sends: Arc<AtomicBool>,
}

/// The far end of a `ChannelTransport`.
pub struct Peer {
    inbound: mpsc::Sender<Vec<u8>>,
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
    fail_sends: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, Peer) {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let fail_sends = Arc::new(AtomicBool::new(false));
        (
            Self {
                inbound: Mutex::new(in_rx),
                outbound: out_tx,
                fail_sends: Arc::clone(&fail_sends),
            },
            Peer {
                inbound: in_tx,
                sent: out_rx,
                fail_sends,
            },
        )
    }
}

#[async_trait]
impl CoapTransport for ChannelTransport {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let _ = self.outbound.send(datagram.to_vec());
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            }
            // Peer gone: behave like a silent network
            None => std::future::pending().await,
        }
    }
}

impl Peer {
    /// Deliver a datagram to the transport.
    pub async fn inject(&self, datagram: Vec<u8>) {
        self.inbound.send(datagram).await.unwrap();
    }

    /// Next datagram the transport sent; panics after two seconds.
    pub async fn next_sent(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(2), self.sent.recv())
            .await
            .expect("no datagram sent")
            .expect("transport dropped")
    }

    pub fn try_next_sent(&mut self) -> Option<Vec<u8>> {
        self.sent.try_recv().ok()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}
