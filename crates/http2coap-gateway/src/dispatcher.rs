//! The single owner of the CoAP socket's read side and the retransmission
//! queue.
//!
//! Exchanges never read the socket. They hand their encoded request to the
//! dispatcher and wait on a oneshot registered in the correlation table; the
//! dispatcher decodes every inbound datagram and wakes exactly the exchange
//! it belongs to.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::adapters::codec;
use crate::adapters::retransmit::{Due, RetransmitQueue, TransmissionParams};
use crate::domain::correlation::{CorrelationTable, MatchOrder};
use crate::domain::message::{CoapResponse, MessageId, MessageType};
use crate::middleware::metrics::GatewayMetrics;
use crate::ports::outbound::CoapTransport;

/// Requests from exchanges to the dispatcher.
#[derive(Debug)]
pub enum DispatchCommand {
    /// Send a confirmable request and track it for retransmission
    Send {
        message_id: MessageId,
        datagram: Vec<u8>,
        sent: oneshot::Sender<io::Result<()>>,
    },
    /// Stop retransmitting `message_id`
    Cancel { message_id: MessageId },
}

/// Cloneable sender side of the dispatcher's command channel.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    commands: mpsc::Sender<DispatchCommand>,
}

impl DispatcherHandle {
    /// Send `datagram` and wait until it left the socket.
    pub async fn send(&self, message_id: MessageId, datagram: Vec<u8>) -> io::Result<()> {
        let (sent, rx) = oneshot::channel();
        self.commands
            .send(DispatchCommand::Send {
                message_id,
                datagram,
                sent,
            })
            .await
            .map_err(|_| dispatcher_gone())?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    /// Best-effort cancel; never blocks. A full queue only means the entry
    /// retransmits until its retry budget runs out.
    pub fn cancel(&self, message_id: MessageId) {
        if self
            .commands
            .try_send(DispatchCommand::Cancel { message_id })
            .is_err()
        {
            debug!(message_id = %message_id, "Cancel not queued");
        }
    }
}

fn dispatcher_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "CoAP dispatcher stopped")
}

pub struct Dispatcher {
    transport: Arc<dyn CoapTransport>,
    table: Arc<CorrelationTable>,
    metrics: Arc<GatewayMetrics>,
    queue: RetransmitQueue,
    commands: mpsc::Receiver<DispatchCommand>,
    shutdown: watch::Receiver<bool>,
    max_datagram: usize,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn CoapTransport>,
        table: Arc<CorrelationTable>,
        metrics: Arc<GatewayMetrics>,
        params: TransmissionParams,
        max_datagram: usize,
        queue_depth: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let dispatcher = Self {
            transport,
            table,
            metrics,
            queue: RetransmitQueue::new(params),
            commands: rx,
            shutdown,
            max_datagram,
        };
        (dispatcher, DispatcherHandle { commands: tx })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown is signalled or every handle is dropped.
    pub async fn run(mut self) {
        let mut buf = vec![0u8; self.max_datagram];
        info!(max_datagram = self.max_datagram, "CoAP dispatcher started");

        loop {
            let deadline = self.queue.next_deadline();

            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                received = self.transport.recv(&mut buf) => match received {
                    Ok(len) => self.handle_datagram(&buf[..len]).await,
                    Err(e) => warn!(error = %e, "CoAP receive failed"),
                },

                _ = sleep_until_opt(deadline) => self.retransmit_due().await,
            }
        }

        info!(outstanding = self.queue.len(), "CoAP dispatcher stopped");
    }

    async fn handle_command(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::Send {
                message_id,
                datagram,
                sent,
            } => {
                let result = self.transport.send(&datagram).await;
                match &result {
                    Ok(()) => {
                        self.metrics.record_coap_sent();
                        debug!(message_id = %message_id, bytes = datagram.len(), "CoAP request sent");
                        self.queue.push(message_id, datagram, Instant::now());
                    }
                    Err(e) => {
                        error!(message_id = %message_id, error = %e, "CoAP send failed");
                    }
                }
                // The exchange may already be gone; nothing to do then
                let _ = sent.send(result);
            }
            DispatchCommand::Cancel { message_id } => {
                if self.queue.cancel(message_id) {
                    debug!(message_id = %message_id, "Retransmission cancelled");
                }
            }
        }
    }

    async fn retransmit_due(&mut self) {
        for due in self.queue.pop_due(Instant::now()) {
            match due {
                Due::Retransmit {
                    message_id,
                    datagram,
                    attempt,
                } => {
                    debug!(message_id = %message_id, attempt = attempt, "Retransmitting CoAP request");
                    self.metrics.record_retransmission();
                    if let Err(e) = self.transport.send(&datagram).await {
                        warn!(message_id = %message_id, error = %e, "Retransmission failed");
                    }
                }
                Due::GaveUp { message_id } => {
                    self.metrics.record_retransmit_exhausted();
                    warn!(message_id = %message_id, "Retransmission budget exhausted");
                }
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8]) {
        self.metrics.record_datagram();

        let message = match codec::decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_garbled();
                warn!(bytes = datagram.len(), error = %e, "Dropping undecodable datagram");
                return;
            }
        };

        debug!(
            message_id = %message.message_id,
            token = %message.token,
            code = %message.code,
            message_type = ?message.message_type,
            "CoAP datagram received"
        );

        if matches!(
            message.message_type,
            MessageType::Acknowledgement | MessageType::Reset
        ) && self.queue.acknowledge(message.message_id)
        {
            debug!(message_id = %message.message_id, "Retransmission stopped");
        }

        if message.message_type == MessageType::Reset {
            warn!(message_id = %message.message_id, "Peer reset the request");
            return;
        }

        if message.code.is_empty() {
            if message.message_type == MessageType::Confirmable {
                // CoAP ping
                self.send_reset(message.message_id).await;
            } else {
                debug!(message_id = %message.message_id, "Empty ACK, separate response follows");
            }
            return;
        }

        if !message.code.is_response() {
            if message.code.is_request() {
                debug!(message_id = %message.message_id, code = %message.code, "Peer request not served here");
            } else {
                warn!(message_id = %message.message_id, code = %message.code, "Reserved code class from peer");
            }
            if message.message_type == MessageType::Confirmable {
                self.send_reset(message.message_id).await;
            }
            return;
        }

        let order = match message.message_type {
            MessageType::Acknowledgement => MatchOrder::IdThenToken,
            MessageType::Confirmable => {
                self.send_ack(message.message_id).await;
                MatchOrder::TokenThenId
            }
            _ => MatchOrder::TokenThenId,
        };

        self.deliver(message, order);
    }

    fn deliver(&self, message: CoapResponse, order: MatchOrder) {
        // Unmatched traffic is counted and logged by the table
        self.table.complete(message, order);
    }

    async fn send_ack(&self, message_id: MessageId) {
        match codec::empty_ack(message_id) {
            Ok(ack) => match self.transport.send(&ack).await {
                Ok(()) => self.metrics.record_ack_sent(),
                Err(e) => warn!(message_id = %message_id, error = %e, "Failed to ACK separate response"),
            },
            Err(e) => warn!(message_id = %message_id, error = %e, "Failed to encode ACK"),
        }
    }

    async fn send_reset(&self, message_id: MessageId) {
        match codec::reset(message_id) {
            Ok(rst) => match self.transport.send(&rst).await {
                Ok(()) => self.metrics.record_reset_sent(),
                Err(e) => warn!(message_id = %message_id, error = %e, "Failed to send RST"),
            },
            Err(e) => warn!(message_id = %message_id, error = %e, "Failed to encode RST"),
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
