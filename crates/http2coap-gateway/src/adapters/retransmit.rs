//! Confirmable-message retransmission queue (RFC 7252 §4.2).
//!
//! The first timeout is drawn uniformly from
//! `[ACK_TIMEOUT, ACK_TIMEOUT * ACK_RANDOM_FACTOR]` and doubles after every
//! retransmission. After `MAX_RETRANSMIT` retransmissions the entry is
//! dropped; the exchange itself keeps waiting until its own deadline.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::domain::config::TimeoutConfig;
use crate::domain::message::MessageId;

/// CoAP transmission parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionParams {
    pub ack_timeout: Duration,
    pub ack_random_factor: f64,
    pub max_retransmit: u32,
}

impl Default for TransmissionParams {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
        }
    }
}

impl TransmissionParams {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout,
            ack_random_factor: config.ack_random_factor,
            max_retransmit: config.max_retransmit,
        }
    }

    pub fn initial_timeout(&self) -> Duration {
        let low = self.ack_timeout.as_secs_f64();
        let high = low * self.ack_random_factor.max(1.0);
        Duration::from_secs_f64(rand::thread_rng().gen_range(low..=high))
    }
}

/// What `pop_due` wants the caller to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Due {
    /// Send this datagram again
    Retransmit {
        message_id: MessageId,
        datagram: Vec<u8>,
        attempt: u32,
    },
    /// Retry budget spent; entry removed
    GaveUp { message_id: MessageId },
}

#[derive(Debug)]
struct Outstanding {
    message_id: MessageId,
    datagram: Vec<u8>,
    due: Instant,
    timeout: Duration,
    retransmissions: u32,
}

#[derive(Debug)]
pub struct RetransmitQueue {
    params: TransmissionParams,
    outstanding: Vec<Outstanding>,
}

impl RetransmitQueue {
    pub fn new(params: TransmissionParams) -> Self {
        Self {
            params,
            outstanding: Vec::new(),
        }
    }

    /// Track a confirmable message that was just sent at `now`.
    /// A message id already queued is replaced.
    pub fn push(&mut self, message_id: MessageId, datagram: Vec<u8>, now: Instant) {
        self.outstanding.retain(|o| o.message_id != message_id);
        let timeout = self.params.initial_timeout();
        self.outstanding.push(Outstanding {
            message_id,
            datagram,
            due: now + timeout,
            timeout,
            retransmissions: 0,
        });
    }

    /// ACK or RST seen for `message_id`.
    pub fn acknowledge(&mut self, message_id: MessageId) -> bool {
        self.remove(message_id)
    }

    /// Exchange finished or abandoned.
    pub fn cancel(&mut self, message_id: MessageId) -> bool {
        self.remove(message_id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.outstanding.iter().map(|o| o.due).min()
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Everything due at `now`: retransmissions to send and entries given up.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Due> {
        let max_retransmit = self.params.max_retransmit;
        let mut due = Vec::new();

        self.outstanding.retain_mut(|o| {
            if o.due > now {
                return true;
            }
            if o.retransmissions >= max_retransmit {
                due.push(Due::GaveUp {
                    message_id: o.message_id,
                });
                return false;
            }
            o.retransmissions += 1;
            o.timeout *= 2;
            o.due = now + o.timeout;
            due.push(Due::Retransmit {
                message_id: o.message_id,
                datagram: o.datagram.clone(),
                attempt: o.retransmissions,
            });
            true
        });

        due
    }

    fn remove(&mut self, message_id: MessageId) -> bool {
        let before = self.outstanding.len();
        self.outstanding.retain(|o| o.message_id != message_id);
        self.outstanding.len() != before
    }
}
