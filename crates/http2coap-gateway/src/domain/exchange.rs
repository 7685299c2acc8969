//! Per-request exchange identity and state machine.
//!
//! `Sent → AwaitingResponse → {Completed | TimedOut}`. Retransmissions
//! happen while `AwaitingResponse` and do not change the state.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::message::{CoapMethod, MessageId};

/// Log correlation id for one HTTP-triggered exchange (UUID v7, time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    Sent,
    AwaitingResponse,
    Completed,
    TimedOut,
}

impl ExchangeState {
    pub fn can_transition_to(self, next: ExchangeState) -> bool {
        matches!(
            (self, next),
            (Self::Sent, Self::AwaitingResponse)
                | (Self::AwaitingResponse, Self::Completed)
                | (Self::AwaitingResponse, Self::TimedOut)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::AwaitingResponse => "awaiting_response",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one exchange from the moment its request was sent.
#[derive(Debug)]
pub struct Exchange {
    pub id: ExchangeId,
    pub message_id: MessageId,
    pub method: CoapMethod,
    pub started_at: Instant,
    state: ExchangeState,
}

impl Exchange {
    pub fn sent(message_id: MessageId, method: CoapMethod) -> Self {
        Self {
            id: ExchangeId::new(),
            message_id,
            method,
            started_at: Instant::now(),
            state: ExchangeState::Sent,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Move to `next`; illegal transitions are ignored and reported as false.
    pub fn advance(&mut self, next: ExchangeState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        debug!(
            exchange_id = %self.id,
            message_id = %self.message_id,
            from = %self.state,
            to = %next,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Exchange state change"
        );
        self.state = next;
        true
    }
}
