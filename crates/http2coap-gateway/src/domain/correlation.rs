//! Correlation table: in-flight CoAP transactions → waiting HTTP callers.
//!
//! Flow:
//! 1. The driver registers `(message_id, token)` with a oneshot sender
//! 2. The request goes out through the dispatcher
//! 3. The dispatcher decodes a response and calls `complete()`
//! 4. The driver awaits the receiver or times out and calls `expire()`
//!
//! Slots are a flat, fixed-size vector behind one mutex. Every mutation
//! removes the entry it touches while holding the lock, so a responder is
//! handed out at most once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::domain::message::{CoapResponse, MessageId, Token};

/// Completes exactly one waiting exchange.
pub type Responder = oneshot::Sender<CoapResponse>;

/// Identifiers a response can be matched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub message_id: MessageId,
    pub token: Token,
}

impl TransactionKey {
    pub fn new(message_id: MessageId, token: Token) -> Self {
        Self { message_id, token }
    }
}

/// How an inbound response should be looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrder {
    /// Message id first, token as fallback (piggybacked responses)
    IdThenToken,
    /// Token first, message id as fallback (separate responses)
    TokenThenId,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("correlation table full ({capacity} slots)")]
    TableFull { capacity: usize },
    #[error("message id {0} already registered")]
    KeyInUse(MessageId),
    #[error("token {0} already registered")]
    TokenInUse(Token),
}

struct CorrelationEntry {
    key: TransactionKey,
    responder: Responder,
    created_at: Instant,
}

/// Statistics for the correlation table
#[derive(Debug, Default)]
pub struct CorrelationStats {
    pub registered: AtomicU64,
    pub completed: AtomicU64,
    pub expired: AtomicU64,
    /// Entries dropped because the caller went away
    pub cancelled: AtomicU64,
    /// Responses that matched no entry
    pub unmatched: AtomicU64,
}

/// Point-in-time view for the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationSnapshot {
    pub in_flight: usize,
    pub capacity: usize,
    pub registered: u64,
    pub completed: u64,
    pub expired: u64,
    pub cancelled: u64,
    pub unmatched: u64,
}

pub struct CorrelationTable {
    slots: Mutex<Vec<Option<CorrelationEntry>>>,
    stats: Arc<CorrelationStats>,
}

impl CorrelationTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots),
            stats: Arc::new(CorrelationStats::default()),
        }
    }

    /// Occupy a free slot for `key`.
    ///
    /// A live entry with the same message id or the same non-empty token is
    /// never overwritten.
    pub fn register(&self, key: TransactionKey, responder: Responder) -> Result<(), CorrelationError> {
        let mut slots = self.slots.lock();

        if slots.iter().flatten().any(|e| e.key.message_id == key.message_id) {
            return Err(CorrelationError::KeyInUse(key.message_id));
        }
        if !key.token.is_empty() && slots.iter().flatten().any(|e| e.key.token == key.token) {
            return Err(CorrelationError::TokenInUse(key.token));
        }

        let capacity = slots.len();
        let Some(slot) = slots.iter_mut().find(|s| s.is_none()) else {
            return Err(CorrelationError::TableFull { capacity });
        };

        debug!(message_id = %key.message_id, token = %key.token, "Registered exchange");
        *slot = Some(CorrelationEntry {
            key,
            responder,
            created_at: Instant::now(),
        });
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove and return the responder registered under `message_id`.
    pub fn resolve(&self, message_id: MessageId) -> Option<Responder> {
        self.take(|key| key.message_id == message_id)
            .map(|entry| entry.responder)
    }

    /// Remove and return the responder registered under `token`.
    /// Empty tokens never match.
    pub fn resolve_by_token(&self, token: &Token) -> Option<Responder> {
        if token.is_empty() {
            return None;
        }
        self.take(|key| &key.token == token).map(|entry| entry.responder)
    }

    /// Hand `response` to the exchange it belongs to.
    ///
    /// Piggybacked responses match on message id as long as the tokens do not
    /// contradict each other, then on token. Separate responses match on
    /// token, and on message id only when neither side carries a token. A
    /// response whose token disagrees with the entry it would hit is
    /// unmatched and leaves that entry in place.
    ///
    /// Returns false when nothing matched or the waiting caller is gone.
    pub fn complete(&self, response: CoapResponse, order: MatchOrder) -> bool {
        let responder = self.claim(&response, order).map(|entry| entry.responder);

        let Some(responder) = responder else {
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                message_id = %response.message_id,
                token = %response.token,
                code = %response.code,
                "Response for unknown or expired exchange"
            );
            return false;
        };

        let message_id = response.message_id;
        match responder.send(response) {
            Ok(()) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                debug!(message_id = %message_id, "Completed exchange");
                true
            }
            Err(_) => {
                // Receiver dropped between lookup and send
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(message_id = %message_id, "Exchange receiver dropped");
                false
            }
        }
    }

    /// Evict an entry whose deadline passed. Idempotent.
    pub fn expire(&self, message_id: MessageId) -> bool {
        let removed = self.take(|key| key.message_id == message_id).is_some();
        if removed {
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Evict an entry whose caller gave up. Idempotent.
    pub fn cancel(&self, message_id: MessageId) -> bool {
        let removed = self.take(|key| key.message_id == message_id).is_some();
        if removed {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Whether a live exchange already owns this non-empty token.
    pub fn token_in_use(&self, token: &Token) -> bool {
        !token.is_empty() && self.slots.lock().iter().flatten().any(|e| &e.key.token == token)
    }

    pub fn contains(&self, message_id: MessageId) -> bool {
        self.slots
            .lock()
            .iter()
            .flatten()
            .any(|e| e.key.message_id == message_id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Drop entries older than `max_age`. Returns the number removed.
    pub fn remove_expired(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let mut removed = 0;

        for slot in slots.iter_mut() {
            let stale = slot
                .as_ref()
                .is_some_and(|e| now.duration_since(e.created_at) > max_age);
            if stale {
                if let Some(entry) = slot.take() {
                    warn!(
                        message_id = %entry.key.message_id,
                        age_ms = now.duration_since(entry.created_at).as_millis() as u64,
                        "Removing stale correlation entry"
                    );
                }
                removed += 1;
            }
        }

        self.stats.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }

    pub fn snapshot(&self) -> CorrelationSnapshot {
        let (in_flight, capacity) = {
            let slots = self.slots.lock();
            (slots.iter().flatten().count(), slots.len())
        };
        CorrelationSnapshot {
            in_flight,
            capacity,
            registered: self.stats.registered.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            unmatched: self.stats.unmatched.load(Ordering::Relaxed),
        }
    }

    /// Pick and remove the entry `response` answers, under a single lock.
    fn claim(&self, response: &CoapResponse, order: MatchOrder) -> Option<CorrelationEntry> {
        let id = response.message_id;
        let token = &response.token;
        let by_id = |key: &TransactionKey| key.message_id == id && tokens_agree(&key.token, token);
        let by_token = |key: &TransactionKey| !token.is_empty() && &key.token == token;
        let by_bare_id =
            |key: &TransactionKey| key.message_id == id && key.token.is_empty() && token.is_empty();

        let mut slots = self.slots.lock();
        let position = |matches: &dyn Fn(&TransactionKey) -> bool| {
            slots
                .iter()
                .position(|slot| slot.as_ref().is_some_and(|e| matches(&e.key)))
        };

        let index = match order {
            MatchOrder::IdThenToken => position(&by_id).or_else(|| position(&by_token)),
            MatchOrder::TokenThenId => position(&by_token).or_else(|| position(&by_bare_id)),
        }?;
        slots[index].take()
    }

    fn take<F>(&self, matches: F) -> Option<CorrelationEntry>
    where
        F: Fn(&TransactionKey) -> bool,
    {
        let mut slots = self.slots.lock();
        slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|e| matches(&e.key)))
            .and_then(Option::take)
    }
}

/// Tokens agree unless both are present and differ.
fn tokens_agree(registered: &Token, received: &Token) -> bool {
    registered.is_empty() || received.is_empty() || registered == received
}

/// Background sweep for entries leaked by callers that never expired them.
pub async fn cleanup_task(table: Arc<CorrelationTable>, interval: Duration, max_age: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        let removed = table.remove_expired(max_age);
        if removed > 0 {
            debug!(removed = removed, "Swept stale correlation entries");
        }
    }
}
