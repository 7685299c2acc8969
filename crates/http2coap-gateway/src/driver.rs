//! ExchangeDriver: runs one HTTP-triggered CoAP exchange to completion.
//!
//! The driver registers the exchange, asks the dispatcher to send, then waits
//! on its own oneshot until the exchange deadline. Retransmissions happen in
//! the dispatcher meanwhile. Whatever way the wait ends (response, deadline,
//! or the caller dropping the future) the correlation entry and the
//! retransmission state are cleaned up.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::adapters::codec;
use crate::dispatcher::DispatcherHandle;
use crate::domain::correlation::{CorrelationError, CorrelationTable, TransactionKey};
use crate::domain::error::ExchangeError;
use crate::domain::exchange::{Exchange, ExchangeState};
use crate::domain::message::{CoapRequest, CoapResponse, MessageId};

pub struct ExchangeDriver {
    table: Arc<CorrelationTable>,
    dispatcher: DispatcherHandle,
    exchange_timeout: Duration,
    max_datagram: usize,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl ExchangeDriver {
    pub fn new(
        table: Arc<CorrelationTable>,
        dispatcher: DispatcherHandle,
        exchange_timeout: Duration,
        max_datagram: usize,
    ) -> Self {
        Self {
            table,
            dispatcher,
            exchange_timeout,
            max_datagram,
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    pub fn exchange_timeout(&self) -> Duration {
        self.exchange_timeout
    }

    /// Send `request` and wait for its response until the exchange deadline.
    pub async fn execute(&self, request: CoapRequest) -> Result<CoapResponse, ExchangeError> {
        let _in_flight = InFlight::enter(self);
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ExchangeError::ShuttingDown);
        }

        let deadline = Instant::now() + self.exchange_timeout;
        let message_id = request.message_id;

        let (tx, rx) = oneshot::channel();
        self.table
            .register(TransactionKey::new(message_id, request.token.clone()), tx)
            .map_err(|e| match e {
                CorrelationError::TableFull { capacity } => ExchangeError::TableFull { capacity },
                CorrelationError::KeyInUse(id) => ExchangeError::KeyInUse(id),
                CorrelationError::TokenInUse(token) => ExchangeError::TokenInUse(token),
            })?;
        let _guard = ExchangeGuard {
            driver: self,
            message_id,
        };

        let datagram = codec::encode_request(&request, self.max_datagram)
            .map_err(|e| ExchangeError::Encoding(e.to_string()))?;

        let mut exchange = Exchange::sent(message_id, request.method);
        self.dispatcher
            .send(message_id, datagram)
            .await
            .map_err(|e| ExchangeError::SendFailed(e.to_string()))?;

        exchange.advance(ExchangeState::AwaitingResponse);

        match timeout_at(deadline, rx).await {
            Ok(Ok(response)) => {
                exchange.advance(ExchangeState::Completed);
                Ok(response)
            }
            Ok(Err(_)) => {
                // Entry swept before any response arrived
                exchange.advance(ExchangeState::TimedOut);
                warn!(exchange_id = %exchange.id, message_id = %message_id, "Exchange entry swept");
                Err(ExchangeError::GatewayTimeout(self.exchange_timeout))
            }
            Err(_) => {
                exchange.advance(ExchangeState::TimedOut);
                self.table.expire(message_id);
                warn!(
                    exchange_id = %exchange.id,
                    message_id = %message_id,
                    method = %request.method,
                    path = %request.path(),
                    timeout_ms = self.exchange_timeout.as_millis() as u64,
                    "No CoAP response before deadline"
                );
                Err(ExchangeError::GatewayTimeout(self.exchange_timeout))
            }
        }
    }

    /// Refuse new exchanges from now on.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no exchange is in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Counts one exchange in flight for the lifetime of `execute`.
struct InFlight<'a> {
    driver: &'a ExchangeDriver,
}

impl<'a> InFlight<'a> {
    fn enter(driver: &'a ExchangeDriver) -> Self {
        driver.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { driver }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.driver.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.driver.drained.notify_waiters();
        }
    }
}

/// Releases the correlation entry and retransmission state of one exchange.
/// Both operations are no-ops once the response was delivered.
struct ExchangeGuard<'a> {
    driver: &'a ExchangeDriver,
    message_id: MessageId,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if self.driver.table.cancel(self.message_id) {
            debug!(message_id = %self.message_id, "Exchange abandoned");
        }
        self.driver.dispatcher.cancel(self.message_id);
    }
}
