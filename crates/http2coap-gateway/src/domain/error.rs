//! Gateway error types.
//!
//! Two families: per-request [`ExchangeError`]s, which are always recovered
//! at the exchange boundary and turned into an HTTP error reply, and
//! startup-level [`GatewayError`]s, which abort the process.

use std::io;
use std::time::Duration;

use axum::http::StatusCode;

use crate::domain::config::ConfigError;
use crate::domain::message::{MessageId, Token};

/// Per-request failures. Each one maps onto a fixed HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// HTTP method has no CoAP counterpart
    #[error("You can't use the {0} method in CoAP")]
    UnsupportedMethod(String),

    /// Request could not be built or encoded (payload too large, bad option)
    #[error("CoAP encoding failed: {0}")]
    Encoding(String),

    /// No free correlation slot
    #[error("too many in-flight CoAP exchanges (capacity {capacity})")]
    TableFull { capacity: usize },

    /// Message id already tracked by a live exchange
    #[error("CoAP message id {0} is already in flight")]
    KeyInUse(MessageId),

    /// Token already owned by a live exchange
    #[error("CoAP token {0} is already in flight")]
    TokenInUse(Token),

    /// Socket refused the datagram
    #[error("CoAP send failed: {0}")]
    SendFailed(String),

    /// Matched response whose payload or options could not be read
    #[error("CoAP response could not be read: {0}")]
    PayloadRead(String),

    /// Overall exchange budget elapsed without a response
    #[error("no CoAP response within {}ms", .0.as_millis())]
    GatewayTimeout(Duration),

    /// Gateway no longer accepts new exchanges
    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl ExchangeError {
    /// HTTP status answered to the caller for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMethod(_) => StatusCode::NOT_ACCEPTABLE,
            Self::Encoding(_) | Self::SendFailed(_) | Self::PayloadRead(_) => StatusCode::BAD_GATEWAY,
            Self::TableFull { .. } | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::KeyInUse(_) | Self::TokenInUse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short label used as a metrics/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedMethod(_) => "unsupported_method",
            Self::Encoding(_) => "encoding",
            Self::TableFull { .. } => "table_full",
            Self::KeyInUse(_) => "key_in_use",
            Self::TokenInUse(_) => "token_in_use",
            Self::SendFailed(_) => "send_failed",
            Self::PayloadRead(_) => "payload_read",
            Self::GatewayTimeout(_) => "gateway_timeout",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Destination lookup failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// System name resolution itself failed
    #[error("failed to resolve '{host}': {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Host resolved, but to nothing usable as a UDP destination
    #[error("'{host}' has no IPv4 or IPv6 address")]
    NoUsableAddress { host: String },
}

/// Startup-level errors; fatal for the process.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Socket bind error
    #[error("bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Other I/O failure while serving
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
