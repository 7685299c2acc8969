//! Domain types for the HTTP→CoAP gateway.
//!
//! Pure translation and correlation logic. Nothing in here touches a socket;
//! I/O lives in the adapters, the dispatcher and the driver.

pub mod config;
pub mod correlation;
pub mod error;
pub mod exchange;
pub mod message;
pub mod request;
pub mod response;

// Re-exports for convenience
pub use config::{ConfigError, GatewayConfig};
pub use correlation::{CorrelationError, CorrelationTable, MatchOrder, TransactionKey};
pub use error::{ExchangeError, GatewayError, ResolutionError};
pub use exchange::{Exchange, ExchangeId, ExchangeState};
pub use message::*;
pub use request::{MessageIdAllocator, RequestTranslator};
pub use response::{HttpReply, ResponseTranslator};
