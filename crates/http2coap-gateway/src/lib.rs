// Allow missing docs for internal items
#![allow(missing_docs)]

//! HTTP2CoAP gateway - forwards HTTP requests to a CoAP endpoint.
//!
//! Each inbound HTTP request becomes one confirmable CoAP request sent over
//! UDP to a fixed destination; the CoAP response is mapped back to an HTTP
//! status, headers and body.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           HTTP2CoAP GATEWAY                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐        ┌─────────────┐        ┌─────────────┐          │
//! │  │    HTTP     │        │   /static   │        │    Admin    │          │
//! │  │  Port 8080  │        │  ServeDir   │        │  Port 8081  │          │
//! │  └──────┬──────┘        └─────────────┘        └─────────────┘          │
//! │         │                                                               │
//! │  ┌──────┴──────────────────────────────────────┐                        │
//! │  │ RequestTranslator → ExchangeDriver →        │                        │
//! │  │                     ResponseTranslator      │                        │
//! │  └──────┬──────────────────────▲───────────────┘                        │
//! │         │ mpsc (send/cancel)   │ oneshot (one per exchange)             │
//! │  ┌──────┴──────────────────────┴───────────────┐                        │
//! │  │  Dispatcher  ──  CorrelationTable           │                        │
//! │  │  (socket reader + retransmission queue)     │                        │
//! │  └──────┬──────────────────────────────────────┘                        │
//! └─────────┼───────────────────────────────────────────────────────────────┘
//!           │ UDP
//!           ▼
//!     CoAP destination (default port 5683)
//! ```
//!
//! # Error mapping
//!
//! | Failure              | HTTP |
//! |----------------------|------|
//! | unsupported method   | 406  |
//! | encoding / send / unreadable payload | 502 |
//! | correlation table full, shutting down | 503 |
//! | no response before deadline | 504 |
//!
//! # Usage
//!
//! ```ignore
//! use http2coap_gateway::{resolve_destination, GatewayConfig, Http2CoapService};
//!
//! let destination = resolve_destination("coap.example", 5683).await?;
//! let service = Http2CoapService::bind(GatewayConfig::default(), destination).await?;
//! service.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod dispatcher;
pub mod domain;
pub mod driver;
pub mod middleware;
pub mod ports;
pub mod service;

#[cfg(test)]
mod testing;

pub use adapters::resolve_destination;
pub use domain::config::GatewayConfig;
pub use domain::error::{ExchangeError, GatewayError, ResolutionError};
pub use domain::response::HttpReply;
pub use ports::{CoapTransport, GatewayApi};
pub use service::{CoapGateway, Http2CoapService};
