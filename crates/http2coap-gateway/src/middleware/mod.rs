//! Middleware for the HTTP side.
//!
//! Layer order: Request → Tracing → Handler. Metrics are recorded by the
//! forward handler, which knows the final status and latency.

pub mod metrics;
pub mod tracing;

pub use self::metrics::{GatewayMetrics, RequestTimer};
pub use self::tracing::{TracingLayer, HEADER_REQUEST_ID};
