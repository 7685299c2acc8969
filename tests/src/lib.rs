//! # HTTP2CoAP Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/   # End-to-end: axum router -> UDP -> fake CoAP server
//! └── benches/           # Translation throughput (criterion)
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p http2coap-tests
//! cargo bench -p http2coap-tests
//! ```

pub mod integration;
