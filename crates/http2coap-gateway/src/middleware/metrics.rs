//! Gateway counters, exported as JSON on the admin listener.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;

/// HTTP→CoAP gateway metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // HTTP side
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub requests_rejected_method: AtomicU64,
    pub requests_timed_out: AtomicU64,

    // CoAP side
    pub coap_requests_sent: AtomicU64,
    pub coap_retransmissions: AtomicU64,
    pub coap_retransmit_exhausted: AtomicU64,
    pub coap_datagrams_received: AtomicU64,
    pub coap_datagrams_garbled: AtomicU64,
    pub coap_acks_sent: AtomicU64,
    pub coap_resets_sent: AtomicU64,

    // Latency tracking (simplified - no histogram)
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished HTTP request by the status it was answered with
    pub fn record_request(&self, status: StatusCode, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if status.is_success() {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }

        match status {
            StatusCode::NOT_ACCEPTABLE => {
                self.requests_rejected_method.fetch_add(1, Ordering::Relaxed);
            }
            StatusCode::GATEWAY_TIMEOUT => {
                self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coap_sent(&self) {
        self.coap_requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmission(&self) {
        self.coap_retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmit_exhausted(&self) {
        self.coap_retransmit_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_datagram(&self) {
        self.coap_datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_garbled(&self) {
        self.coap_datagrams_garbled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_sent(&self) {
        self.coap_acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset_sent(&self) {
        self.coap_resets_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "http": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "success": self.requests_success.load(Ordering::Relaxed),
                "error": self.requests_error.load(Ordering::Relaxed),
                "rejected_method": self.requests_rejected_method.load(Ordering::Relaxed),
                "timed_out": self.requests_timed_out.load(Ordering::Relaxed),
            },
            "coap": {
                "sent": self.coap_requests_sent.load(Ordering::Relaxed),
                "retransmissions": self.coap_retransmissions.load(Ordering::Relaxed),
                "retransmit_exhausted": self.coap_retransmit_exhausted.load(Ordering::Relaxed),
                "received": self.coap_datagrams_received.load(Ordering::Relaxed),
                "garbled": self.coap_datagrams_garbled.load(Ordering::Relaxed),
                "acks_sent": self.coap_acks_sent.load(Ordering::Relaxed),
                "resets_sent": self.coap_resets_sent.load(Ordering::Relaxed),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}

/// Request timing helper
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<GatewayMetrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish(self, status: StatusCode) {
        let latency_ms = self.elapsed_ms();
        self.metrics.record_request(status, latency_ms);
    }
}
