//! Per-request tracing span.
//!
//! Every inbound HTTP request runs inside an `http_request` span carrying the
//! method, target and a request id; status and latency are recorded once the
//! reply (forwarded CoAP answer, static file or error) is ready. The request
//! id is echoed back in `x-request-id` so a client can quote it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    response::Response,
};
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};
use uuid::Uuid;

pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Longest client supplied request id that is trusted as-is.
const MAX_REQUEST_ID_LEN: usize = 64;

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

#[derive(Clone, Debug)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Take the clone that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let request_id = request_id(&req);
        let span = info_span!(
            "http_request",
            http.method = %req.method(),
            http.target = %req.uri(),
            request_id = %request_id,
            http.status_code = field::Empty,
            elapsed_ms = field::Empty,
            trace_id = field::Empty,
        );
        if let Some(trace_id) = trace_id(&req) {
            span.record("trace_id", trace_id);
        }

        let started = Instant::now();
        Box::pin(
            async move {
                let mut result = inner.call(req).await;
                let span = Span::current();
                span.record("elapsed_ms", started.elapsed().as_millis() as u64);
                if let Ok(response) = &mut result {
                    span.record("http.status_code", response.status().as_u16());
                    if let Ok(value) = HeaderValue::from_str(&request_id) {
                        response.headers_mut().insert(HEADER_REQUEST_ID, value);
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}

/// The caller's `x-request-id` when it is short printable ASCII, otherwise a
/// fresh time-ordered id.
fn request_id<B>(req: &Request<B>) -> String {
    req.headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::now_v7().to_string())
}

/// Trace id from a W3C `traceparent` header (`version-trace_id-parent_id-flags`).
fn trace_id<B>(req: &Request<B>) -> Option<&str> {
    let mut parts = req.headers().get("traceparent")?.to_str().ok()?.split('-');
    let (_version, trace, _parent, _flags) =
        (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || trace.len() != 32 {
        return None;
    }
    Some(trace)
}
