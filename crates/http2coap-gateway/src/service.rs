//! HTTP→CoAP gateway service - composition root.
//!
//! Wires the HTTP router to RequestTranslator → ExchangeDriver →
//! ResponseTranslator and owns the background tasks (dispatcher, sweeper).

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::adapters::retransmit::TransmissionParams;
use crate::adapters::udp::UdpTransport;
use crate::dispatcher::Dispatcher;
use crate::domain::config::GatewayConfig;
use crate::domain::correlation::{cleanup_task, CorrelationTable};
use crate::domain::error::{ExchangeError, GatewayError};
use crate::domain::request::RequestTranslator;
use crate::domain::response::{HttpReply, ResponseTranslator};
use crate::driver::ExchangeDriver;
use crate::middleware::{GatewayMetrics, RequestTimer, TracingLayer};
use crate::ports::inbound::GatewayApi;
use crate::ports::outbound::CoapTransport;

/// Extra time granted to in-flight exchanges on shutdown, past their own deadline.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// The inbound contract: one HTTP request in, one reply out.
pub struct CoapGateway {
    requests: RequestTranslator,
    responses: ResponseTranslator,
    driver: ExchangeDriver,
    metrics: Arc<GatewayMetrics>,
}

impl CoapGateway {
    pub fn new(
        requests: RequestTranslator,
        driver: ExchangeDriver,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            requests,
            responses: ResponseTranslator,
            driver,
            metrics,
        }
    }

    pub fn driver(&self) -> &ExchangeDriver {
        &self.driver
    }

    async fn exchange(&self, method: &str, target: &str, body: &[u8]) -> Result<HttpReply, ExchangeError> {
        let request = self
            .requests
            .translate_for(method, target, body, self.driver.table())?;

        debug!(
            message_id = %request.message_id,
            token = %request.token,
            method = %request.method,
            path = %request.path(),
            "CoAP request built"
        );

        let response = self.driver.execute(request).await?;
        self.responses.translate(&response)
    }
}

#[async_trait]
impl GatewayApi for CoapGateway {
    async fn forward(&self, method: &str, target: &str, body: &[u8]) -> HttpReply {
        info!("HTTP -> {} {}", method, target);
        let timer = RequestTimer::new(Arc::clone(&self.metrics));

        let reply = match self.exchange(method, target, body).await {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    ExchangeError::UnsupportedMethod(_) => {
                        info!(method = method, "Refusing method without CoAP counterpart")
                    }
                    ExchangeError::SendFailed(_)
                    | ExchangeError::KeyInUse(_)
                    | ExchangeError::TokenInUse(_) => {
                        error!(error = %e, kind = e.kind(), "Exchange failed")
                    }
                    _ => warn!(error = %e, kind = e.kind(), "Exchange failed"),
                }
                HttpReply::error(&e)
            }
        };

        info!(
            status = reply.status.as_u16(),
            elapsed_ms = timer.elapsed_ms(),
            "HTTP <- {} {}",
            reply.status.as_u16(),
            reply.status.canonical_reason().unwrap_or("")
        );
        timer.finish(reply.status);
        reply
    }

    async fn shutdown(&self) {
        self.driver.stop_accepting();
        let in_flight = self.driver.in_flight();
        if in_flight > 0 {
            info!(in_flight = in_flight, "Waiting for in-flight exchanges");
        }
        let budget = self.driver.exchange_timeout() + DRAIN_GRACE;
        if tokio::time::timeout(budget, self.driver.drain()).await.is_err() {
            warn!(in_flight = self.driver.in_flight(), "In-flight exchanges did not drain");
        }
    }
}

/// HTTP→CoAP gateway service state
pub struct Http2CoapService {
    config: GatewayConfig,
    destination: SocketAddr,
    gateway: Arc<CoapGateway>,
    table: Arc<CorrelationTable>,
    metrics: Arc<GatewayMetrics>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Http2CoapService {
    /// Bind the UDP transport to `destination` and start the background tasks.
    pub async fn bind(config: GatewayConfig, destination: SocketAddr) -> Result<Self, GatewayError> {
        config.validate()?;

        let transport = UdpTransport::connect(destination, config.coap.bind_addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: config
                    .coap
                    .bind_addr
                    .map_or_else(|| "udp/ephemeral".to_string(), |a| a.to_string()),
                source,
            })?;

        Self::with_transport(config, destination, Arc::new(transport))
    }

    /// Build the service on an existing transport. Must run inside a tokio runtime.
    pub fn with_transport(
        config: GatewayConfig,
        destination: SocketAddr,
        transport: Arc<dyn CoapTransport>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let table = Arc::new(CorrelationTable::new(config.limits.correlation_capacity));
        let metrics = Arc::new(GatewayMetrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (dispatcher, handle) = Dispatcher::new(
            transport,
            Arc::clone(&table),
            Arc::clone(&metrics),
            TransmissionParams::from_config(&config.timeouts),
            config.coap.max_datagram_size,
            config.limits.command_queue_depth,
            shutdown_rx,
        );

        let driver = ExchangeDriver::new(
            Arc::clone(&table),
            handle,
            config.timeouts.exchange,
            config.coap.max_datagram_size,
        );
        let gateway = Arc::new(CoapGateway::new(
            RequestTranslator::from_config(&config.coap),
            driver,
            Arc::clone(&metrics),
        ));

        let mut tasks = vec![dispatcher.spawn()];

        // Entries outlive their exchange only if a caller leaked them
        let max_age = config.timeouts.exchange + config.timeouts.sweep_interval;
        let sweep_table = Arc::clone(&table);
        let sweep_interval = config.timeouts.sweep_interval;
        tasks.push(tokio::spawn(async move {
            cleanup_task(sweep_table, sweep_interval, max_age).await;
        }));

        info!(
            destination = %destination,
            capacity = config.limits.correlation_capacity,
            exchange_timeout_ms = config.timeouts.exchange.as_millis() as u64,
            "HTTP2CoAP gateway initialised"
        );

        Ok(Self {
            config,
            destination,
            gateway,
            table,
            metrics,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn gateway(&self) -> Arc<CoapGateway> {
        Arc::clone(&self.gateway)
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn correlation_table(&self) -> Arc<CorrelationTable> {
        Arc::clone(&self.table)
    }

    /// HTTP router: `/static/*` from the static root when configured,
    /// everything else forwarded to CoAP.
    pub fn router(&self) -> Router {
        let mut router = Router::new();

        if let Some(root) = &self.config.http.static_root {
            info!(root = %root.display(), "Serving static files under /static");
            router = router.nest_service("/static", ServeDir::new(root));
        }

        router
            .fallback(forward)
            .layer(TracingLayer::new())
            .with_state(Arc::clone(&self.gateway))
    }

    /// Admin router: health, counters and correlation occupancy.
    pub fn admin_router(&self) -> Router {
        let metrics = Arc::clone(&self.metrics);
        let table = Arc::clone(&self.table);
        let gateway = Arc::clone(&self.gateway);

        Router::new()
            .route("/health", get(health_check))
            .route(
                "/metrics",
                get(move || {
                    let metrics = Arc::clone(&metrics);
                    async move { Json(metrics.to_json()) }
                }),
            )
            .route(
                "/pending",
                get(move || {
                    let table = Arc::clone(&table);
                    let gateway = Arc::clone(&gateway);
                    async move {
                        Json(serde_json::json!({
                            "in_flight": gateway.driver().in_flight(),
                            "accepting": gateway.driver().is_accepting(),
                            "correlation": table.snapshot(),
                        }))
                    }
                }),
            )
    }

    /// Serve HTTP (and admin when enabled) until `signal` resolves, then shut
    /// down: stop accepting, drain in-flight exchanges, stop the dispatcher.
    pub async fn run<F>(&self, signal: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let http_addr = self.config.http_addr();
        let listener = TcpListener::bind(http_addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: http_addr.to_string(),
                source,
            })?;

        let admin_listener = if self.config.admin.enabled {
            let admin_addr = self.config.admin_addr();
            let listener = TcpListener::bind(admin_addr)
                .await
                .map_err(|source| GatewayError::Bind {
                    addr: admin_addr.to_string(),
                    source,
                })?;
            Some(listener)
        } else {
            None
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(stop_on(signal, Arc::clone(&self.gateway), stop_tx));

        let admin_handle = admin_listener.map(|listener| {
            info!(addr = %self.config.admin_addr(), "Starting admin server");
            let router = self.admin_router();
            let stop = stopped(stop_rx.clone());
            tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(stop)
                    .await
            })
        });

        info!(addr = %http_addr, destination = %self.destination, "Starting HTTP server");
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(stopped(stop_rx))
            .await;

        if let Some(handle) = admin_handle {
            match handle.await {
                Ok(Err(e)) => error!(error = %e, "Admin server error"),
                Err(e) => error!(error = %e, "Admin server task failed"),
                Ok(Ok(())) => {}
            }
        }

        self.shutdown().await;
        served.map_err(GatewayError::Io)
    }

    /// Stop accepting exchanges, drain in-flight ones, stop background tasks.
    pub async fn shutdown(&self) {
        info!("Shutting down HTTP2CoAP gateway");
        self.gateway.shutdown().await;
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            // The sweeper never returns on its own
            task.abort();
            let _ = task.await;
        }
        info!("HTTP2CoAP gateway stopped");
    }
}

/// Wait for `signal`, refuse new exchanges, then tell the servers to stop.
/// Requests still arriving on open connections during graceful shutdown get
/// 503 instead of starting a CoAP exchange.
async fn stop_on<F>(signal: F, gateway: Arc<CoapGateway>, stop: watch::Sender<bool>)
where
    F: Future<Output = ()>,
{
    signal.await;
    gateway.driver().stop_accepting();
    let _ = stop.send(true);
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Fallback handler: every method and path goes to the gateway.
async fn forward(
    State(gateway): State<Arc<CoapGateway>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> HttpReply {
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    gateway.forward(method.as_str(), target, &body).await
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}
