//! # HTTP2CoAP
//!
//! Accepts HTTP requests and forwards each one as a confirmable CoAP request
//! to a single destination.
//!
//! ## Startup Sequence
//!
//! 1. Parse the command line
//! 2. Load configuration (defaults, then environment, then flags)
//! 3. Initialize telemetry
//! 4. Resolve the CoAP destination once
//! 5. Bind the UDP socket and the HTTP listener(s)
//! 6. Serve until SIGINT or SIGTERM, then drain in-flight exchanges

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use http2coap_gateway::{resolve_destination, GatewayConfig, Http2CoapService};
use http2coap_telemetry::{init_telemetry, TelemetryConfig};

/// HTTP to CoAP gateway
#[derive(Parser, Debug)]
#[command(name = "http2coap")]
#[command(about = "Forward HTTP requests to a CoAP server")]
struct Args {
    /// CoAP destination host name or address
    #[arg(short = 'D', long)]
    destination: String,

    /// CoAP destination port
    #[arg(short = 'P', long, default_value_t = 5683)]
    destination_port: u16,

    /// Local HTTP port
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,

    /// Directory served under /static
    #[arg(short = 'f', long)]
    files: Option<PathBuf>,

    /// Enable the admin listener (/health, /metrics, /pending) on this port
    #[arg(long)]
    admin_port: Option<u16>,

    /// Per-exchange budget in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl Args {
    /// Flags take precedence over environment and defaults.
    fn apply(&self, config: &mut GatewayConfig) {
        config.coap.destination_host = self.destination.clone();
        config.coap.destination_port = self.destination_port;
        config.http.port = self.port;
        if let Some(files) = &self.files {
            config.http.static_root = Some(files.clone());
        }
        if let Some(port) = self.admin_port {
            config.admin.enabled = true;
            config.admin.port = port;
        }
        if let Some(secs) = self.timeout {
            config.timeouts.exchange = Duration::from_secs(secs);
        }
    }
}

fn load_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::from_env().context("reading H2C_* environment")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Resolves on SIGINT, or SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn run(config: GatewayConfig) -> Result<()> {
    let destination: SocketAddr =
        resolve_destination(&config.coap.destination_host, config.coap.destination_port)
            .await
            .with_context(|| {
                format!(
                    "cannot resolve CoAP destination {}:{}",
                    config.coap.destination_host, config.coap.destination_port
                )
            })?;

    info!(
        http = %config.http_addr(),
        coap_destination = %destination,
        static_root = ?config.http.static_root,
        admin = config.admin.enabled,
        exchange_timeout_ms = config.timeouts.exchange.as_millis() as u64,
        "Starting HTTP2CoAP gateway"
    );

    let service = Http2CoapService::bind(config, destination)
        .await
        .context("binding CoAP socket")?;

    service
        .run(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Gateway stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    let _telemetry = init_telemetry(TelemetryConfig::from_env()).context("initializing logging")?;

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
