//! Gateway configuration with validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::message::MAX_TOKEN_LEN;

/// Default CoAP port (RFC 7252 §6.1)
pub const DEFAULT_COAP_PORT: u16 = 5683;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Inbound HTTP listener
    pub http: HttpConfig,
    /// Admin listener (health, metrics, pending exchanges)
    pub admin: AdminConfig,
    /// Downstream CoAP endpoint
    pub coap: CoapConfig,
    /// Exchange and retransmission timing
    pub timeouts: TimeoutConfig,
    /// Capacity limits
    pub limits: LimitsConfig,
}

impl GatewayConfig {
    /// Defaults overlaid with environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `H2C_EXCHANGE_TIMEOUT`: exchange budget, e.g. `10s` or `2500ms`
    /// - `H2C_CORRELATION_CAPACITY`: concurrent in-flight exchanges
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides read through `lookup`. Unset keys leave the value alone;
    /// set but unparsable keys are an error rather than silently ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("H2C_EXCHANGE_TIMEOUT") {
            self.timeouts.exchange = parse_duration(&raw).map_err(|e| {
                ConfigError::Invalid(format!("H2C_EXCHANGE_TIMEOUT={raw}: {e}"))
            })?;
        }

        if let Some(raw) = lookup("H2C_CORRELATION_CAPACITY") {
            self.limits.correlation_capacity = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("H2C_CORRELATION_CAPACITY={raw}: not a number"))
            })?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin.enabled && self.admin.port == self.http.port {
            return Err(ConfigError::DuplicatePorts);
        }

        if self.limits.correlation_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "correlation_capacity cannot be 0".into(),
            ));
        }

        if self.limits.command_queue_depth == 0 {
            return Err(ConfigError::InvalidLimit(
                "command_queue_depth cannot be 0".into(),
            ));
        }

        if self.coap.token_length > MAX_TOKEN_LEN {
            return Err(ConfigError::InvalidLimit(format!(
                "token_length {} exceeds {}",
                self.coap.token_length, MAX_TOKEN_LEN
            )));
        }

        if self.coap.max_payload_size > self.coap.max_datagram_size {
            return Err(ConfigError::InvalidLimit(
                "max_payload_size cannot exceed max_datagram_size".into(),
            ));
        }

        if self.timeouts.exchange.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "exchange timeout cannot be 0".into(),
            ));
        }

        if self.timeouts.ack_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("ack_timeout cannot be 0".into()));
        }

        if !(self.timeouts.ack_random_factor >= 1.0) {
            return Err(ConfigError::InvalidTimeout(
                "ack_random_factor must be at least 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    /// Get Admin server bind address
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin.host, self.admin.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
    /// Directory served under `/static` (optional)
    pub static_root: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            static_root: None,
        }
    }
}

/// Admin server configuration (localhost only by default)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin server
    pub enabled: bool,
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8081)
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8081,
        }
    }
}

/// Downstream CoAP endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoapConfig {
    /// Destination host name or address (empty means localhost)
    pub destination_host: String,
    /// Destination port (default: 5683)
    pub destination_port: u16,
    /// Local UDP bind address; unspecified address of the destination's family when unset
    pub bind_addr: Option<SocketAddr>,
    /// Token length in bytes (0..=8)
    pub token_length: usize,
    /// Largest datagram accepted or produced
    pub max_datagram_size: usize,
    /// Largest HTTP body forwarded as a single CoAP payload
    pub max_payload_size: usize,
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            destination_host: String::new(),
            destination_port: DEFAULT_COAP_PORT,
            bind_addr: None,
            token_length: 4,
            max_datagram_size: 1152,
            max_payload_size: 1024,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Overall budget for one HTTP-triggered exchange
    #[serde(with = "humantime_serde")]
    pub exchange: Duration,
    /// Initial retransmission timeout (ACK_TIMEOUT)
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Jitter factor applied to the initial timeout (ACK_RANDOM_FACTOR)
    pub ack_random_factor: f64,
    /// Retransmissions before a PDU is given up (MAX_RETRANSMIT)
    pub max_retransmit: u32,
    /// Interval of the stale correlation entry sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            exchange: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Capacity limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Concurrent in-flight exchanges (correlation slots)
    pub correlation_capacity: usize,
    /// Dispatcher command channel depth
    pub command_queue_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            correlation_capacity: 64,
            command_queue_depth: 256,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// HTTP and admin listener share a port
    #[error("duplicate ports configured")]
    DuplicatePorts,
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before the bare "s"/"m" suffixes
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}

pub use humantime_serde::parse_duration;
