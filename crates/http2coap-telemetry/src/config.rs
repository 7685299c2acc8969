//! Telemetry configuration from environment variables.

use std::env;

use serde::Serialize;

/// Configuration for log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryConfig {
    /// Service name attached to the startup line
    pub service_name: String,

    /// `EnvFilter` directive (trace, debug, info, warn, error, or per-target)
    pub log_level: String,

    /// Emit one JSON object per event instead of human readable lines
    pub json_logs: bool,

    /// Include thread ids in each event
    pub thread_ids: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "http2coap".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            thread_ids: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `H2C_LOG_LEVEL` or `RUST_LOG`: filter directive (default: info)
    /// - `H2C_JSON_LOGS`: JSON output (default: false in dev, true in containers)
    /// - `H2C_THREAD_IDS`: include thread ids (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();
        let defaults = Self::default();

        Self {
            service_name: defaults.service_name,

            log_level: lookup("H2C_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.log_level),

            json_logs: lookup("H2C_JSON_LOGS")
                .map(|v| is_truthy(&v))
                .unwrap_or(is_container),

            thread_ids: lookup("H2C_THREAD_IDS")
                .map(|v| is_truthy(&v))
                .unwrap_or(defaults.thread_ids),
        }
    }

    /// Override the filter directive, e.g. from a `-v` style flag.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
