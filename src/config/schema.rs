//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The single upstream service every proxied call goes to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request body limits.
    pub limits: LimitsConfig,

    /// Resource orchestrator settings.
    pub orchestrator: OrchestratorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Upstream target configuration. Outbound calls always use plain `http`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Host and port of the upstream service (e.g., "127.0.0.1:8000").
    pub authority: String,

    /// Inbound path prefix that is stripped before forwarding.
    /// `/` forwards every path unchanged.
    pub path_prefix: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            authority: "127.0.0.1:8000".to_string(),
            path_prefix: "/api".to_string(),
        }
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the upstream response head in seconds. 0 disables it.
    pub response_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            response_secs: 0,
        }
    }
}

/// Request body limits.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum buffered request body in bytes. `None` means unbounded.
    pub max_body_bytes: Option<usize>,
}

/// Resource orchestrator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Field of the upstream JSON object that carries the record list.
    pub records_field: String,

    /// Optional per-resource deadline in seconds.
    pub resource_timeout_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            records_field: "items".to_string(),
            resource_timeout_secs: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [upstream]
            authority = "backend:8000"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.authority, "backend:8000");
        assert_eq!(config.upstream.path_prefix, "/api");
        assert_eq!(config.orchestrator.records_field, "items");
        assert!(config.limits.max_body_bytes.is_none());
        assert_eq!(config.timeouts.response_secs, 0);
    }

    #[test]
    fn full_toml_parses() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:4000"

            [upstream]
            authority = "api.internal:8080"
            path_prefix = "/"

            [timeouts]
            connect_secs = 2
            response_secs = 30

            [limits]
            max_body_bytes = 1048576

            [orchestrator]
            records_field = "rows"
            resource_timeout_secs = 15

            [observability]
            log_level = "debug"
            metrics_enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:4000");
        assert_eq!(config.upstream.path_prefix, "/");
        assert_eq!(config.limits.max_body_bytes, Some(1_048_576));
        assert_eq!(config.orchestrator.resource_timeout_secs, Some(15));
        assert!(config.observability.metrics_enabled);
        assert_eq!(config.observability.metrics_address, "0.0.0.0:9090");
    }
}
