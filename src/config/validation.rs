//! Configuration validation.
//!
//! Serde handles syntax; this module checks semantics. Every problem is
//! reported, not just the first.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::uri::Authority;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.upstream.authority.is_empty()
        || Authority::from_str(&config.upstream.authority).is_err()
    {
        errors.push(ValidationError::new(
            "upstream.authority",
            format!("'{}' is not a valid host[:port]", config.upstream.authority),
        ));
    }

    let prefix = &config.upstream.path_prefix;
    if !prefix.starts_with('/') {
        errors.push(ValidationError::new(
            "upstream.path_prefix",
            "must start with '/'",
        ));
    } else if prefix.len() > 1 && prefix.ends_with('/') {
        errors.push(ValidationError::new(
            "upstream.path_prefix",
            "must not end with '/'",
        ));
    } else if prefix.contains(['{', '}', '*', '?']) {
        errors.push(ValidationError::new(
            "upstream.path_prefix",
            "must be a literal path",
        ));
    }

    if config.limits.max_body_bytes == Some(0) {
        errors.push(ValidationError::new(
            "limits.max_body_bytes",
            "must be greater than zero when set",
        ));
    }

    if config.orchestrator.records_field.trim().is_empty() {
        errors.push(ValidationError::new(
            "orchestrator.records_field",
            "must not be empty",
        ));
    }

    if config.orchestrator.resource_timeout_secs == Some(0) {
        errors.push(ValidationError::new(
            "orchestrator.resource_timeout_secs",
            "must be greater than zero when set",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "localhost".into();
        config.upstream.authority = String::new();
        config.upstream.path_prefix = "api".into();
        config.orchestrator.records_field = " ".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "upstream.authority",
                "upstream.path_prefix",
                "orchestrator.records_field",
            ]
        );
    }

    #[test]
    fn root_prefix_is_allowed() {
        let mut config = GatewayConfig::default();
        config.upstream.path_prefix = "/".into();
        assert!(validate_config(&config).is_ok());

        config.upstream.path_prefix = "/api/".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = GatewayConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }
}
