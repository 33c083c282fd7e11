//! Gateway-local failures and their HTTP mapping.
//!
//! Upstream non-success statuses are relayed, never turned into one of these.
//! Every variant here is produced by the gateway itself and is marked with
//! an `x-gateway-error` header so callers can tell the two apart.

use std::time::Duration;

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::http::request::FORWARDED_METHODS;

/// Header naming the local failure code.
pub const X_GATEWAY_ERROR: &str = "x-gateway-error";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection to the upstream failed before a response head arrived.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] hyper_util::client::legacy::Error),

    /// No response head within the configured bound.
    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("method {0} is not relayed")]
    MethodNotAllowed(Method),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// Path outside the proxied prefix.
    #[error("no proxy route for {0}")]
    NotProxied(String),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotProxied(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable code used in the header, the JSON body and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            GatewayError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            GatewayError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            GatewayError::BodyTooLarge { .. } => "BODY_TOO_LARGE",
            GatewayError::BodyRead(_) => "BODY_READ_FAILED",
            GatewayError::NotProxied(_) => "NOT_PROXIED",
            GatewayError::InvalidTarget(_) => "INVALID_TARGET",
        }
    }

    /// True when the upstream itself could not be reached.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamUnavailable(_) | GatewayError::UpstreamTimeout(_)
        )
    }
}

/// JSON body for local failures.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(X_GATEWAY_ERROR, HeaderValue::from_static(self.code()));
        if let GatewayError::MethodNotAllowed(_) = self {
            let allow = FORWARDED_METHODS
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                headers.insert(header::ALLOW, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            GatewayError::UpstreamTimeout(Duration::from_secs(3)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::BodyTooLarge { limit: 1 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::NotProxied("/x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn method_not_allowed_lists_relayed_methods() {
        let response = GatewayError::MethodNotAllowed(Method::OPTIONS).into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers()[header::ALLOW],
            "GET, HEAD, POST, PUT, PATCH, DELETE"
        );
        assert_eq!(response.headers()[X_GATEWAY_ERROR], "METHOD_NOT_ALLOWED");
    }
}
