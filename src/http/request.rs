//! Request handling and transformation.
//!
//! # Responsibilities
//! - Resolve the upstream target from the inbound URI
//! - Apply the header rules for forwarding
//! - Capture the request body as opaque bytes
//! - Build the outbound request for the upstream client
//!
//! # Design Decisions
//! - The raw (still percent-encoded) path is forwarded; nothing is normalized
//! - Only `host` and `connection` are stripped; everything else passes through
//! - Bodies are never decoded or re-encoded

use std::str::FromStr;

use axum::body::{Body, Bytes};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::config::UpstreamConfig;
use crate::http::error::GatewayError;

/// Methods relayed to the upstream service.
pub const FORWARDED_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

/// `accept` value injected when the client supplied none.
pub const DEFAULT_ACCEPT: &str = "application/json";

/// Returns true if the gateway relays this method.
pub fn is_forwarded_method(method: &Method) -> bool {
    FORWARDED_METHODS.contains(method)
}

/// Returns true if a body is read and forwarded for this method.
pub fn carries_body(method: &Method) -> bool {
    *method != Method::GET && *method != Method::HEAD
}

/// The fixed upstream plus the inbound prefix it is mounted under.
#[derive(Debug, Clone)]
pub struct Upstream {
    authority: Authority,
    prefix: String,
}

impl Upstream {
    /// Build from validated configuration.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, GatewayError> {
        let authority = Authority::from_str(&config.authority)
            .map_err(|e| GatewayError::InvalidTarget(format!("{}: {}", config.authority, e)))?;
        let prefix = if config.path_prefix == "/" {
            String::new()
        } else {
            config.path_prefix.clone()
        };
        Ok(Self { authority, prefix })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Map an inbound URI to its upstream target.
    ///
    /// The prefix must match on a segment boundary: `/api` owns `/api` and
    /// `/api/...` but not `/apix`.
    pub fn resolve(&self, uri: &Uri) -> Result<UpstreamTarget, GatewayError> {
        let path = uri.path();
        let remainder = path
            .strip_prefix(self.prefix.as_str())
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| GatewayError::NotProxied(path.to_string()))?;

        Ok(UpstreamTarget {
            authority: self.authority.clone(),
            path: if remainder.is_empty() {
                "/".to_string()
            } else {
                remainder.to_string()
            },
            query: uri.query().map(str::to_string),
        })
    }
}

/// Resolved destination of one proxied call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub authority: Authority,
    /// Forwarded path, byte-for-byte as received.
    pub path: String,
    /// Forwarded query string without the leading `?`.
    pub query: Option<String>,
}

impl UpstreamTarget {
    /// Absolute URI for the outbound request.
    pub fn uri(&self) -> Result<Uri, GatewayError> {
        let path_and_query = match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        };
        let path_and_query = PathAndQuery::from_str(&path_and_query)
            .map_err(|e| GatewayError::InvalidTarget(e.to_string()))?;

        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| GatewayError::InvalidTarget(e.to_string()))
    }
}

/// Copy inbound headers for forwarding.
///
/// Duplicates keep their order. `host` and `connection` are dropped and
/// `accept` defaults to JSON.
pub fn forward_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(header::HOST);
    headers.remove(header::CONNECTION);
    if !headers.contains_key(header::ACCEPT) {
        headers.insert(header::ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    }
    headers
}

/// Read the whole inbound body, up to `limit` bytes.
pub async fn read_body(body: Body, limit: Option<usize>) -> Result<Bytes, GatewayError> {
    let limit = limit.unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(GatewayError::BodyTooLarge { limit })
        }
        Err(e) => Err(GatewayError::BodyRead(e.to_string())),
    }
}

/// An outbound request ready for the upstream client.
#[derive(Debug)]
pub struct ProxiedRequest {
    pub method: Method,
    pub target: UpstreamTarget,
    pub headers: HeaderMap,
    /// Empty for GET and HEAD.
    pub body: Bytes,
}

impl ProxiedRequest {
    /// For GET and HEAD the body is dropped, and with it the framing
    /// headers that described it.
    pub fn new(method: Method, target: UpstreamTarget, inbound: &HeaderMap, body: Bytes) -> Self {
        let mut headers = forward_headers(inbound);
        let body = if carries_body(&method) {
            body
        } else {
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::TRANSFER_ENCODING);
            Bytes::new()
        };
        Self {
            method,
            target,
            headers,
            body,
        }
    }

    /// Convert into the request handed to the hyper client.
    pub fn into_http(self) -> Result<Request<Body>, GatewayError> {
        let mut request = Request::builder()
            .method(self.method)
            .uri(self.target.uri()?)
            .body(Body::from(self.body))
            .map_err(|e| GatewayError::InvalidTarget(e.to_string()))?;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}
