//! The "issue one request, get one result" primitive.

use std::future::Future;

use axum::body::Bytes;
use axum::http::StatusCode;
use hyper::ext::ReasonPhrase;
use reqwest::header::{HeaderValue, ACCEPT};
use thiserror::Error;
use url::Url;

/// Raw result of one fetch. Interpretation is left to the orchestrator.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    /// Reason phrase sent by the server when it differs from the canonical one.
    pub reason: Option<String>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            reason: None,
            body: body.into(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// Connection refused, DNS failure, body aborted mid-stream.
    #[error("{0}")]
    Transport(String),
}

/// Issues a single request for a resource locator.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, locator: &str) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// `Fetcher` over HTTP, usually pointed at the gateway's public prefix.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, FetchError> {
        Url::parse(base_url).map_err(|e| FetchError::InvalidLocator {
            locator: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Append the locator to the base URL. Unlike `Url::join`, a leading
    /// `/` keeps the base path.
    pub fn url_for(&self, locator: &str) -> Result<Url, FetchError> {
        let separator = if locator.starts_with('/') { "" } else { "/" };
        Url::parse(&format!("{}{}{}", self.base_url, separator, locator)).map_err(|e| {
            FetchError::InvalidLocator {
                locator: locator.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<FetchResponse, FetchError> {
        let url = self.url_for(locator)?;
        let response = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        let reason = response
            .extensions()
            .get::<ReasonPhrase>()
            .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned());
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(FetchResponse {
            status,
            reason,
            body,
        })
    }
}
