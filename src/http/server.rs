//! HTTP server setup and the relay handler.
//!
//! # Responsibilities
//! - Create the Axum Router with the relay handler and liveness route
//! - Wire up tracing middleware
//! - Forward requests to the single upstream and relay the response
//! - Serve until the shutdown signal fires

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::http::error::GatewayError;
use crate::http::request::{carries_body, is_forwarded_method, read_body, ProxiedRequest, Upstream};
use crate::http::response::ProxiedResponse;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<Upstream>,
    pub client: Client<HttpConnector, Body>,
    pub max_body_bytes: Option<usize>,
    pub response_timeout: Option<Duration>,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
}

impl GatewayServer {
    /// Create a new gateway server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let upstream = Arc::new(Upstream::from_config(&config.upstream)?);

        let mut connector = HttpConnector::new();
        if config.timeouts.connect_secs > 0 {
            connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        }
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            upstream,
            client,
            max_body_bytes: config.limits.max_body_bytes,
            response_timeout: match config.timeouts.response_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };

        let router = Self::build_router(state);
        Ok(Self { router, config })
    }

    /// Everything outside `/healthz` falls through to the relay handler,
    /// which applies the prefix itself so the raw path is never re-parsed.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// The assembled router, for in-process serving and tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.authority,
            prefix = %self.config.upstream.path_prefix,
            "Gateway starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Relay handler. Every inbound request becomes exactly one upstream call.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let span = tracing::debug_span!(
        "relay",
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
    );

    match forward(&state, request).instrument(span.clone()).await {
        Ok(response) => {
            span.in_scope(|| {
                tracing::debug!(status = %response.status, "Upstream responded");
            });
            metrics::record_request(method.as_str(), response.status.as_u16(), start_time);
            response.into_response()
        }
        Err(e) => {
            span.in_scope(|| {
                if e.is_upstream() {
                    tracing::error!(error = %e, "Upstream error");
                } else {
                    tracing::warn!(error = %e, "Request rejected");
                }
            });
            metrics::record_gateway_error(e.code());
            metrics::record_request(method.as_str(), e.status_code().as_u16(), start_time);
            e.into_response()
        }
    }
}

async fn forward(state: &AppState, request: Request<Body>) -> Result<ProxiedResponse, GatewayError> {
    let (parts, body) = request.into_parts();

    let target = state.upstream.resolve(&parts.uri)?;

    if !is_forwarded_method(&parts.method) {
        return Err(GatewayError::MethodNotAllowed(parts.method));
    }

    let body = if carries_body(&parts.method) {
        read_body(body, state.max_body_bytes).await?
    } else {
        Default::default()
    };

    let outbound = ProxiedRequest::new(parts.method, target, &parts.headers, body).into_http()?;
    let pending = state.client.request(outbound);

    let response = match state.response_timeout {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .map_err(|_| GatewayError::UpstreamTimeout(limit))?,
        None => pending.await,
    }
    .map_err(GatewayError::UpstreamUnavailable)?;

    Ok(ProxiedResponse::from(response))
}
