//! HTTP gateway subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → server.rs (Axum setup, relay handler)
//!     → request.rs (resolve target, header rules, capture body)
//!     → hyper client → upstream
//!     → response.rs (relay status, headers, streamed body)
//!     → Send to client
//!
//! Local failures (unreachable upstream, bad method, oversized body)
//!     → error.rs (distinguishable 4xx/5xx with x-gateway-error)
//! ```

pub mod error;
pub mod request;
pub mod response;
pub mod server;

pub use error::GatewayError;
pub use request::{ProxiedRequest, Upstream, UpstreamTarget};
pub use response::ProxiedResponse;
pub use server::GatewayServer;
