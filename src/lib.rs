//! Dashboard boundary layer: a pass-through gateway to the scanning backend
//! and a concurrent resource loader for the views that consume it.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod orchestrator;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use orchestrator::{HttpFetcher, Orchestrator, ResourceRequest, ResourceState, RunHandle};
