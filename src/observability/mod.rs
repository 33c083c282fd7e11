//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway and orchestrator produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and histograms via `metrics`)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Per-request span carries a generated request ID; the ID is never
//!   written into forwarded headers
//! - Metric calls are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
