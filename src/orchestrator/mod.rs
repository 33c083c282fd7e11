//! Concurrent resource loading.
//!
//! # Data Flow
//! ```text
//! start_run([{key, locator}, ...])
//!     → engine.rs (validate keys, mint RunToken, spawn one driver task)
//!     → fetcher.rs (one request per resource, all in flight at once)
//!     → engine.rs classify (Loaded | Failed) per resource
//!     → token check → run.rs (per-key state, progress watch)
//!     → consumers read states / await "all settled"
//!
//! cancel_run()
//!     → current token cleared under the write guard
//!     → late completions fail the token check and are dropped
//! ```
//!
//! # Design Decisions
//! - Fetches interleave on one task; no shared mutable state besides the token cell
//! - Failures are per key and count toward completion
//! - No retries; callers start a new run instead

pub mod engine;
pub mod fetcher;
pub mod run;
pub mod types;

pub use engine::{classify, parse_records, Orchestrator, OrchestratorError, OrchestratorSettings};
pub use fetcher::{FetchError, FetchResponse, Fetcher, HttpFetcher};
pub use run::{RunCancelled, RunHandle, RunProgress};
pub use types::{FailureDetail, Phase, ResourceRequest, ResourceState, RunToken};
