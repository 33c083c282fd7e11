//! Resource requests, per-resource state and run tokens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One named fetch job within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Unique within one run.
    pub key: String,
    /// Path and query of the backend resource, e.g. `/events?limit=50`.
    pub locator: String,
}

impl ResourceRequest {
    pub fn new(key: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            locator: locator.into(),
        }
    }
}

/// Parses `key=locator`.
impl FromStr for ResourceRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, locator) = s
            .split_once('=')
            .ok_or_else(|| format!("expected key=locator, got '{s}'"))?;
        if key.is_empty() || locator.is_empty() {
            return Err(format!("expected key=locator, got '{s}'"));
        }
        Ok(Self::new(key, locator))
    }
}

/// Lifecycle phase of a resource within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pending,
    Loaded,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pending => write!(f, "pending"),
            Phase::Loaded => write!(f, "loaded"),
            Phase::Failed => write!(f, "failed"),
        }
    }
}

/// Why a resource ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureDetail {
    /// The request never produced a response.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The upstream answered with a non-success status.
    #[error("{}", status_detail(.status, .reason, .body))]
    Status {
        status: u16,
        reason: String,
        body: Option<String>,
    },

    /// A success response that is not a record list.
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("timed out after {after_ms} ms")]
    TimedOut { after_ms: u64 },
}

fn status_detail(status: &u16, reason: &str, body: &Option<String>) -> String {
    let mut detail = status.to_string();
    if !reason.is_empty() {
        detail.push(' ');
        detail.push_str(reason);
    }
    if let Some(body) = body {
        detail.push_str(": ");
        detail.push_str(body);
    }
    detail
}

/// Per-resource result. Starts `Pending` and settles exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceState {
    Pending,
    Loaded(Vec<Value>),
    Failed(FailureDetail),
}

impl ResourceState {
    pub fn phase(&self) -> Phase {
        match self {
            ResourceState::Pending => Phase::Pending,
            ResourceState::Loaded(_) => Phase::Loaded,
            ResourceState::Failed(_) => Phase::Failed,
        }
    }

    /// Records, empty unless `Loaded`.
    pub fn items(&self) -> &[Value] {
        match self {
            ResourceState::Loaded(items) => items,
            _ => &[],
        }
    }

    pub fn error_detail(&self) -> Option<&FailureDetail> {
        match self {
            ResourceState::Failed(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, ResourceState::Pending)
    }
}

/// Generation marker for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunToken(u64);

impl RunToken {
    pub(crate) fn new(generation: u64) -> Self {
        Self(generation)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}
