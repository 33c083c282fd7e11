//! Live, per-run state shared between the driver and its consumers.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::watch;

use crate::orchestrator::types::{ResourceRequest, ResourceState, RunToken};

/// Aggregate view of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    pub settled: usize,
    pub total: usize,
    /// Set when the run was cancelled or superseded.
    pub cancelled: bool,
}

impl RunProgress {
    /// Every resource reached `Loaded` or `Failed`. Failures count.
    pub fn is_done(&self) -> bool {
        self.settled == self.total
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{0} was cancelled before every resource settled")]
pub struct RunCancelled(pub RunToken);

#[derive(Debug)]
struct RunShared {
    token: RunToken,
    keys: Vec<String>,
    states: DashMap<String, ResourceState>,
    progress: watch::Sender<RunProgress>,
}

/// Handle to one run. Clones observe the same state.
///
/// Each key's state is written by exactly one fetch; readers see settled
/// resources before the whole run is done.
#[derive(Debug, Clone)]
pub struct RunHandle {
    shared: Arc<RunShared>,
}

impl RunHandle {
    pub(crate) fn new(token: RunToken, requests: &[ResourceRequest]) -> Self {
        let keys: Vec<String> = requests.iter().map(|r| r.key.clone()).collect();
        let states = keys
            .iter()
            .map(|key| (key.clone(), ResourceState::Pending))
            .collect();
        let (progress, _) = watch::channel(RunProgress {
            settled: 0,
            total: keys.len(),
            cancelled: false,
        });

        Self {
            shared: Arc::new(RunShared {
                token,
                keys,
                states,
                progress,
            }),
        }
    }

    pub fn token(&self) -> RunToken {
        self.shared.token
    }

    /// Keys in the order they were requested.
    pub fn keys(&self) -> &[String] {
        &self.shared.keys
    }

    pub fn len(&self) -> usize {
        self.shared.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.keys.is_empty()
    }

    /// Current state of one resource, `None` for unknown keys.
    pub fn state(&self, key: &str) -> Option<ResourceState> {
        self.shared.states.get(key).map(|entry| entry.value().clone())
    }

    /// All states, in request order.
    pub fn snapshot(&self) -> Vec<(String, ResourceState)> {
        self.shared
            .keys
            .iter()
            .filter_map(|key| self.state(key).map(|state| (key.clone(), state)))
            .collect()
    }

    pub fn progress(&self) -> RunProgress {
        *self.shared.progress.borrow()
    }

    /// The aggregate "all settled" flag.
    pub fn is_done(&self) -> bool {
        self.progress().is_done()
    }

    /// Receiver that changes on every settlement and on cancellation.
    pub fn subscribe(&self) -> watch::Receiver<RunProgress> {
        self.shared.progress.subscribe()
    }

    /// Wait until every resource settled.
    ///
    /// Returns `Err` if the run is cancelled or superseded first.
    pub async fn wait_done(&self) -> Result<(), RunCancelled> {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|p| p.is_done() || p.cancelled).await;
        match result {
            Ok(progress) if progress.is_done() => Ok(()),
            _ => Err(RunCancelled(self.token())),
        }
    }

    /// Move a pending resource to its terminal state.
    ///
    /// Callers must hold the orchestrator's token guard. Returns false if
    /// the key is unknown or already settled.
    pub(crate) fn settle(&self, key: &str, state: ResourceState) -> bool {
        if !state.is_settled() {
            return false;
        }
        {
            let Some(mut entry) = self.shared.states.get_mut(key) else {
                return false;
            };
            if entry.is_settled() {
                return false;
            }
            *entry = state;
        }
        self.shared.progress.send_modify(|p| p.settled += 1);
        true
    }

    pub(crate) fn mark_cancelled(&self) {
        self.shared.progress.send_if_modified(|p| {
            if p.cancelled || p.is_done() {
                false
            } else {
                p.cancelled = true;
                true
            }
        });
    }
}
