//! Run orchestration.
//!
//! # Responsibilities
//! - Validate a run's resource set and mint its token
//! - Drive every fetch of the run concurrently on one task
//! - Classify each result into `Loaded` or `Failed`
//! - Discard completions whose token is no longer current

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::config::OrchestratorConfig;
use crate::observability::metrics;
use crate::orchestrator::fetcher::{FetchError, FetchResponse, Fetcher};
use crate::orchestrator::run::RunHandle;
use crate::orchestrator::types::{FailureDetail, ResourceRequest, ResourceState, RunToken};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("resource key must not be empty")]
    EmptyKey,

    #[error("duplicate resource key '{0}'")]
    DuplicateKey(String),

    #[error("runs must be started inside a Tokio runtime")]
    NoRuntime,
}

/// Tunables shared by every run.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Field of the JSON object holding the record list.
    pub records_field: String,
    /// Per-resource bound; `None` waits as long as the transport does.
    pub resource_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            records_field: config.records_field.clone(),
            resource_timeout: config.resource_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// The single current-token cell.
///
/// Settlements compare-and-write under the read guard; cancellation takes
/// the write guard, so once it returns no stale write can land.
type TokenCell = Arc<RwLock<Option<RunToken>>>;

struct ActiveRun {
    handle: RunHandle,
    driver: AbortHandle,
}

impl ActiveRun {
    fn retire(self) {
        self.handle.mark_cancelled();
        self.driver.abort();
    }
}

/// Fans out resource fetches and tracks their state per run.
pub struct Orchestrator<F> {
    fetcher: Arc<F>,
    settings: Arc<OrchestratorSettings>,
    generation: AtomicU64,
    current: TokenCell,
    active: Mutex<Option<ActiveRun>>,
}

impl<F: Fetcher> Orchestrator<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_settings(fetcher, OrchestratorSettings::default())
    }

    pub fn with_settings(fetcher: F, settings: OrchestratorSettings) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            settings: Arc::new(settings),
            generation: AtomicU64::new(0),
            current: Arc::new(RwLock::new(None)),
            active: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Token of the run whose results are still accepted.
    pub fn current_token(&self) -> Option<RunToken> {
        *self.current.read()
    }

    /// Start a new run, superseding any previous one.
    ///
    /// Every fetch is issued immediately on the current Tokio runtime.
    pub fn start_run(&self, requests: Vec<ResourceRequest>) -> Result<RunHandle, OrchestratorError> {
        validate_keys(&requests)?;
        let runtime = Handle::try_current().map_err(|_| OrchestratorError::NoRuntime)?;

        let mut active = self.active.lock();
        let token = RunToken::new(self.generation.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = RunHandle::new(token, &requests);
        *self.current.write() = Some(token);

        tracing::info!(run = %token, resources = requests.len(), "Starting run");

        let driver = runtime
            .spawn(drive(
                Arc::clone(&self.fetcher),
                Arc::clone(&self.settings),
                Arc::clone(&self.current),
                handle.clone(),
                requests,
            ))
            .abort_handle();

        if let Some(previous) = active.replace(ActiveRun {
            handle: handle.clone(),
            driver,
        }) {
            tracing::debug!(run = %previous.handle.token(), "Superseding previous run");
            previous.retire();
        }

        Ok(handle)
    }

    /// Invalidate the current token. Returns the token that was cancelled.
    ///
    /// Results that settle afterwards are discarded.
    pub fn cancel_run(&self) -> Option<RunToken> {
        let mut active = self.active.lock();
        let cancelled = self.current.write().take();
        if let Some(run) = active.take() {
            run.retire();
        }
        if let Some(token) = cancelled {
            tracing::debug!(run = %token, "Run cancelled");
        }
        cancelled
    }
}

impl<F> Drop for Orchestrator<F> {
    fn drop(&mut self) {
        self.current.write().take();
        if let Some(run) = self.active.get_mut().take() {
            run.retire();
        }
    }
}

fn validate_keys(requests: &[ResourceRequest]) -> Result<(), OrchestratorError> {
    let mut seen = HashSet::with_capacity(requests.len());
    for request in requests {
        if request.key.is_empty() {
            return Err(OrchestratorError::EmptyKey);
        }
        if !seen.insert(request.key.as_str()) {
            return Err(OrchestratorError::DuplicateKey(request.key.clone()));
        }
    }
    Ok(())
}

/// Polls all fetches of one run on a single task.
async fn drive<F: Fetcher>(
    fetcher: Arc<F>,
    settings: Arc<OrchestratorSettings>,
    current: TokenCell,
    handle: RunHandle,
    requests: Vec<ResourceRequest>,
) {
    let token = handle.token();
    let fetcher = fetcher.as_ref();
    let settings = settings.as_ref();

    let mut in_flight: FuturesUnordered<_> = requests
        .iter()
        .map(|request| async move {
            let state = fetch_resource(fetcher, &request.locator, settings).await;
            (request.key.as_str(), state)
        })
        .collect();

    while let Some((key, state)) = in_flight.next().await {
        let outcome = outcome_label(&state);
        if !settle_if_current(&current, &handle, key, state) {
            metrics::record_stale_completion();
            tracing::debug!(run = %token, key, "Discarding stale completion");
            return;
        }
        metrics::record_resource_settled(outcome);
        tracing::debug!(run = %token, key, outcome, "Resource settled");
    }

    tracing::info!(run = %token, resources = handle.len(), "Run settled");
}

/// The one synchronization point between a fetch and cancellation.
fn settle_if_current(
    current: &RwLock<Option<RunToken>>,
    handle: &RunHandle,
    key: &str,
    state: ResourceState,
) -> bool {
    let current = current.read();
    if *current != Some(handle.token()) {
        return false;
    }
    handle.settle(key, state);
    true
}

fn outcome_label(state: &ResourceState) -> &'static str {
    match state.error_detail() {
        None => "loaded",
        Some(FailureDetail::Transport { .. }) => "transport",
        Some(FailureDetail::Status { .. }) => "status",
        Some(FailureDetail::Parse { .. }) => "parse",
        Some(FailureDetail::TimedOut { .. }) => "timeout",
    }
}

async fn fetch_resource<F: Fetcher>(
    fetcher: &F,
    locator: &str,
    settings: &OrchestratorSettings,
) -> ResourceState {
    let result = match settings.resource_timeout {
        Some(limit) => match tokio::time::timeout(limit, fetcher.fetch(locator)).await {
            Ok(result) => result,
            Err(_) => {
                return ResourceState::Failed(FailureDetail::TimedOut {
                    after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }
        },
        None => fetcher.fetch(locator).await,
    };
    classify(result, &settings.records_field)
}

/// Turn one fetch result into a terminal state.
pub fn classify(result: Result<FetchResponse, FetchError>, records_field: &str) -> ResourceState {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            return ResourceState::Failed(FailureDetail::Transport {
                message: e.to_string(),
            })
        }
    };

    if !response.status.is_success() {
        let text = String::from_utf8_lossy(&response.body).trim().to_string();
        return ResourceState::Failed(FailureDetail::Status {
            status: response.status.as_u16(),
            reason: response
                .reason
                .clone()
                .or_else(|| response.status.canonical_reason().map(str::to_string))
                .unwrap_or_default(),
            body: (!text.is_empty()).then_some(text),
        });
    }

    match parse_records(&response.body, records_field) {
        Ok(items) => ResourceState::Loaded(items),
        Err(message) => ResourceState::Failed(FailureDetail::Parse { message }),
    }
}

/// Extract the record list from `{"<field>": [...]}`.
pub fn parse_records(body: &[u8], records_field: &str) -> Result<Vec<Value>, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let Value::Object(mut object) = value else {
        return Err("expected a JSON object".to_string());
    };
    match object.remove(records_field) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(format!("field '{records_field}' is not an array")),
        None => Err(format!("missing field '{records_field}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use crate::orchestrator::types::Phase;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Answers each locator after a fixed delay.
    #[derive(Default)]
    struct ScriptedFetcher {
        routes: HashMap<&'static str, (u64, Result<(StatusCode, &'static str), &'static str>)>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn route(
            mut self,
            locator: &'static str,
            delay_ms: u64,
            reply: Result<(StatusCode, &'static str), &'static str>,
        ) -> Self {
            self.routes.insert(locator, (delay_ms, reply));
            self
        }
    }

    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, locator: &str) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (delay_ms, reply) = self
                .routes
                .get(locator)
                .cloned()
                .unwrap_or((0, Ok((StatusCode::NOT_FOUND, ""))));
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            match reply {
                Ok((status, body)) => Ok(FetchResponse::new(status, body)),
                Err(message) => Err(FetchError::Transport(message.to_string())),
            }
        }
    }

    fn two_resources() -> Vec<ResourceRequest> {
        vec![ResourceRequest::new("a", "/x"), ResourceRequest::new("b", "/y")]
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_isolated_and_done_waits_for_slowest() {
        let fetcher = ScriptedFetcher::default()
            .route("/x", 10, Ok((StatusCode::OK, r#"{"items":[{"n":1}]}"#)))
            .route("/y", 5, Ok((StatusCode::INTERNAL_SERVER_ERROR, "boom")));
        let orchestrator = Orchestrator::new(fetcher);
        let run = orchestrator.start_run(two_resources()).unwrap();

        assert_eq!(run.state("a").unwrap().phase(), Phase::Pending);
        assert_eq!(run.state("b").unwrap().phase(), Phase::Pending);

        tokio::time::sleep(Duration::from_millis(7)).await;
        let b = run.state("b").unwrap();
        assert_eq!(b.phase(), Phase::Failed);
        assert_eq!(
            b.error_detail().unwrap().to_string(),
            "500 Internal Server Error: boom"
        );
        assert_eq!(run.state("a").unwrap().phase(), Phase::Pending);
        assert!(!run.is_done());

        run.wait_done().await.unwrap();
        assert_eq!(
            run.state("a").unwrap(),
            ResourceState::Loaded(vec![json!({"n": 1})])
        );
        assert_eq!(run.state("b").unwrap().phase(), Phase::Failed);
        assert_eq!(run.progress().settled, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_settle_freezes_state() {
        let fetcher = ScriptedFetcher::default()
            .route("/x", 10, Ok((StatusCode::OK, r#"{"items":[]}"#)))
            .route("/y", 20, Err("connection refused"));
        let orchestrator = Orchestrator::new(fetcher);
        let run = orchestrator.start_run(two_resources()).unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(orchestrator.cancel_run(), Some(run.token()));
        assert_eq!(orchestrator.current_token(), None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        for (_, state) in run.snapshot() {
            assert_eq!(state, ResourceState::Pending);
        }
        assert!(run.progress().cancelled);
        assert!(run.wait_done().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn new_run_supersedes_previous() {
        let fetcher = ScriptedFetcher::default()
            .route("/slow", 100, Ok((StatusCode::OK, r#"{"items":[1]}"#)))
            .route("/fast", 1, Ok((StatusCode::OK, r#"{"items":[2]}"#)));
        let orchestrator = Orchestrator::new(fetcher);

        let first = orchestrator
            .start_run(vec![ResourceRequest::new("r", "/slow")])
            .unwrap();
        let second = orchestrator
            .start_run(vec![ResourceRequest::new("r", "/fast")])
            .unwrap();
        assert!(second.token() > first.token());
        assert_eq!(orchestrator.current_token(), Some(second.token()));

        second.wait_done().await.unwrap();
        assert!(first.wait_done().await.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(first.state("r"), Some(ResourceState::Pending));
        assert_eq!(second.state("r"), Some(ResourceState::Loaded(vec![json!(2)])));
    }

    #[test]
    fn stale_settlement_is_rejected() {
        let cell: TokenCell = Arc::new(RwLock::new(Some(RunToken::new(2))));
        let run = RunHandle::new(RunToken::new(1), &two_resources());

        assert!(!settle_if_current(&cell, &run, "a", ResourceState::Loaded(vec![])));
        assert_eq!(run.state("a"), Some(ResourceState::Pending));

        *cell.write() = Some(RunToken::new(1));
        assert!(settle_if_current(&cell, &run, "a", ResourceState::Loaded(vec![])));
        assert_eq!(run.progress().settled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resource_timeout_fails_only_the_slow_resource() {
        let fetcher = ScriptedFetcher::default()
            .route("/x", 5, Ok((StatusCode::OK, r#"{"items":[]}"#)))
            .route("/y", 5_000, Ok((StatusCode::OK, r#"{"items":[]}"#)));
        let orchestrator = Orchestrator::with_settings(
            fetcher,
            OrchestratorSettings {
                resource_timeout: Some(Duration::from_millis(100)),
                ..OrchestratorSettings::default()
            },
        );
        let run = orchestrator.start_run(two_resources()).unwrap();
        run.wait_done().await.unwrap();

        assert_eq!(run.state("a"), Some(ResourceState::Loaded(vec![])));
        assert_eq!(
            run.state("b"),
            Some(ResourceState::Failed(FailureDetail::TimedOut { after_ms: 100 }))
        );
    }

    #[tokio::test]
    async fn all_fetches_are_issued() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = ScriptedFetcher {
            calls: Arc::clone(&calls),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(fetcher);
        let requests = (0..8)
            .map(|i| ResourceRequest::new(format!("k{i}"), format!("/missing/{i}")))
            .collect();
        let run = orchestrator.start_run(requests).unwrap();
        run.wait_done().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert!(run
            .snapshot()
            .iter()
            .all(|(_, state)| state.phase() == Phase::Failed));
    }

    #[tokio::test]
    async fn rejects_duplicate_and_empty_keys() {
        let orchestrator = Orchestrator::new(ScriptedFetcher::default());
        let err = orchestrator
            .start_run(vec![ResourceRequest::new("a", "/x"), ResourceRequest::new("a", "/y")])
            .unwrap_err();
        assert_eq!(err, OrchestratorError::DuplicateKey("a".into()));

        let err = orchestrator
            .start_run(vec![ResourceRequest::new("", "/x")])
            .unwrap_err();
        assert_eq!(err, OrchestratorError::EmptyKey);
        assert_eq!(orchestrator.current_token(), None);
    }

    #[test]
    fn classify_statuses_and_payloads() {
        let ok = classify(
            Ok(FetchResponse::new(StatusCode::OK, r#"{"count":2,"items":[{"a":1},{"b":2}]}"#)),
            "items",
        );
        assert_eq!(ok.items().len(), 2);

        let not_found = classify(Ok(FetchResponse::new(StatusCode::NOT_FOUND, "")), "items");
        assert_eq!(
            not_found.error_detail(),
            Some(&FailureDetail::Status {
                status: 404,
                reason: "Not Found".into(),
                body: None
            })
        );

        let html = classify(Ok(FetchResponse::new(StatusCode::OK, "<html>")), "items");
        assert!(matches!(
            html.error_detail(),
            Some(FailureDetail::Parse { message }) if message.starts_with("invalid JSON")
        ));

        let array = classify(Ok(FetchResponse::new(StatusCode::OK, "[1,2]")), "items");
        assert!(matches!(array.error_detail(), Some(FailureDetail::Parse { .. })));

        let transport = classify(Err(FetchError::Transport("refused".into())), "items");
        assert_eq!(
            transport.error_detail().unwrap().to_string(),
            "transport error: refused"
        );
    }

    #[test]
    fn status_reason_prefers_server_phrase() {
        let custom = classify(
            Ok(FetchResponse::new(StatusCode::TOO_MANY_REQUESTS, "slow down")
                .with_reason("Scan Quota Exceeded")),
            "items",
        );
        assert_eq!(
            custom.error_detail().unwrap().to_string(),
            "429 Scan Quota Exceeded: slow down"
        );

        let unknown = StatusCode::from_u16(599).unwrap();
        let bare = classify(Ok(FetchResponse::new(unknown, "")), "items");
        assert_eq!(
            bare.error_detail(),
            Some(&FailureDetail::Status {
                status: 599,
                reason: String::new(),
                body: None
            })
        );

        let named = classify(
            Ok(FetchResponse::new(unknown, "").with_reason("Network Connect Timeout")),
            "items",
        );
        assert!(matches!(
            named.error_detail(),
            Some(FailureDetail::Status { reason, .. }) if reason == "Network Connect Timeout"
        ));
    }

    #[test]
    fn start_run_outside_runtime_is_an_error() {
        let orchestrator = Orchestrator::new(ScriptedFetcher::default());
        let err = orchestrator.start_run(two_resources()).unwrap_err();
        assert_eq!(err, OrchestratorError::NoRuntime);
        assert_eq!(orchestrator.current_token(), None);
    }

    #[tokio::test]
    async fn configured_records_field_drives_classification() {
        let config = parse_config(
            r#"
            [orchestrator]
            records_field = "rows"
            resource_timeout_secs = 15
            "#,
        )
        .unwrap();
        let settings = OrchestratorSettings::from(&config.orchestrator);
        assert_eq!(settings.resource_timeout, Some(Duration::from_secs(15)));

        let fetcher = ScriptedFetcher::default()
            .route("/x", 0, Ok((StatusCode::OK, r#"{"rows":[{"host":"ws-01"}]}"#)))
            .route("/y", 0, Ok((StatusCode::OK, r#"{"items":[]}"#)));
        let orchestrator = Orchestrator::with_settings(fetcher, settings);
        let run = orchestrator.start_run(two_resources()).unwrap();
        run.wait_done().await.unwrap();

        assert_eq!(
            run.state("a"),
            Some(ResourceState::Loaded(vec![json!({"host": "ws-01"})]))
        );
        assert!(matches!(
            run.state("b").unwrap().error_detail(),
            Some(FailureDetail::Parse { message }) if message == "missing field 'rows'"
        ));
    }

    #[test]
    fn parse_records_checks_field_shape() {
        assert_eq!(
            parse_records(br#"{"rows":[1]}"#, "rows").unwrap(),
            vec![json!(1)]
        );
        assert_eq!(
            parse_records(br#"{"items":{"n":1}}"#, "items").unwrap_err(),
            "field 'items' is not an array"
        );
        assert_eq!(
            parse_records(br#"{"count":0}"#, "items").unwrap_err(),
            "missing field 'items'"
        );
    }
}
