//! Asynchronous continuation poller.
//!
//! Follows a query's nextUri chain on the gateway side, caching every step.
//!
//! ```text
//! submit_new ─► queue ─► dispatcher ─► worker (bounded by semaphore)
//!                 ▲                        │ process_step
//!                 └──── next step ─────────┘
//! ```
//!
//! A step is only enqueued after the previous step of the same query has been
//! processed, so one query never has two requests in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

use super::client::QueryEngineClient;
use super::protocol::{QueryError, QueryResults};
use super::retry::RetryPolicy;
use crate::cache::{CachedMessage, PendingStep, QueryCache};
use crate::config::schema::ContinuationConfig;
use crate::lifecycle::GatewayContext;
use crate::routing::headers::{EXCLUDE_BACKEND_HEADER, TRANSACTION_ID_HEADER};

/// Finds the backend a query was bound to.
pub trait BackendResolver: Send + Sync {
    fn backend_for_query(&self, query_id: &str) -> Option<String>;
}

/// One poll step. Lives only as long as the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationRequest {
    pub query_id: String,
    pub next_uri: String,
    pub host: String,
    pub backend_url: String,
}

impl ContinuationRequest {
    fn pending(&self) -> PendingStep {
        PendingStep {
            next_uri: self.next_uri.clone(),
            host: self.host.clone(),
            backend_url: self.backend_url.clone(),
        }
    }
}

/// Continuation state of a query, as recorded in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Started,
    Polling,
    Completed,
    FailedRetrying,
    FailedTerminal,
}

impl QueryState {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryState::Started => "STARTED",
            QueryState::Polling => "POLLING",
            QueryState::Completed => "COMPLETED",
            QueryState::FailedRetrying => "FAILED_RETRYING",
            QueryState::FailedTerminal => "FAILED_TERMINAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(QueryState::Started),
            "POLLING" => Some(QueryState::Polling),
            "COMPLETED" => Some(QueryState::Completed),
            "FAILED_RETRYING" => Some(QueryState::FailedRetrying),
            "FAILED_TERMINAL" => Some(QueryState::FailedTerminal),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueryState::Completed | QueryState::FailedTerminal)
    }
}

/// What processing one step led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Another step for the same query follows.
    Continued(ContinuationRequest),
    /// No nextUri: the query finished.
    Completed,
    /// The query was resubmitted; polling continues under a new id.
    Retried(ContinuationRequest),
    /// Not retryable or out of retries.
    FailedTerminal,
    /// Shutdown in progress: parked in the dropped list.
    Dropped,
    /// The query already completed; nothing was done.
    AlreadyCompleted,
    /// Unusable response or URI; nothing further for this query.
    Malformed,
}

impl StepOutcome {
    /// The step to enqueue next, if any.
    pub fn next_request(&self) -> Option<&ContinuationRequest> {
        match self {
            StepOutcome::Continued(next) | StepOutcome::Retried(next) => Some(next),
            _ => None,
        }
    }
}

/// Point `next_uri` at `backend_url`, keeping its path and query.
pub fn rewrite_next_uri(next_uri: &str, backend_url: &str) -> Result<String, url::ParseError> {
    let base = Url::parse(backend_url)?;
    let next = Url::parse(next_uri).or_else(|_| base.join(next_uri))?;
    let mut target = base;
    target.set_path(next.path());
    target.set_query(next.query());
    Ok(target.to_string())
}

/// Path plus query string of a URI.
fn path_and_query(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(url) => match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        },
        Err(_) => uri.to_string(),
    }
}

fn origin_of(uri: &str) -> Option<String> {
    Url::parse(uri).ok().map(|u| u.origin().ascii_serialization())
}

struct PollerInner {
    client: Arc<dyn QueryEngineClient>,
    cache: QueryCache,
    policy: RetryPolicy,
    resolver: Option<Arc<dyn BackendResolver>>,
    context: Arc<GatewayContext>,
    retry_endpoint: String,
    in_flight: DashMap<String, ContinuationRequest>,
}

impl PollerInner {
    /// Keep a step for a later gateway process.
    fn park(&self, request: &ContinuationRequest) {
        self.cache.record_pending(&request.query_id, &request.pending());
        self.cache.push_dropped(&request.query_id);
    }

    fn enqueue(&self, tx: &mpsc::UnboundedSender<ContinuationRequest>, request: ContinuationRequest) {
        if self.context.is_shutting_down() {
            self.park(&request);
            return;
        }
        self.cache.record_pending(&request.query_id, &request.pending());
        if let Err(mpsc::error::SendError(request)) = tx.send(request) {
            self.park(&request);
        }
    }

    fn finish(&self, query_id: &str, state: QueryState) {
        self.cache.set_state(query_id, state.as_str());
        self.cache.mark_completed(query_id);
    }

    async fn process_step(&self, request: &ContinuationRequest) -> StepOutcome {
        let query_id = request.query_id.as_str();

        if self.context.is_shutting_down() {
            self.park(request);
            return StepOutcome::Dropped;
        }
        if self.cache.is_completed(query_id) {
            tracing::debug!(query_id, "Query already completed, skipping step");
            return StepOutcome::AlreadyCompleted;
        }
        self.cache.set_state(query_id, QueryState::Polling.as_str());

        let uri = match rewrite_next_uri(&request.next_uri, &request.backend_url) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(query_id, next_uri = %request.next_uri, error = %e, "Unusable nextUri");
                return StepOutcome::Malformed;
            }
        };

        let response = match self.client.get(&uri, &request.host).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(query_id, uri = %uri, error = %e, "Continuation request failed");
                return self.handle_error(request, QueryError::step_failed(e.to_string())).await;
            }
        };

        let message = CachedMessage::response(response.status, response.headers, response.body);
        self.cache
            .cache_step_response(query_id, &path_and_query(&uri), &message);

        if response.status != 200 {
            tracing::warn!(query_id, status = response.status, "Continuation returned non-200");
            let error = QueryError::step_failed(format!("HTTP {}", response.status));
            return self.handle_error(request, error).await;
        }

        let results = match QueryResults::parse(&message.body) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(query_id, error = %e, "Malformed continuation response");
                return StepOutcome::Malformed;
            }
        };

        if let Some(error) = results.error {
            return self.handle_error(request, error).await;
        }

        match results.next_uri {
            None => {
                tracing::debug!(query_id, "Query completed");
                self.finish(query_id, QueryState::Completed);
                StepOutcome::Completed
            }
            Some(next_uri) => StepOutcome::Continued(ContinuationRequest {
                query_id: request.query_id.clone(),
                next_uri,
                host: request.host.clone(),
                backend_url: request.backend_url.clone(),
            }),
        }
    }

    async fn handle_error(&self, request: &ContinuationRequest, error: QueryError) -> StepOutcome {
        let query_id = request.query_id.as_str();
        let transaction_id = self.cache.transaction_id(query_id);
        let retries = self.cache.retries(&transaction_id);

        if !self.policy.should_retry(&error, retries) {
            tracing::info!(
                query_id,
                transaction_id = %transaction_id,
                error = %error.error_name,
                code = error.error_code,
                retries,
                "Query failed terminally"
            );
            self.finish(query_id, QueryState::FailedTerminal);
            return StepOutcome::FailedTerminal;
        }

        self.cache.set_state(query_id, QueryState::FailedRetrying.as_str());
        let Some(initial) = self.cache.initial_request(&transaction_id) else {
            tracing::warn!(query_id, transaction_id = %transaction_id, "No cached request to resubmit");
            self.finish(query_id, QueryState::FailedTerminal);
            return StepOutcome::FailedTerminal;
        };

        tokio::time::sleep(self.policy.backoff(retries + 1)).await;

        let mut headers: Vec<(String, String)> = initial
            .headers
            .into_iter()
            .filter(|(name, _)| {
                !name.eq_ignore_ascii_case(TRANSACTION_ID_HEADER)
                    && !name.eq_ignore_ascii_case(EXCLUDE_BACKEND_HEADER)
            })
            .collect();
        headers.push((TRANSACTION_ID_HEADER.to_string(), transaction_id.clone()));
        headers.push((EXCLUDE_BACKEND_HEADER.to_string(), request.backend_url.clone()));

        self.cache.increment_retries(&transaction_id);
        tracing::info!(
            query_id,
            transaction_id = %transaction_id,
            attempt = retries + 1,
            error = %error.error_name,
            "Resubmitting failed query"
        );

        let response = match self
            .client
            .submit(&self.retry_endpoint, &headers, &initial.body)
            .await
        {
            Ok(response) if response.status == 200 => response,
            Ok(response) => {
                tracing::warn!(query_id, status = response.status, "Resubmission rejected");
                self.finish(query_id, QueryState::FailedTerminal);
                return StepOutcome::FailedTerminal;
            }
            Err(e) => {
                tracing::warn!(query_id, error = %e, "Resubmission failed");
                self.finish(query_id, QueryState::FailedTerminal);
                return StepOutcome::FailedTerminal;
            }
        };

        let results = match QueryResults::parse(&response.body) {
            Ok(QueryResults { id: Some(id), next_uri, error }) => (id, next_uri, error),
            Ok(_) | Err(_) => {
                tracing::warn!(query_id, "Resubmission returned no query id");
                self.finish(query_id, QueryState::FailedTerminal);
                return StepOutcome::FailedTerminal;
            }
        };
        let (new_id, next_uri, submit_error) = results;

        // The old query's chain ends here.
        self.cache.set_state(query_id, QueryState::FailedRetrying.as_str());
        self.cache.mark_completed(query_id);

        self.cache.link_transaction(&new_id, &transaction_id);
        let submitted = CachedMessage::request(headers, initial.body);
        let answer = CachedMessage::response(response.status, response.headers, response.body);
        self.cache.cache_initial(&new_id, &submitted, &answer);

        let Some(next_uri) = next_uri else {
            let state = if submit_error.is_some() {
                QueryState::FailedTerminal
            } else {
                QueryState::Completed
            };
            self.finish(&new_id, state);
            return StepOutcome::Completed;
        };

        let backend_url = self
            .resolver
            .as_ref()
            .and_then(|r| r.backend_for_query(&new_id))
            .or_else(|| origin_of(&next_uri))
            .unwrap_or_else(|| request.backend_url.clone());

        tracing::info!(query_id, new_query_id = %new_id, backend = %backend_url, "Query resubmitted");
        self.cache.set_state(&new_id, QueryState::Polling.as_str());
        StepOutcome::Retried(ContinuationRequest {
            query_id: new_id,
            next_uri,
            host: request.host.clone(),
            backend_url,
        })
    }
}

/// Drives nextUri chains for every submitted query.
pub struct ContinuationPoller {
    inner: Arc<PollerInner>,
    queue_tx: mpsc::UnboundedSender<ContinuationRequest>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<ContinuationRequest>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    workers: usize,
    grace_period: Duration,
}

impl ContinuationPoller {
    pub fn new(
        client: Arc<dyn QueryEngineClient>,
        cache: QueryCache,
        policy: RetryPolicy,
        resolver: Option<Arc<dyn BackendResolver>>,
        context: Arc<GatewayContext>,
        config: &ContinuationConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(PollerInner {
                client,
                cache,
                policy,
                resolver,
                context,
                retry_endpoint: config.retry_endpoint.clone(),
                in_flight: DashMap::new(),
            }),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            dispatcher: Mutex::new(None),
            workers: config.workers.max(1),
            grace_period: Duration::from_secs(config.grace_period_secs),
        }
    }

    /// Start continuation for a query whose first response was just cached.
    pub fn submit_new(&self, query_id: &str, initial_next_uri: &str, host: &str, backend_url: &str) {
        self.inner.cache.set_state(query_id, QueryState::Started.as_str());
        let request = ContinuationRequest {
            query_id: query_id.to_string(),
            next_uri: initial_next_uri.to_string(),
            host: host.to_string(),
            backend_url: backend_url.to_string(),
        };
        tracing::debug!(query_id, next_uri = %initial_next_uri, "Continuation started");
        self.inner.enqueue(&self.queue_tx, request);
    }

    /// Process one step without enqueueing its follow-up.
    pub async fn process_step(&self, request: &ContinuationRequest) -> StepOutcome {
        self.inner.process_step(request).await
    }

    /// Re-enqueue every query parked in the dropped list.
    pub fn resume_dropped(&self) -> usize {
        if self.inner.context.is_shutting_down() {
            return 0;
        }
        let mut seen = HashSet::new();
        let mut parked = Vec::new();
        while let Some(query_id) = self.inner.cache.pop_dropped() {
            if seen.insert(query_id.clone()) {
                parked.push(query_id);
            }
        }

        let mut resumed = 0;
        for query_id in parked {
            if self.inner.cache.is_completed(&query_id) {
                continue;
            }
            let Some(step) = self.inner.cache.pending(&query_id) else {
                tracing::warn!(query_id = %query_id, "Dropped query has no pending step");
                continue;
            };
            self.inner.enqueue(
                &self.queue_tx,
                ContinuationRequest {
                    query_id,
                    next_uri: step.next_uri,
                    host: step.host,
                    backend_url: step.backend_url,
                },
            );
            resumed += 1;
        }
        if resumed > 0 {
            tracing::info!(resumed, "Resumed dropped query continuations");
        }
        resumed
    }

    /// Steps currently being processed.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Spawn the dispatcher. Calling it twice has no effect.
    pub fn start(&self) {
        let Some(rx) = self.queue_rx.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return;
        };
        let handle = tokio::spawn(dispatch(
            self.inner.clone(),
            rx,
            self.queue_tx.clone(),
            self.workers,
            self.grace_period,
        ));
        *self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        tracing::info!(workers = self.workers, "Continuation poller started");
    }

    /// Wait for the dispatcher to drain after the context was triggered.
    pub async fn shutdown(&self) {
        self.inner.context.trigger();
        let handle = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Continuation dispatcher panicked");
            }
        }
    }
}

async fn dispatch(
    inner: Arc<PollerInner>,
    mut rx: mpsc::UnboundedReceiver<ContinuationRequest>,
    tx: mpsc::UnboundedSender<ContinuationRequest>,
    workers: usize,
    grace_period: Duration,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    let mut shutdown = inner.context.subscribe();

    while !inner.context.is_shutting_down() {
        tokio::select! {
            _ = shutdown.recv() => break,
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            received = rx.recv() => {
                let Some(request) = received else { break };
                let permit = tokio::select! {
                    _ = shutdown.recv() => None,
                    permit = semaphore.clone().acquire_owned() => permit.ok(),
                };
                let Some(permit) = permit else {
                    inner.park(&request);
                    break;
                };

                inner.in_flight.insert(request.query_id.clone(), request.clone());
                let inner = inner.clone();
                let tx = tx.clone();
                tasks.spawn(async move {
                    let outcome = inner.process_step(&request).await;
                    inner.in_flight.remove(&request.query_id);
                    if let Some(next) = outcome.next_request() {
                        inner.enqueue(&tx, next.clone());
                    }
                    drop(permit);
                });
            }
        }
    }

    // Give in-flight steps the grace period, then park whatever is left.
    let drained = tokio::time::timeout(grace_period, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(remaining = tasks.len(), "Grace period elapsed, aborting continuation steps");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }

    let aborted: Vec<ContinuationRequest> = inner.in_flight.iter().map(|e| e.value().clone()).collect();
    inner.in_flight.clear();
    for request in &aborted {
        inner.park(request);
    }

    rx.close();
    let mut queued = 0;
    while let Ok(request) = rx.try_recv() {
        inner.park(&request);
        queued += 1;
    }
    tracing::info!(aborted = aborted.len(), queued, "Continuation poller stopped");
}
