//! Proxy request and response hooks.
//!
//! The server calls `route_request` before forwarding and `on_response` with
//! the buffered exchange before answering the client, so a query is bound
//! before its id ever reaches the client.

use std::sync::Arc;

use axum::http::{HeaderMap, Method};

use crate::cache::{CachedMessage, QueryCache};
use crate::continuation::{ContinuationPoller, QueryResults, QueryState};
use crate::load_balancer::RoutingError;
use crate::routing::headers;
use crate::routing::paths::is_statement_path;
use crate::routing::{QueryAffinityRouter, RouteDecision};

/// Characters of query text included in debug logs.
const LOGGED_QUERY_CHARS: usize = 200;

/// A buffered request and the backend's answer to it.
#[derive(Debug, Clone)]
pub struct ProxiedExchange {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub request_headers: HeaderMap,
    pub request_body: String,
    pub status: u16,
    pub response_headers: HeaderMap,
    pub response_body: String,
    /// Backend that answered.
    pub backend_url: String,
}

pub struct ProxyHooks {
    router: Arc<QueryAffinityRouter>,
    cache: QueryCache,
    poller: Option<Arc<ContinuationPoller>>,
}

impl ProxyHooks {
    pub fn new(
        router: Arc<QueryAffinityRouter>,
        cache: QueryCache,
        poller: Option<Arc<ContinuationPoller>>,
    ) -> Self {
        Self { router, cache, poller }
    }

    pub fn router(&self) -> &Arc<QueryAffinityRouter> {
        &self.router
    }

    pub fn route_request(
        &self,
        path: &str,
        query: Option<&str>,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<RouteDecision, RoutingError> {
        self.router.route_request(path, query, body, headers)
    }

    /// Bind and cache a successfully submitted query.
    pub fn on_response(&self, exchange: &ProxiedExchange) {
        if exchange.method != Method::POST
            || exchange.status != 200
            || !is_statement_path(&exchange.path)
        {
            return;
        }

        let results = match QueryResults::parse(&exchange.response_body) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(path = %exchange.path, error = %e, "Unparseable submit response");
                return;
            }
        };
        let Some(query_id) = results.id.as_deref() else {
            tracing::debug!(path = %exchange.path, "Submit response carries no query id");
            return;
        };

        self.router.bind_query(query_id, &exchange.backend_url);
        log_query_details(query_id, exchange);

        let request = CachedMessage::request(header_pairs(&exchange.request_headers), exchange.request_body.as_str());
        let response = CachedMessage::response(
            exchange.status,
            header_pairs(&exchange.response_headers),
            exchange.response_body.as_str(),
        );

        if let Some(transaction_id) = headers::transaction_id(&exchange.request_headers) {
            // A resubmission: the poller that sent it keeps polling the new id.
            self.cache.link_transaction(query_id, &transaction_id);
            self.cache.cache_initial(query_id, &request, &response);
            return;
        }

        self.cache.cache_initial(query_id, &request, &response);
        match (&results.next_uri, &self.poller) {
            (Some(next_uri), Some(poller)) => {
                let host = headers::header(&exchange.request_headers, "host").unwrap_or_default();
                poller.submit_new(query_id, next_uri, &host, &exchange.backend_url);
            }
            (Some(_), None) => {}
            (None, _) => {
                let state = if results.error.is_some() {
                    QueryState::FailedTerminal
                } else {
                    QueryState::Completed
                };
                self.cache.set_state(query_id, state.as_str());
                self.cache.mark_completed(query_id);
            }
        }
    }

    /// Cached answer for a client polling `path` of `query_id`.
    pub fn cached_response(&self, path: &str, query_id: &str) -> Option<CachedMessage> {
        self.cache.cached_response_for(path, query_id)
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn log_query_details(query_id: &str, exchange: &ProxiedExchange) {
    let user = headers::user(&exchange.request_headers).unwrap_or_default();
    let source = headers::source(&exchange.request_headers).unwrap_or_default();
    let text: String = exchange.request_body.chars().take(LOGGED_QUERY_CHARS).collect();
    tracing::debug!(
        query_id,
        user = %user,
        source = %source,
        backend = %exchange.backend_url,
        query = %text,
        "Query submitted"
    );
}
