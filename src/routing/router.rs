//! Query affinity router.
//!
//! Decides where a request goes: the local application, the backend that owns
//! the query it names, or a freshly picked backend for a new query.

use std::sync::Arc;

use axum::http::HeaderMap;
use dashmap::DashMap;
use serde::Serialize;

use super::headers;
use super::policy::RoutingPolicy;
use crate::cache::query_cache::now_secs;
use crate::cache::QueryCache;
use crate::continuation::BackendResolver;
use crate::load_balancer::{RoutingError, WeightedRoutingTable};

/// A query's permanent owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryBinding {
    pub query_id: String,
    pub backend_url: String,
    /// Seconds since the epoch.
    pub created_at: u64,
}

/// Why a target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Not a query engine path.
    PassThrough,
    /// The request names a query that is already bound.
    Affinity,
    /// Picked from the weighted table.
    Fresh,
}

/// Outcome of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub target: String,
    pub kind: RouteKind,
    pub query_id: Option<String>,
    pub routing_group: Option<String>,
}

/// Maps query ids to backends and routes new queries through the table.
pub struct QueryAffinityRouter {
    policy: RoutingPolicy,
    table: Arc<WeightedRoutingTable>,
    cache: QueryCache,
    bindings: DashMap<String, QueryBinding>,
    local_target: String,
}

impl QueryAffinityRouter {
    pub fn new(
        policy: RoutingPolicy,
        table: Arc<WeightedRoutingTable>,
        cache: QueryCache,
        local_application_port: u16,
    ) -> Self {
        Self {
            policy,
            table,
            cache,
            bindings: DashMap::new(),
            local_target: format!("http://localhost:{local_application_port}"),
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn table(&self) -> &Arc<WeightedRoutingTable> {
        &self.table
    }

    /// Choose the target for a request.
    pub fn route_request(
        &self,
        path: &str,
        query: Option<&str>,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<RouteDecision, RoutingError> {
        if !self.policy.is_whitelisted(path) {
            return Ok(RouteDecision {
                target: self.local_target.clone(),
                kind: RouteKind::PassThrough,
                query_id: None,
                routing_group: None,
            });
        }

        let body = String::from_utf8_lossy(body);
        let query_id = self.policy.extract_query_id(path, query, &body);

        if let Some(id) = &query_id {
            if let Some(backend_url) = self.find_backend_for_query(id) {
                tracing::debug!(query_id = %id, backend = %backend_url, "Routing to bound backend");
                return Ok(RouteDecision {
                    target: backend_url,
                    kind: RouteKind::Affinity,
                    query_id,
                    routing_group: None,
                });
            }
            tracing::debug!(query_id = %id, "Query id not bound yet, routing fresh");
        }

        let requested = headers::requested_routing_group(headers);
        let group = requested
            .clone()
            .unwrap_or_else(|| self.table.adhoc_group().to_string());
        let excluded = headers::excluded_backend(headers);

        let target = self
            .table
            .provide_backend_for_group(&group, excluded.as_deref())?;
        tracing::debug!(group = %group, backend = %target, "Routing new query");

        Ok(RouteDecision {
            target,
            kind: RouteKind::Fresh,
            query_id,
            routing_group: Some(group),
        })
    }

    /// Bind a query to the backend that accepted it. The first binding wins.
    pub fn bind_query(&self, query_id: &str, backend_url: &str) -> QueryBinding {
        let backend_url = backend_url.trim_end_matches('/');
        let mut created = false;
        let binding = self
            .bindings
            .entry(query_id.to_string())
            .or_insert_with(|| {
                created = true;
                QueryBinding {
                    query_id: query_id.to_string(),
                    backend_url: backend_url.to_string(),
                    created_at: now_secs(),
                }
            })
            .clone();

        if created {
            self.cache.bind(query_id, &binding.backend_url, binding.created_at);
            tracing::debug!(query_id, backend = %binding.backend_url, "Query bound");
        } else if binding.backend_url != backend_url {
            tracing::warn!(
                query_id,
                bound = %binding.backend_url,
                attempted = %backend_url,
                "Ignoring rebind of query to a different backend"
            );
        }
        binding
    }

    /// The binding of a query, from memory or, after a restart, the cache.
    pub fn binding(&self, query_id: &str) -> Option<QueryBinding> {
        if let Some(binding) = self.bindings.get(query_id) {
            return Some(binding.clone());
        }
        let (backend_url, created_at) = self.cache.binding(query_id)?;
        let binding = QueryBinding {
            query_id: query_id.to_string(),
            backend_url,
            created_at,
        };
        Some(
            self.bindings
                .entry(query_id.to_string())
                .or_insert(binding)
                .clone(),
        )
    }

    pub fn find_backend_for_query(&self, query_id: &str) -> Option<String> {
        self.binding(query_id).map(|b| b.backend_url)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

impl BackendResolver for QueryAffinityRouter {
    fn backend_for_query(&self, query_id: &str) -> Option<String> {
        self.find_backend_for_query(query_id)
    }
}
