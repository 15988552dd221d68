//! Periodic cluster stats poll.
//!
//! # Responsibilities
//! - Fetch stats from every active backend of an unpaused group
//! - Feed queue lengths and group states to the routing table
//! - Forward raw stats to observers

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::stream::{self, StreamExt};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;

use super::stats::{ClusterStats, ClusterStatsObserver};
use crate::config::schema::MonitorConfig;
use crate::lifecycle::GatewayContext;
use crate::load_balancer::{RoutingUpdate, WeightedRoutingTable};
use crate::registry::{BackendDescriptor, BackendRegistry, RoutingGroupState};

/// Largest stats body read.
const MAX_STATS_BODY: usize = 1024 * 1024;

pub struct ClusterMonitor {
    registry: Arc<dyn BackendRegistry>,
    table: Arc<WeightedRoutingTable>,
    observers: Vec<Arc<dyn ClusterStatsObserver>>,
    client: Client<HttpConnector, Body>,
    config: MonitorConfig,
}

impl ClusterMonitor {
    pub fn new(
        registry: Arc<dyn BackendRegistry>,
        table: Arc<WeightedRoutingTable>,
        config: MonitorConfig,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeout_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            registry,
            table,
            observers: Vec::new(),
            client,
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ClusterStatsObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Poll until shutdown. Each cycle starts `interval_secs` after the previous ended.
    pub async fn run(self: Arc<Self>, context: Arc<GatewayContext>) {
        if !self.config.enabled {
            tracing::info!("Cluster monitor disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            concurrency = self.config.concurrency,
            "Cluster monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs);
        let mut shutdown = context.subscribe();

        while !context.is_shutting_down() {
            tokio::select! {
                _ = self.run_once() => {}
                _ = shutdown.recv() => break,
            }
            tokio::select! {
                _ = time::sleep(interval) => {}
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Cluster monitor stopped");
    }

    /// One full cycle: fetch, rebuild the table, notify observers.
    pub async fn run_once(&self) -> Vec<ClusterStats> {
        let backends = self.registry.list_backends();
        let paused = self.registry.routing_group_pause_state();
        let is_paused = |group: &str| paused.get(group).copied().unwrap_or(false);

        let fetches: Vec<_> = backends
            .iter()
            .filter(|b| b.active && !is_paused(&b.routing_group))
            .cloned()
            .map(|backend| self.fetch_stats(backend))
            .collect();

        let stats: Vec<ClusterStats> = stream::iter(fetches)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut group_states = RoutingGroupState::from_backends(&backends);
        for state in group_states.values_mut() {
            state.active = state.active && !is_paused(&state.name);
        }

        let mut queue_lengths: HashMap<String, BTreeMap<String, u32>> = HashMap::new();
        for s in stats.iter().filter(|s| s.healthy) {
            queue_lengths
                .entry(s.routing_group.clone())
                .or_default()
                .insert(s.backend_name.clone(), s.queued_queries);
        }

        let backend_urls = backends
            .iter()
            .map(|b| (b.name.clone(), b.base_url.clone()))
            .collect();

        let healthy = stats.iter().filter(|s| s.healthy).count();
        tracing::debug!(sampled = stats.len(), healthy, "Cluster stats cycle finished");

        self.table.rebuild(RoutingUpdate {
            group_states,
            queue_lengths,
            backend_urls,
        });
        for observer in &self.observers {
            observer.observe(&stats);
        }
        stats
    }

    async fn fetch_stats(&self, backend: BackendDescriptor) -> ClusterStats {
        let url = backend.stats_url();
        let request = match Request::builder()
            .method("GET")
            .uri(&url)
            .header("user-agent", "query-gateway-monitor")
            .header("accept", "application/json")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(backend = %backend.name, url = %url, error = %e, "Failed to build stats request");
                return ClusterStats::unhealthy(&backend);
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let fetch = async {
            let response: hyper::Response<hyper::body::Incoming> =
                self.client.request(request).await.map_err(|e| e.to_string())?;
            let status = response.status();
            let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_STATS_BODY)
                .await
                .map_err(|e| e.to_string())?;
            Ok::<_, String>((status, body))
        };

        match time::timeout(timeout, fetch).await {
            Ok(Ok((status, body))) if status == StatusCode::OK => match ClusterStats::parse(&backend, &body) {
                Some(stats) => {
                    tracing::debug!(
                        backend = %backend.name,
                        queued = stats.queued_queries,
                        running = stats.running_queries,
                        workers = stats.active_workers,
                        "Cluster stats fetched"
                    );
                    stats
                }
                None => {
                    tracing::warn!(backend = %backend.name, "Malformed cluster stats");
                    ClusterStats::unhealthy(&backend)
                }
            },
            Ok(Ok((status, _))) => {
                tracing::warn!(backend = %backend.name, status = %status, "Stats fetch failed: non-200 status");
                ClusterStats::unhealthy(&backend)
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.name, error = %e, "Stats fetch failed: connection error");
                ClusterStats::unhealthy(&backend)
            }
            Err(_) => {
                tracing::warn!(backend = %backend.name, "Stats fetch failed: timeout");
                ClusterStats::unhealthy(&backend)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;

    fn monitor(backends: Vec<BackendDescriptor>) -> (Arc<ClusterMonitor>, Arc<WeightedRoutingTable>) {
        let registry = Arc::new(StaticRegistry::new(backends, HashMap::new()));
        let table = Arc::new(WeightedRoutingTable::new("adhoc"));
        let config = MonitorConfig {
            interval_secs: 1,
            timeout_secs: 1,
            ..MonitorConfig::default()
        };
        (Arc::new(ClusterMonitor::new(registry, table.clone(), config)), table)
    }

    #[tokio::test]
    async fn test_spawned_loop_ticks_and_stops() {
        // Nothing listens on port 1: the backend is sampled as unhealthy.
        let (monitor, table) = monitor(vec![BackendDescriptor::new("a1", "http://127.0.0.1:1", "adhoc")]);
        let context = Arc::new(GatewayContext::new());
        let handle = tokio::spawn(monitor.run(context.clone()));

        let ticked = time::timeout(Duration::from_secs(5), async {
            while !table.snapshot().group_states.contains_key("adhoc") {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(ticked.is_ok(), "first cycle rebuilt the table");
        assert!(table.queue_lengths_for_group("adhoc").is_none());

        context.trigger();
        assert!(time::timeout(Duration::from_secs(5), handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_inactive_backends_are_not_fetched() {
        let mut inactive = BackendDescriptor::new("a2", "http://127.0.0.1:1", "adhoc");
        inactive.active = false;
        let (monitor, _) = monitor(vec![inactive]);
        assert!(monitor.run_once().await.is_empty());
    }
}
