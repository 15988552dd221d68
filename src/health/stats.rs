//! Cluster statistics and their observers.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::registry::BackendDescriptor;

/// One backend's stats from the latest monitor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub backend_name: String,
    pub routing_group: String,
    pub base_url: String,
    pub healthy: bool,
    pub queued_queries: u32,
    pub running_queries: u32,
    pub blocked_queries: u32,
    pub active_workers: u32,
}

/// Body of the cluster stats endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsBody {
    active_workers: u32,
    queued_queries: u32,
    running_queries: u32,
    blocked_queries: u32,
}

impl ClusterStats {
    /// Stats for a backend that could not be sampled.
    pub fn unhealthy(backend: &BackendDescriptor) -> Self {
        Self {
            backend_name: backend.name.clone(),
            routing_group: backend.routing_group.clone(),
            base_url: backend.base_url.clone(),
            healthy: false,
            ..Self::default()
        }
    }

    /// Parse a stats body; `None` when it lacks the expected counters.
    pub fn parse(backend: &BackendDescriptor, body: &[u8]) -> Option<Self> {
        let stats: StatsBody = serde_json::from_slice(body).ok()?;
        Some(Self {
            backend_name: backend.name.clone(),
            routing_group: backend.routing_group.clone(),
            base_url: backend.base_url.clone(),
            healthy: true,
            queued_queries: stats.queued_queries,
            running_queries: stats.running_queries,
            blocked_queries: stats.blocked_queries,
            active_workers: stats.active_workers,
        })
    }
}

/// Receives every cycle's stats, healthy and unhealthy.
pub trait ClusterStatsObserver: Send + Sync {
    fn observe(&self, stats: &[ClusterStats]);
}

/// Keeps the latest stats per backend.
#[derive(Debug, Default)]
pub struct StatsSnapshot {
    latest: ArcSwap<HashMap<String, ClusterStats>>,
}

impl StatsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Arc<HashMap<String, ClusterStats>> {
        self.latest.load_full()
    }

    pub fn get(&self, backend_name: &str) -> Option<ClusterStats> {
        self.latest.load().get(backend_name).cloned()
    }
}

impl ClusterStatsObserver for StatsSnapshot {
    fn observe(&self, stats: &[ClusterStats]) {
        let latest = stats
            .iter()
            .map(|s| (s.backend_name.clone(), s.clone()))
            .collect();
        self.latest.store(Arc::new(latest));
    }
}
