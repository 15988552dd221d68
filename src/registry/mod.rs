//! Backend registry: the source of truth for clusters and routing groups.
//!
//! # Data Flow
//! ```text
//! GatewayConfig.backends / routing_groups
//!     → StaticRegistry (ArcSwap snapshot)
//!     → ClusterMonitor reads list_backends() + routing_group_pause_state()
//!
//! Config reload:
//!     ConfigWatcher → StaticRegistry::replace()
//! ```
//!
//! # Design Decisions
//! - Consumers only see immutable snapshots; writers swap a new Arc in
//! - Persistence of cluster records is someone else's job, so the trait is small

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::schema::{BackendConfig, GatewayConfig, RoutingGroupConfig};
pub use crate::config::schema::StatsDialect;

/// Stats path exposed by Trino clusters.
pub const TRINO_STATS_PATH: &str = "/ui/api/stats";

/// Stats path exposed by Presto clusters.
pub const PRESTO_STATS_PATH: &str = "/v1/cluster";

impl StatsDialect {
    /// Resolve the stats endpoint path for a backend.
    pub fn stats_path(self, base_url: &str) -> &'static str {
        match self {
            StatsDialect::Trino => TRINO_STATS_PATH,
            StatsDialect::Presto => PRESTO_STATS_PATH,
            StatsDialect::Auto => {
                if base_url.contains("trino") || base_url.contains("dashboard") {
                    TRINO_STATS_PATH
                } else {
                    PRESTO_STATS_PATH
                }
            }
        }
    }
}

/// One query-engine cluster as the registry sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub base_url: String,
    pub routing_group: String,
    pub active: bool,
    pub dialect: StatsDialect,
}

impl BackendDescriptor {
    pub fn new(name: &str, base_url: &str, routing_group: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            routing_group: routing_group.to_string(),
            active: true,
            dialect: StatsDialect::Auto,
        }
    }

    /// Full URL of this backend's stats endpoint.
    pub fn stats_url(&self) -> String {
        format!("{}{}", self.base_url, self.dialect.stats_path(&self.base_url))
    }
}

impl From<&BackendConfig> for BackendDescriptor {
    fn from(config: &BackendConfig) -> Self {
        Self {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            routing_group: config.routing_group.clone(),
            active: config.active,
            dialect: config.dialect,
        }
    }
}

/// Derived per-group view, recomputed from a backend snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingGroupState {
    pub name: String,
    pub active: bool,
    pub total_members: usize,
    pub active_members: usize,
}

impl RoutingGroupState {
    /// Group states for every group that has at least one member.
    pub fn from_backends(backends: &[BackendDescriptor]) -> HashMap<String, RoutingGroupState> {
        let mut groups: HashMap<String, RoutingGroupState> = HashMap::new();
        for backend in backends {
            let state = groups
                .entry(backend.routing_group.clone())
                .or_insert_with(|| RoutingGroupState {
                    name: backend.routing_group.clone(),
                    active: false,
                    total_members: 0,
                    active_members: 0,
                });
            state.total_members += 1;
            if backend.active {
                state.active_members += 1;
                state.active = true;
            }
        }
        groups
    }
}

/// Read access to cluster membership.
pub trait BackendRegistry: Send + Sync {
    /// Snapshot of every known backend, active or not.
    fn list_backends(&self) -> Vec<BackendDescriptor>;

    /// Routing group name → paused.
    fn routing_group_pause_state(&self) -> HashMap<String, bool>;
}

#[derive(Debug, Default)]
struct RegistrySnapshot {
    backends: Vec<BackendDescriptor>,
    paused: HashMap<String, bool>,
}

/// Registry fed from the configuration file.
pub struct StaticRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
}

impl StaticRegistry {
    pub fn new(backends: Vec<BackendDescriptor>, paused: HashMap<String, bool>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot { backends, paused }),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let (backends, paused) = Self::snapshot_parts(config);
        Self::new(backends, paused)
    }

    /// Swap in membership from a reloaded configuration.
    pub fn replace(&self, config: &GatewayConfig) {
        let (backends, paused) = Self::snapshot_parts(config);
        tracing::info!(backends = backends.len(), "Registry updated");
        self.snapshot
            .store(Arc::new(RegistrySnapshot { backends, paused }));
    }

    fn snapshot_parts(config: &GatewayConfig) -> (Vec<BackendDescriptor>, HashMap<String, bool>) {
        let backends = config.backends.iter().map(BackendDescriptor::from).collect();
        let paused = config
            .routing_groups
            .iter()
            .map(|RoutingGroupConfig { name, paused }| (name.clone(), *paused))
            .collect();
        (backends, paused)
    }
}

impl BackendRegistry for StaticRegistry {
    fn list_backends(&self) -> Vec<BackendDescriptor> {
        self.snapshot.load().backends.clone()
    }

    fn routing_group_pause_state(&self) -> HashMap<String, bool> {
        self.snapshot.load().paused.clone()
    }
}
