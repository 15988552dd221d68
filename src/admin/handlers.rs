use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AdminState;
use crate::health::ClusterStats;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub backends: usize,
    pub healthy_backends: usize,
    pub bound_queries: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendStatus {
    pub name: String,
    pub routing_group: String,
    pub base_url: String,
    pub active: bool,
    /// Missing until the backend has been sampled once.
    pub stats: Option<BackendStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendStats {
    pub healthy: bool,
    pub queued_queries: u32,
    pub running_queries: u32,
    pub blocked_queries: u32,
    pub active_workers: u32,
}

impl From<ClusterStats> for BackendStats {
    fn from(s: ClusterStats) -> Self {
        Self {
            healthy: s.healthy,
            queued_queries: s.queued_queries,
            running_queries: s.running_queries,
            blocked_queries: s.blocked_queries,
            active_workers: s.active_workers,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupRouting {
    pub group: String,
    pub active: bool,
    pub weights: BTreeMap<String, u32>,
    pub queue_lengths: BTreeMap<String, u32>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let stats = state.stats.latest();
    let status = if state.context.is_shutting_down() {
        "shutting_down"
    } else {
        "operational"
    };
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: status.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        backends: state.registry.list_backends().len(),
        healthy_backends: stats.values().filter(|s| s.healthy).count(),
        bound_queries: state.router.binding_count(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let statuses = state
        .registry
        .list_backends()
        .into_iter()
        .map(|b| BackendStatus {
            stats: state.stats.get(&b.name).map(BackendStats::from),
            name: b.name,
            routing_group: b.routing_group,
            base_url: b.base_url,
            active: b.active,
        })
        .collect();
    Json(statuses)
}

pub async fn get_group_routing(
    State(state): State<AdminState>,
    Path(group): Path<String>,
) -> Result<Json<GroupRouting>, StatusCode> {
    let snapshot = state.table.snapshot();
    let queue_lengths = snapshot
        .queue_lengths
        .get(&group)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;
    let weights = snapshot
        .weights
        .get(&group)
        .map(|t| t.weights().into_iter().collect())
        .unwrap_or_default();
    let active = snapshot.group_states.get(&group).is_some_and(|s| s.active);

    Ok(Json(GroupRouting {
        group,
        active,
        weights,
        queue_lengths,
    }))
}
