//! Per-routing-group weighted routing table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use rand::seq::IteratorRandom;
use serde::Serialize;

use super::weights::{compute_weights, WeightTable};
use super::RoutingError;
use crate::registry::RoutingGroupState;

/// One monitor cycle's worth of routing input.
#[derive(Debug, Clone, Default)]
pub struct RoutingUpdate {
    /// Group states derived from the registry snapshot.
    pub group_states: HashMap<String, RoutingGroupState>,
    /// Group → backend name → queue length, for healthy backends only.
    pub queue_lengths: HashMap<String, BTreeMap<String, u32>>,
    /// Backend name → base URL.
    pub backend_urls: HashMap<String, String>,
}

/// Immutable view readers pick from.
#[derive(Debug, Default, Serialize)]
pub struct TableSnapshot {
    pub queue_lengths: HashMap<String, BTreeMap<String, u32>>,
    pub weights: HashMap<String, WeightTable>,
    pub group_states: HashMap<String, RoutingGroupState>,
    pub backend_urls: HashMap<String, String>,
}

impl TableSnapshot {
    fn has_samples(&self, group: &str) -> bool {
        self.queue_lengths.get(group).is_some_and(|q| !q.is_empty())
    }

    fn from_update(update: RoutingUpdate) -> Self {
        let weights = Self::weigh(&update.queue_lengths);
        Self {
            queue_lengths: update.queue_lengths,
            weights,
            group_states: update.group_states,
            backend_urls: update.backend_urls,
        }
    }

    fn weigh(queue_lengths: &HashMap<String, BTreeMap<String, u32>>) -> HashMap<String, WeightTable> {
        queue_lengths
            .iter()
            .filter_map(|(group, queues)| {
                if queues.is_empty() {
                    tracing::warn!(group = %group, "No active backends in routing group");
                }
                compute_weights(queues).map(|table| (group.clone(), table))
            })
            .collect()
    }

    fn group_active(&self, group: &str) -> bool {
        self.group_states.get(group).is_some_and(|s| s.active)
    }
}

/// Weighted routing table shared by the monitor (writer) and the proxy (readers).
pub struct WeightedRoutingTable {
    snapshot: ArcSwap<TableSnapshot>,
    /// Serializes rebuild and prune.
    mutation: Mutex<()>,
    adhoc_group: String,
}

impl WeightedRoutingTable {
    pub fn new(adhoc_group: impl Into<String>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(TableSnapshot::default()),
            mutation: Mutex::new(()),
            adhoc_group: adhoc_group.into(),
        }
    }

    pub fn adhoc_group(&self) -> &str {
        &self.adhoc_group
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<TableSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace every group's samples and weights at once.
    pub fn rebuild(&self, update: RoutingUpdate) {
        let _guard = self.mutation.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = TableSnapshot::from_update(update);
        for (group, table) in &snapshot.weights {
            tracing::debug!(group = %group, weights = ?table.weights(), "Routing weights computed");
        }
        self.snapshot.store(Arc::new(snapshot));
    }

    /// Drop backends that left a group's active set and re-weigh from the
    /// remaining samples. Growth is left for the next full rebuild.
    pub fn prune_group_members(&self, group: &str, active: &HashSet<String>) {
        let _guard = self.mutation.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot.load_full();

        let Some(known) = current.queue_lengths.get(group) else {
            return;
        };
        let removed: Vec<&String> = known.keys().filter(|name| !active.contains(*name)).collect();
        if removed.is_empty() {
            return;
        }
        tracing::info!(group = %group, removed = ?removed, "Pruning inactive backends from routing table");

        let mut queue_lengths = current.queue_lengths.clone();
        if let Some(queues) = queue_lengths.get_mut(group) {
            queues.retain(|name, _| active.contains(name));
        }
        let update = RoutingUpdate {
            group_states: current.group_states.clone(),
            queue_lengths,
            backend_urls: current.backend_urls.clone(),
        };
        self.snapshot.store(Arc::new(TableSnapshot::from_update(update)));
    }

    /// Weighted pick of a backend name in `group`.
    pub fn pick_backend(&self, group: &str) -> Option<String> {
        let snapshot = self.snapshot.load();
        let mut rng = rand::thread_rng();
        snapshot
            .weights
            .get(group)
            .and_then(|table| table.pick(&mut rng))
            .map(str::to_string)
            .or_else(|| Self::random_sampled(&snapshot, group, None))
    }

    /// Weighted pick that never returns `exclude`.
    pub fn pick_backend_excluding(&self, group: &str, exclude: &str) -> Option<String> {
        let snapshot = self.snapshot.load();
        let mut rng = rand::thread_rng();
        snapshot
            .weights
            .get(group)
            .and_then(|table| table.excluding(exclude))
            .and_then(|table| table.pick(&mut rng).map(str::to_string))
            .or_else(|| Self::random_sampled(&snapshot, group, Some(exclude)))
    }

    fn random_sampled(snapshot: &TableSnapshot, group: &str, exclude: Option<&str>) -> Option<String> {
        let queues = snapshot.queue_lengths.get(group)?;
        tracing::debug!(group = %group, "Falling back to random distribution");
        queues
            .keys()
            .filter(|name| Some(name.as_str()) != exclude)
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Backend URL for a new query in `group`, avoiding `last_backend_url` when
    /// the group has an alternative. Unusable groups fall back to adhoc, where
    /// the same exclusion applies.
    pub fn provide_backend_for_group(
        &self,
        group: &str,
        last_backend_url: Option<&str>,
    ) -> Result<String, RoutingError> {
        let snapshot = self.snapshot.load();

        if !snapshot.has_samples(group) || !snapshot.group_active(group) {
            tracing::debug!(group = %group, "Routing group paused or without active backends");
            return self.adhoc_backend(last_backend_url);
        }

        let name = self
            .pick_avoiding(&snapshot, group, last_backend_url)
            .ok_or_else(|| RoutingError::GroupUnavailable(group.to_string()))?;
        tracing::debug!(group = %group, backend = %name, "Routing to eligible backend");
        Self::url_of(&snapshot, &name)
    }

    /// Backend URL in the adhoc group.
    pub fn provide_adhoc_backend(&self) -> Result<String, RoutingError> {
        self.adhoc_backend(None)
    }

    fn adhoc_backend(&self, last_backend_url: Option<&str>) -> Result<String, RoutingError> {
        let snapshot = self.snapshot.load();
        let group = self.adhoc_group.as_str();

        if !snapshot.has_samples(group) {
            return Err(RoutingError::NoActiveBackends);
        }
        if !snapshot.group_active(group) {
            return Err(RoutingError::GroupUnavailable(group.to_string()));
        }

        let name = self
            .pick_avoiding(&snapshot, group, last_backend_url)
            .ok_or(RoutingError::NoActiveBackends)?;
        tracing::debug!(group = %group, backend = %name, "Routing to eligible adhoc backend");
        Self::url_of(&snapshot, &name)
    }

    /// Weighted pick in `group` that skips the backend at `last_backend_url`,
    /// unless it is the group's only sampled member.
    fn pick_avoiding(&self, snapshot: &TableSnapshot, group: &str, last_backend_url: Option<&str>) -> Option<String> {
        let exclude = match (last_backend_url, snapshot.queue_lengths.get(group)) {
            (Some(url), Some(queues)) if queues.len() > 1 => {
                let url = url.trim_end_matches('/');
                snapshot
                    .backend_urls
                    .iter()
                    .find(|(name, u)| u.as_str() == url && queues.contains_key(name.as_str()))
                    .map(|(name, _)| name.clone())
            }
            _ => None,
        };

        match &exclude {
            Some(excluded) => self.pick_backend_excluding(group, excluded),
            None => self.pick_backend(group),
        }
    }

    fn url_of(snapshot: &TableSnapshot, name: &str) -> Result<String, RoutingError> {
        snapshot
            .backend_urls
            .get(name)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownBackend(name.to_string()))
    }

    /// Per-backend weights of a group, in table order.
    pub fn weights_for_group(&self, group: &str) -> Option<Vec<(String, u32)>> {
        self.snapshot.load().weights.get(group).map(WeightTable::weights)
    }

    pub fn queue_lengths_for_group(&self, group: &str) -> Option<BTreeMap<String, u32>> {
        self.snapshot.load().queue_lengths.get(group).cloned()
    }
}
