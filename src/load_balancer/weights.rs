//! Queue-length based weight computation.
//!
//! Backends with shorter queues get larger weights. The most loaded backend
//! gets a weight derived from how skewed the rest of the group is.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;

pub const MIN_WEIGHT: u32 = 1;
pub const MAX_WEIGHT: u32 = 100;

/// Cumulative weight table for one routing group.
///
/// Entries are `(running_sum, backend_name)` in ascending queue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightTable {
    entries: Vec<(u32, String)>,
    weight_sum: u32,
}

impl WeightTable {
    /// Build a cumulative table from per-backend weights, in the given order.
    pub fn from_weights<I, S>(weights: I) -> Option<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut sum = 0u32;
        let entries: Vec<(u32, String)> = weights
            .into_iter()
            .filter(|(_, w)| *w > 0)
            .map(|(name, w)| {
                sum += w;
                (sum, name.into())
            })
            .collect();
        if entries.is_empty() {
            return None;
        }
        Some(Self {
            entries,
            weight_sum: sum,
        })
    }

    pub fn entries(&self) -> &[(u32, String)] {
        &self.entries
    }

    pub fn weight_sum(&self) -> u32 {
        self.weight_sum
    }

    /// Per-backend weights (the slice each backend owns of the table).
    pub fn weights(&self) -> Vec<(String, u32)> {
        let mut previous = 0;
        self.entries
            .iter()
            .map(|(cumulative, name)| {
                let weight = cumulative - previous;
                previous = *cumulative;
                (name.clone(), weight)
            })
            .collect()
    }

    pub fn weight_of(&self, name: &str) -> Option<u32> {
        self.weights()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, w)| w)
    }

    /// First entry whose cumulative weight is strictly greater than `draw`.
    pub fn select(&self, draw: u32) -> Option<&str> {
        let idx = self.entries.partition_point(|(cumulative, _)| *cumulative <= draw);
        self.entries.get(idx).map(|(_, name)| name.as_str())
    }

    /// Weighted random pick.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        if self.weight_sum == 0 {
            return None;
        }
        self.select(rng.gen_range(0..self.weight_sum))
    }

    /// Same table without `name`; the remaining ratios are unchanged.
    pub fn excluding(&self, name: &str) -> Option<WeightTable> {
        WeightTable::from_weights(self.weights().into_iter().filter(|(n, _)| n != name))
    }
}

/// Weight for the backend with the longest queue.
///
/// `sorted` is in ascending queue order and holds at least two entries.
fn max_queue_weight(sorted: &[(&str, u32)]) -> u32 {
    let count = sorted.len() as u64;
    let sum: u64 = sorted.iter().map(|(_, q)| *q as u64).sum();
    let mean = sum / count;

    let smallest = sorted[0].1;
    let max = sorted[sorted.len() - 1].1;
    let second_max = sorted[sorted.len() - 2].1;

    if max == 0 {
        return MAX_WEIGHT;
    }
    if second_max == 0 || second_max == max {
        return MIN_WEIGHT;
    }

    let max_f = max as f64;
    let second_weight = (MAX_WEIGHT as f64 - (second_max as f64 * MAX_WEIGHT as f64) / max_f).ceil();
    let fraction = smallest as f64 / max_f;
    let mut weight = (fraction * second_weight).ceil() as u32;

    let (second_max, smallest) = (second_max as u64, smallest as u64);
    if second_max < mean || (second_max > mean && smallest <= mean) {
        weight = if smallest == 0 {
            MIN_WEIGHT
        } else {
            (fraction * fraction * second_weight).ceil() as u32
        };
    }

    weight.max(MIN_WEIGHT)
}

/// Compute the weight table for one routing group.
///
/// Returns `None` for an empty group.
pub fn compute_weights(queue_lengths: &BTreeMap<String, u32>) -> Option<WeightTable> {
    match queue_lengths.len() {
        0 => return None,
        1 => {
            return queue_lengths
                .keys()
                .next()
                .and_then(|name| WeightTable::from_weights([(name.as_str(), MAX_WEIGHT)]));
        }
        _ => {}
    }

    // BTreeMap iterates by name, so the stable sort breaks ties by name.
    let mut sorted: Vec<(&str, u32)> = queue_lengths
        .iter()
        .map(|(name, queue)| (name.as_str(), *queue))
        .collect();
    sorted.sort_by_key(|(_, queue)| *queue);

    let max = sorted[sorted.len() - 1].1;
    let max_weight = max_queue_weight(&sorted);

    WeightTable::from_weights(sorted.iter().map(|(name, queue)| {
        let weight = if *queue == max {
            max_weight
        } else {
            (MAX_WEIGHT as f64 - (*queue as f64 * MAX_WEIGHT as f64) / max as f64).ceil() as u32
        };
        (*name, weight)
    }))
}
