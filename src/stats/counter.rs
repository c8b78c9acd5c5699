//! Per-prefix counters with a running sum and top-N ranking

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Accumulated values of one metric, keyed by prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    values: HashMap<String, u64>,
    sum: u64,
}

/// Ranking order: larger values first, then ascending key
fn rank(a: &(&str, u64), b: &(&str, u64)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the value for `key`
    pub fn add(&mut self, key: &str, delta: u64) {
        match self.values.get_mut(key) {
            Some(value) => *value = value.saturating_add(delta),
            None => {
                self.values.insert(key.to_string(), delta);
            }
        }
        self.sum = self.sum.saturating_add(delta);
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.values.get(key).copied()
    }

    /// Total over every key
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Up to `n` entries by descending value, ties broken by ascending key
    pub fn top_n(&self, n: usize) -> Vec<(String, u64)> {
        if n == 0 || self.values.is_empty() {
            return Vec::new();
        }

        let mut entries: Vec<(&str, u64)> = self
            .values
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();

        // Partition the best n to the front before sorting just those
        if n < entries.len() {
            entries.select_nth_unstable_by(n - 1, rank);
            entries.truncate(n);
        }
        entries.sort_unstable_by(rank);

        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}
