//! Aggregation engine
//!
//! A [`StatsCollection`] keeps one [`Counter`] per metric, each mapping a
//! prefix to its accumulated value. Updates accumulate, so a prefix
//! revisited by the crawler adds to what was recorded before.
//!
//! # Module Structure
//!
//! - `counter`: per-prefix counters with sum and top-N
//! - `per_user`: known users and their lazily loaded collections

pub mod counter;
pub mod per_user;

pub use counter::Counter;
pub use per_user::{PerUserStats, USER_LIST_KEY};

use crate::error::{DbResult, Errors};
use crate::store::KvStore;
use crate::types::{Metric, MetricName, PrefixInfo};
use serde::{Deserialize, Serialize};

/// Key holding the global collection in the stats store
pub const GLOBAL_STATS_KEY: &str = "__globalStats";

/// Per-metric, per-prefix accumulated values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsCollection {
    num_files: Counter,
    num_children: Counter,
    disk_usage: Counter,
}

impl StatsCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the counts in `info` to `prefix`
    pub fn update(&mut self, prefix: &str, info: &PrefixInfo) {
        self.num_files.add(prefix, info.file_count);
        self.num_children.add(prefix, info.child_count);
        self.disk_usage.add(prefix, info.disk_usage);
    }

    pub fn counter(&self, name: MetricName) -> &Counter {
        match name {
            MetricName::TotalFileCount => &self.num_files,
            MetricName::TotalPrefixCount => &self.num_children,
            MetricName::TotalDiskUsage => &self.disk_usage,
        }
    }

    /// Total of `name` over every prefix
    pub fn sum(&self, name: MetricName) -> u64 {
        self.counter(name).sum()
    }

    /// Highest `n` prefixes for `name`
    pub fn top_n(&self, name: MetricName, n: usize) -> Vec<Metric> {
        self.counter(name)
            .top_n(n)
            .into_iter()
            .map(|(prefix, value)| Metric { prefix, value })
            .collect()
    }

    /// Number of distinct prefixes seen
    pub fn prefix_count(&self) -> usize {
        self.num_files.len()
    }

    pub fn load(store: &KvStore, key: &str) -> DbResult<Option<Self>> {
        store.get(key)
    }

    pub fn save(&self, store: &KvStore, key: &str) -> DbResult<()> {
        store.set(key, self)
    }
}

/// The global collection plus every per-user collection
#[derive(Debug, Default)]
pub struct Aggregates {
    pub global: StatsCollection,
    pub users: PerUserStats,
}

impl Aggregates {
    /// Empty aggregates; persisted per-user collections are ignored when
    /// `load_persisted` is false
    pub fn new(load_persisted: bool) -> Self {
        Self {
            global: StatsCollection::new(),
            users: PerUserStats::new(load_persisted),
        }
    }

    /// Load the global collection and the user list
    pub fn load(&mut self, stats: &KvStore, users: &KvStore) -> DbResult<()> {
        if let Some(global) = StatsCollection::load(stats, GLOBAL_STATS_KEY)? {
            self.global = global;
        }
        self.users.load_user_list(users)
    }

    /// Persist the global collection and every per-user collection
    pub fn save(&self, stats: &KvStore, users: &KvStore) -> DbResult<()> {
        let mut errs = Errors::new();
        errs.append(self.global.save(stats, GLOBAL_STATS_KEY));
        errs.append(self.users.save(users));
        errs.into_result()
    }
}
