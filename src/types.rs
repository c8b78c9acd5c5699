//! Record and query types
//!
//! These types describe what the crawler hands to the database and what
//! the aggregation queries hand back.

use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Summary of a single filesystem prefix (directory)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixInfo {
    /// Owner the prefix is attributed to for per-user statistics
    pub user_id: String,

    /// Number of files directly under the prefix
    pub file_count: u64,

    /// Number of child prefixes directly under the prefix
    pub child_count: u64,

    /// Cumulative bytes used by the files under the prefix
    pub disk_usage: u64,

    /// Traversal failure for this prefix, empty when none occurred
    pub err: String,
}

impl PrefixInfo {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_files(mut self, count: u64) -> Self {
        self.file_count = count;
        self
    }

    pub fn with_children(mut self, count: u64) -> Self {
        self.child_count = count;
        self
    }

    pub fn with_disk_usage(mut self, bytes: u64) -> Self {
        self.disk_usage = bytes;
        self
    }

    pub fn with_error(mut self, err: impl Into<String>) -> Self {
        self.err = err.into();
        self
    }

    /// Check if the crawler recorded a failure for this prefix
    pub fn has_error(&self) -> bool {
        !self.err.is_empty()
    }

    /// Value of the given metric for this record alone
    pub fn metric(&self, name: MetricName) -> u64 {
        match name {
            MetricName::TotalFileCount => self.file_count,
            MetricName::TotalPrefixCount => self.child_count,
            MetricName::TotalDiskUsage => self.disk_usage,
        }
    }
}

/// Metrics maintained by the aggregation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricName {
    /// Number of files
    TotalFileCount,
    /// Number of child prefixes
    TotalPrefixCount,
    /// Bytes used
    TotalDiskUsage,
}

impl MetricName {
    /// Every supported metric, sorted by name
    pub fn all() -> Vec<MetricName> {
        let mut metrics = vec![
            MetricName::TotalFileCount,
            MetricName::TotalPrefixCount,
            MetricName::TotalDiskUsage,
        ];
        metrics.sort_by_key(|m| m.as_str());
        metrics
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::TotalFileCount => "totalFileCount",
            MetricName::TotalPrefixCount => "totalPrefixCount",
            MetricName::TotalDiskUsage => "totalDiskUsage",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "totalFileCount" | "files" => Ok(MetricName::TotalFileCount),
            "totalPrefixCount" | "prefixes" => Ok(MetricName::TotalPrefixCount),
            "totalDiskUsage" | "disk" => Ok(MetricName::TotalDiskUsage),
            other => Err(DbError::UnsupportedMetric(other.to_string())),
        }
    }
}

/// One ranked entry from a top-N query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub prefix: String,
    pub value: u64,
}

impl Metric {
    pub fn new(prefix: impl Into<String>, value: u64) -> Self {
        Self {
            prefix: prefix.into(),
            value,
        }
    }
}

/// Which aggregate a query reads from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
    /// Statistics over every record
    #[default]
    Global,
    /// Statistics over the records attributed to one user
    User(String),
}

impl Scope {
    pub fn user(id: impl Into<String>) -> Self {
        Scope::User(id.into())
    }
}
