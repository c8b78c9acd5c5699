//! prefixdb - Local statistics store for filesystem crawls
//!
//! Records one summary per directory prefix (owner, file count, child
//! count, disk usage, traversal error) and answers aggregate queries
//! over them: totals and top-N rankings, globally or per user.
//!
//! # Features
//!
//! - **Single writer, many readers**: an exclusive advisory lock on the
//!   database directory for writers, shared for readers. A writer leaves
//!   a small JSON file naming itself so that waiting processes can report
//!   who holds the database.
//!
//! - **Crash-safe storage**: four SQLite files, one key/value table each,
//!   with writes optionally batched and committed on a fixed interval.
//!
//! - **Online aggregation**: totals and rankings are maintained in memory
//!   as records are set and persisted on save.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Database                                 │
//! │   set / get / total / top_n / scan / save / close                │
//! └──────┬──────────────────────┬───────────────────────┬───────────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌──────────────┐    ┌────────────────────┐   ┌─────────────────────┐
//! │   DirLock    │    │     Aggregates     │   │      StoreSet       │
//! │ db.lock      │    │ global collection  │   │ prefix.db  stats.db │
//! │ db.info      │    │ per-user (lazy)    │   │ errors.db  users.db │
//! └──────────────┘    └────────────────────┘   └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use prefixdb::{Context, Database, DatabaseOptions, MetricName, PrefixInfo, Scope};
//!
//! # fn main() -> prefixdb::DbResult<()> {
//! let db = Database::open(&Context::background(), "/var/db/crawl", DatabaseOptions::new())?;
//! db.set("/home/alice", &PrefixInfo::new("alice").with_files(3).with_disk_usage(4096))?;
//! let files = db.total(MetricName::TotalFileCount, &Scope::Global)?;
//! let top = db.top_n(MetricName::TotalDiskUsage, 10, &Scope::user("alice"))?;
//! db.close()?;
//! # let _ = (files, top);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod lock;
pub mod report;
pub mod scanner;
pub mod stats;
pub mod store;
pub mod types;

pub use config::{CliArgs, DatabaseOptions};
pub use database::Database;
pub use error::{DbError, DbResult, Errors};
pub use lock::{lock_holder, CancelHandle, Context, LockInfo};
pub use scanner::{ScanOptions, Scanner};
pub use types::{Metric, MetricName, PrefixInfo, Scope};
