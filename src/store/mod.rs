//! Store coordination
//!
//! The database is four independent SQLite stores that are opened and
//! closed as one unit:
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │  prefix.db   │  │   stats.db   │  │  errors.db   │  │   users.db   │
//! │ prefix ->    │  │ global       │  │ prefix ->    │  │ user list,   │
//! │  PrefixInfo  │  │  aggregate   │  │  failures    │  │ per-user agg │
//! └──────────────┘  └──────────────┘  └──────────────┘  └──────────────┘
//! ```
//!
//! Opening is ordered and rolls back on failure. Closing always visits
//! every store and reports every failure. There is no transaction
//! spanning the stores.

pub mod kv;
pub mod schema;

pub use kv::{KvStore, StoreConfig};
pub use schema::ScanStart;

use crate::error::{DbError, DbResult, Errors};
use std::path::Path;
use tracing::warn;

/// Store file names within the database directory
pub const PREFIX_DB_FILENAME: &str = "prefix.db";
pub const STATS_DB_FILENAME: &str = "stats.db";
pub const ERROR_DB_FILENAME: &str = "errors.db";
pub const USER_DB_FILENAME: &str = "users.db";

/// Store names used in logs and errors
pub mod names {
    pub const PREFIX: &str = "prefix";
    pub const STATS: &str = "stats";
    pub const ERROR: &str = "error";
    pub const USER: &str = "user";
}

/// The four stores making up one database
pub struct StoreSet {
    pub prefix: KvStore,
    pub stats: KvStore,
    pub errors: KvStore,
    pub users: KvStore,
}

impl StoreSet {
    /// Open all stores in order: prefix, stats, error, user.
    ///
    /// If any store fails to open, every store opened before it is
    /// closed again and the open error is returned together with any
    /// errors from that cleanup.
    pub fn open_all(dir: &Path, config: &StoreConfig) -> DbResult<Self> {
        let open = |name, filename| KvStore::open(name, dir.join(filename), config);

        let prefix = open(names::PREFIX, PREFIX_DB_FILENAME)?;
        let stats = match open(names::STATS, STATS_DB_FILENAME) {
            Ok(store) => store,
            Err(err) => return Err(rollback(err, vec![prefix])),
        };
        let errors = match open(names::ERROR, ERROR_DB_FILENAME) {
            Ok(store) => store,
            Err(err) => return Err(rollback(err, vec![prefix, stats])),
        };
        let users = match open(names::USER, USER_DB_FILENAME) {
            Ok(store) => store,
            Err(err) => return Err(rollback(err, vec![prefix, stats, errors])),
        };

        Ok(Self {
            prefix,
            stats,
            errors,
            users,
        })
    }

    /// Close every store, collecting all close errors
    pub fn close_all(self) -> DbResult<()> {
        let mut errs = Errors::new();
        for store in [self.prefix, self.stats, self.errors, self.users] {
            errs.append(store.close());
        }
        errs.into_result()
    }

    /// Commit batched writes in every store
    pub fn sync_all(&self) -> DbResult<()> {
        let mut errs = Errors::new();
        for store in [&self.prefix, &self.stats, &self.errors, &self.users] {
            errs.append(store.sync());
        }
        errs.into_result()
    }
}

/// Close the stores opened before `err` and fold their failures into it
fn rollback(err: DbError, opened: Vec<KvStore>) -> DbError {
    warn!(error = %err, opened = opened.len(), "store failed to open, closing the others");
    let mut errs = Errors::new();
    for store in opened {
        errs.append(store.close());
    }
    err.with_cleanup(errs.into_result())
}
