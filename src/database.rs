//! The database handle
//!
//! A [`Database`] ties together the directory lock, the four stores and
//! the in-memory aggregates. Opening follows a fixed sequence and any
//! failure along the way releases whatever was already acquired:
//!
//! ```text
//!   open ──► acquire lock ──► open stores ──► load aggregates ──► ready
//!                 │                │                 │
//!                 ▼                ▼                 ▼
//!               error     release lock      close stores + lock
//! ```
//!
//! Every `set` updates the aggregates first and then persists the raw
//! record; a record that cannot be persisted still counts, and the
//! failure is noted in the error store. Aggregates are only persisted by
//! [`Database::flush`], [`Database::save`] and [`Database::close`].

use crate::config::DatabaseOptions;
use crate::error::{DbError, DbResult, Errors};
use crate::lock::{Context, DirLock};
use crate::stats::{Aggregates, StatsCollection};
use crate::store::StoreSet;
use crate::types::{Metric, MetricName, PrefixInfo, Scope};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An open prefix statistics database.
///
/// Dropping the handle releases the lock, but aggregates are not saved
/// and batched writes not yet synced are lost; call [`Database::close`].
pub struct Database {
    dir: PathBuf,
    opts: DatabaseOptions,
    lock: DirLock,
    pub(crate) stores: StoreSet,
    /// Lock order: aggregates before any store connection
    aggregates: Mutex<Aggregates>,
}

impl Database {
    /// Open the database in `dir`, waiting for the lock as `opts` allow.
    ///
    /// Read-write opens create the directory if needed and take the
    /// exclusive lock; read-only opens take a shared lock and require the
    /// stores to exist already.
    pub fn open<P: AsRef<Path>>(ctx: &Context, dir: P, opts: DatabaseOptions) -> DbResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !opts.read_only {
            fs::create_dir_all(&dir)?;
        }

        let lock = DirLock::acquire(
            ctx,
            &dir,
            !opts.read_only,
            opts.lock_status_delay,
            opts.try_lock,
        )?;

        let stores = match StoreSet::open_all(&dir, &opts.store_config()) {
            Ok(stores) => stores,
            Err(e) => return Err(e.with_cleanup(lock.release())),
        };

        let mut aggregates = Aggregates::new(!opts.reset_stats);
        if opts.reset_stats {
            info!(dir = %dir.display(), "ignoring persisted statistics");
        } else if let Err(e) = aggregates.load(&stores.stats, &stores.users) {
            return Err(e.with_cleanup(release_all(stores, lock)));
        }

        info!(
            dir = %dir.display(),
            read_only = opts.read_only,
            users = aggregates.users.user_ids().len(),
            "opened database"
        );

        Ok(Self {
            dir,
            opts,
            lock,
            stores,
            aggregates: Mutex::new(aggregates),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.opts
    }

    pub fn is_read_only(&self) -> bool {
        self.opts.read_only
    }

    /// Record `info` for `prefix`.
    ///
    /// The aggregates are always updated. The record is then persisted,
    /// along with an error store entry if it carries an error or could not
    /// be written. Every failure is returned; nothing is rolled back.
    pub fn set(&self, prefix: &str, info: &PrefixInfo) -> DbResult<()> {
        if self.opts.read_only {
            return Err(DbError::ReadOnly);
        }

        let mut errs = Errors::new();
        {
            let mut aggregates = self.aggregates.lock();
            aggregates.global.update(prefix, info);
            errs.append(aggregates.users.update(&self.stores.users, prefix, info));
        }
        errs.append(self.stores.prefix.set(prefix, info));

        if errs.is_empty() {
            if info.has_error() {
                errs.append(self.stores.errors.set(prefix, info));
            }
            return errs.into_result();
        }

        let failure = errs.summary();
        let mut record = PrefixInfo::new(info.user_id.clone());
        record.err = if info.has_error() {
            format!("{}: failed to write to database: {}", info.err, failure)
        } else {
            format!("failed to write to database: {}", failure)
        };
        warn!(prefix, error = %failure, "failed to persist prefix record");
        errs.append(self.stores.errors.set(prefix, &record));
        errs.into_result()
    }

    /// Stored record for `prefix`, `None` if there is none
    pub fn get(&self, prefix: &str) -> DbResult<Option<PrefixInfo>> {
        self.stores.prefix.get(prefix)
    }

    /// Known user ids, sorted
    pub fn user_ids(&self) -> Vec<String> {
        self.aggregates.lock().users.user_ids()
    }

    /// Supported metrics, sorted by name
    pub fn metrics(&self) -> Vec<MetricName> {
        MetricName::all()
    }

    /// Total of `metric` over every prefix in `scope`
    pub fn total(&self, metric: MetricName, scope: &Scope) -> DbResult<u64> {
        self.with_collection(scope, |sc| sc.sum(metric))
    }

    /// Up to `n` prefixes in `scope` with the highest `metric`, ties by prefix
    pub fn top_n(&self, metric: MetricName, n: usize, scope: &Scope) -> DbResult<Vec<Metric>> {
        self.with_collection(scope, |sc| sc.top_n(metric, n))
    }

    fn with_collection<T>(&self, scope: &Scope, f: impl FnOnce(&StatsCollection) -> T) -> DbResult<T> {
        let mut aggregates = self.aggregates.lock();
        match scope {
            Scope::Global => Ok(f(&aggregates.global)),
            Scope::User(id) => {
                let sc = aggregates.users.existing(&self.stores.users, id)?;
                Ok(f(sc))
            }
        }
    }

    /// Persist the aggregates and commit batched writes without closing
    pub fn flush(&self) -> DbResult<()> {
        if self.opts.read_only {
            return Err(DbError::ReadOnly);
        }
        let mut errs = Errors::new();
        {
            let aggregates = self.aggregates.lock();
            errs.append(aggregates.save(&self.stores.stats, &self.stores.users));
        }
        errs.append(self.stores.sync_all());
        errs.into_result()
    }

    /// Persist the aggregates, then close every store and release the lock.
    ///
    /// A read-only database is still closed but `ReadOnly` is returned.
    pub fn save(self) -> DbResult<()> {
        if self.opts.read_only {
            let closed = self.close_all();
            return Err(DbError::ReadOnly.with_cleanup(closed));
        }

        let mut errs = Errors::new();
        {
            let aggregates = self.aggregates.lock();
            errs.append(aggregates.save(&self.stores.stats, &self.stores.users));
        }
        errs.append(self.close_all());
        errs.into_result()
    }

    /// Close the database, saving the aggregates unless read-only
    pub fn close(self) -> DbResult<()> {
        if self.opts.read_only {
            self.close_all()
        } else {
            self.save()
        }
    }

    fn close_all(self) -> DbResult<()> {
        let dir = self.dir;
        let result = release_all(self.stores, self.lock);
        match &result {
            Ok(()) => info!(dir = %dir.display(), "closed database"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "errors closing database"),
        }
        result
    }
}

/// Close every store, then release the lock, collecting all errors
fn release_all(stores: StoreSet, lock: DirLock) -> DbResult<()> {
    let mut errs = Errors::new();
    errs.append(stores.close_all());
    errs.append(lock.release());
    debug!(errors = errs.len(), "released database resources");
    errs.into_result()
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.dir)
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}
