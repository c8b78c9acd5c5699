//! A single named key/value store
//!
//! Each store owns one SQLite connection behind a mutex. Read-write
//! stores opened with a sync interval batch their writes into an open
//! transaction that a dedicated ticker thread commits every interval;
//! without an interval every write commits immediately.
//!
//! ```text
//!   set() ──► BEGIN (lazily) ──► INSERT ──► dirty = true
//!                                              │
//!   sync ticker (every interval) ──► COMMIT ◄──┘
//!   close() ──► stop ticker ──► COMMIT ──► Connection::close
//! ```

use crate::error::{DbError, DbResult};
use crate::store::schema::{self, ScanStart};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// How a store is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreConfig {
    /// Open the file read-only; the file must already exist
    pub read_only: bool,

    /// Commit batched writes this often; `None` commits every write
    pub sync_interval: Option<Duration>,
}

impl StoreConfig {
    /// Sync interval actually applied, read-only stores never sync
    pub fn effective_sync_interval(&self) -> Option<Duration> {
        if self.read_only {
            None
        } else {
            self.sync_interval
        }
    }
}

struct StoreConn {
    conn: Connection,
    /// Uncommitted writes are pending in an open transaction
    dirty: bool,
}

impl StoreConn {
    fn commit(&mut self) -> rusqlite::Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        self.dirty = false;
        Ok(())
    }
}

/// Background thread committing batched writes
struct SyncTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncTicker {
    fn spawn(
        name: &'static str,
        conn: Arc<Mutex<StoreConn>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop, stopped) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name(format!("prefixdb-sync-{}", name))
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut guard = conn.lock();
                        if guard.dirty {
                            if let Err(e) = guard.commit() {
                                warn!(store = name, error = %e, "periodic sync failed");
                            }
                        }
                    }
                    _ => break,
                }
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the ticker's receiver
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sync ticker thread panicked");
            }
        }
    }
}

impl Drop for SyncTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One named store backed by a SQLite file
pub struct KvStore {
    name: &'static str,
    path: PathBuf,
    read_only: bool,
    batched: bool,
    conn: Arc<Mutex<StoreConn>>,
    ticker: Option<SyncTicker>,
}

impl KvStore {
    /// Open (or, read-write, create) the store at `path`
    pub fn open<P: AsRef<Path>>(name: &'static str, path: P, config: &StoreConfig) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| DbError::StoreOpen {
            store: name,
            path: path.clone(),
            source,
        };

        let conn = if config.read_only {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(open_err)?;
            schema::configure_read_only(&conn).map_err(open_err)?;
            conn
        } else {
            let conn = Connection::open(&path).map_err(open_err)?;
            schema::create_store(&conn).map_err(open_err)?;
            conn
        };

        let interval = config.effective_sync_interval();
        let conn = Arc::new(Mutex::new(StoreConn { conn, dirty: false }));

        let ticker = match interval {
            Some(interval) => Some(
                SyncTicker::spawn(name, Arc::clone(&conn), interval).map_err(DbError::Io)?,
            ),
            None => None,
        };

        debug!(store = name, path = %path.display(), read_only = config.read_only, ?interval, "opened store");

        Ok(Self {
            name,
            path,
            read_only: config.read_only,
            batched: interval.is_some(),
            conn,
            ticker,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn store_err(&self, source: rusqlite::Error) -> DbError {
        DbError::Store {
            store: self.name,
            source,
        }
    }

    fn codec_err(&self, key: &str, err: bincode::Error) -> DbError {
        DbError::Codec {
            store: self.name,
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    /// Encode and store `value` under `key`
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DbResult<()> {
        let bytes = bincode::serialize(value).map_err(|e| self.codec_err(key, e))?;

        let mut guard = self.conn.lock();
        if self.batched && guard.conn.is_autocommit() {
            guard
                .conn
                .execute_batch("BEGIN")
                .map_err(|e| self.store_err(e))?;
        }
        schema::put_value(&guard.conn, key, &bytes).map_err(|e| self.store_err(e))?;
        if self.batched {
            guard.dirty = true;
        }
        Ok(())
    }

    /// Fetch and decode the value under `key`, `None` when absent
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let bytes = {
            let guard = self.conn.lock();
            schema::get_value(&guard.conn, key).map_err(|e| self.store_err(e))?
        };
        match bytes {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| self.codec_err(key, e)),
            None => Ok(None),
        }
    }

    /// Read one page of decoded key/value pairs in key order
    pub fn scan<T: DeserializeOwned>(
        &self,
        start: ScanStart<'_>,
        descending: bool,
        limit: usize,
    ) -> DbResult<Vec<(String, T)>> {
        let rows = {
            let guard = self.conn.lock();
            schema::scan_values(&guard.conn, start, descending, limit)
                .map_err(|e| self.store_err(e))?
        };
        rows.into_iter()
            .map(|(key, bytes)| -> DbResult<(String, T)> {
                let value = bincode::deserialize(&bytes).map_err(|e| self.codec_err(&key, e))?;
                Ok((key, value))
            })
            .collect()
    }

    /// Number of keys in the store
    pub fn len(&self) -> DbResult<u64> {
        let guard = self.conn.lock();
        schema::count_keys(&guard.conn).map_err(|e| self.store_err(e))
    }

    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Commit any batched writes now
    pub fn sync(&self) -> DbResult<()> {
        self.conn.lock().commit().map_err(|e| self.store_err(e))
    }

    /// Stop the ticker, commit pending writes and close the connection
    pub fn close(mut self) -> DbResult<()> {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.shutdown();
        }

        let close_err = |source| DbError::StoreClose {
            store: self.name,
            source,
        };

        self.conn.lock().commit().map_err(close_err)?;

        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => mutex
                .into_inner()
                .conn
                .close()
                .map_err(|(_, e)| close_err(e))?,
            // Only the joined ticker ever shares the connection
            Err(_) => warn!(store = self.name, "store connection still shared at close"),
        }

        debug!(store = self.name, "closed store");
        Ok(())
    }
}
