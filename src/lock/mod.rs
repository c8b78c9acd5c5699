//! Cross-process database locking
//!
//! Writers take an exclusive advisory lock on `db.lock` in the database
//! directory, readers take a shared one. The blocking lock call runs on a
//! waiter thread while the caller watches for cancellation and, on each
//! retry delay, either gives up (try-lock) or reports who holds the lock
//! and keeps waiting with a doubled delay.
//!
//! ```text
//!            ┌──────────────────┐   lock result   ┌───────────────────┐
//!            │  waiter thread   │ ───────────────►│                   │
//!            │ flock(db.lock)   │                 │   select loop     │
//!            └──────────────────┘                 │ - result          │
//!                                  ctx.done() ───►│ - cancellation    │
//!                                                 │ - retry delay     │
//!                                                 └───────────────────┘
//! ```

pub mod context;
pub mod info;

pub use context::{CancelHandle, Context};
pub use info::{describe_holder, LockInfo};

use crate::error::{DbError, DbResult};
use crossbeam_channel::{bounded, select, SendError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lock file name within the database directory
pub const LOCK_FILENAME: &str = "db.lock";

/// Lock info file name within the database directory
pub const LOCK_INFO_FILENAME: &str = "db.info";

/// Upper bound for the doubling retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10 * 60);

/// Lower bound so a zero delay cannot spin
const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Read the current exclusive holder's info, `None` if no info file exists
pub fn lock_holder(dir: &Path) -> DbResult<Option<LockInfo>> {
    let path = dir.join(LOCK_INFO_FILENAME);
    match LockInfo::read(&path) {
        Ok(info) => Ok(Some(info)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DbError::LockInfo { path, source }),
    }
}

/// A held database lock, released on [`DirLock::release`] or drop
#[derive(Debug)]
pub struct DirLock {
    dir: PathBuf,
    info_path: PathBuf,
    exclusive: bool,
    file: Option<File>,
}

impl DirLock {
    /// Acquire the lock for `dir`.
    ///
    /// Waits until the lock is obtained or `ctx` is cancelled. Each time
    /// `retry_delay` passes without the lock, returns `LockTimeout` if
    /// `fail_fast` is set, otherwise logs the holder and doubles the delay
    /// up to [`MAX_RETRY_DELAY`].
    ///
    /// The waiter thread cannot be interrupted; if this call returns
    /// before it finishes and it later obtains the lock, it finds nobody
    /// listening and releases the lock again.
    pub fn acquire(
        ctx: &Context,
        dir: &Path,
        exclusive: bool,
        retry_delay: Duration,
        fail_fast: bool,
    ) -> DbResult<Self> {
        let lock_path = dir.join(LOCK_FILENAME);
        let info_path = dir.join(LOCK_INFO_FILENAME);
        let kind = if exclusive { "write" } else { "read" };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| DbError::LockFailed {
                dir: dir.to_path_buf(),
                info_path: info_path.clone(),
                holder: describe_holder(&info_path),
                source,
            })?;

        let (tx, rx) = bounded::<io::Result<File>>(1);
        thread::Builder::new()
            .name("prefixdb-lock".into())
            .spawn(move || {
                let result = if exclusive {
                    file.lock_exclusive()
                } else {
                    file.lock_shared()
                };
                if let Err(SendError(Ok(file))) = tx.send(result.map(|()| file)) {
                    // Nobody is waiting any more; dropping the file releases the lock
                    let _ = FileExt::unlock(&file);
                    debug!("released lock obtained after the caller gave up");
                }
            })?;

        let started = Instant::now();
        let mut delay = retry_delay;
        loop {
            select! {
                recv(rx) -> msg => {
                    let result = msg.unwrap_or_else(|_| {
                        Err(io::Error::new(io::ErrorKind::Other, "lock waiter exited unexpectedly"))
                    });
                    let file = result.map_err(|source| DbError::LockFailed {
                        dir: dir.to_path_buf(),
                        info_path: info_path.clone(),
                        holder: describe_holder(&info_path),
                        source,
                    })?;

                    let lock = DirLock {
                        dir: dir.to_path_buf(),
                        info_path,
                        exclusive,
                        file: Some(file),
                    };
                    if exclusive {
                        // On failure the lock is dropped, which releases it
                        LockInfo::current().write(&lock.info_path).map_err(|source| {
                            DbError::LockInfo {
                                path: lock.info_path.clone(),
                                source,
                            }
                        })?;
                    }
                    debug!(dir = %dir.display(), kind, waited = ?started.elapsed(), "acquired lock");
                    return Ok(lock);
                }
                recv(ctx.done()) -> _ => {
                    debug!(dir = %dir.display(), kind, "lock wait cancelled");
                    return Err(DbError::LockCancelled);
                }
                default(delay) => {
                    if fail_fast {
                        return Err(DbError::LockTimeout {
                            dir: dir.to_path_buf(),
                            kind,
                            delay,
                            info_path: info_path.clone(),
                            holder: describe_holder(&info_path),
                        });
                    }
                    warn!(
                        dir = %dir.display(),
                        waited = ?started.elapsed(),
                        "waiting to acquire {} lock: lock info from {}:\n{}",
                        kind,
                        info_path.display(),
                        describe_holder(&info_path)
                    );
                    delay = (delay * 2).clamp(MIN_RETRY_DELAY, MAX_RETRY_DELAY);
                }
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Remove the info file (exclusive holders) and release the lock.
    ///
    /// Returns the info file removal error, if any.
    pub fn release(mut self) -> DbResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> DbResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let removed = if self.exclusive {
            fs::remove_file(&self.info_path).map_err(|source| DbError::LockInfo {
                path: self.info_path.clone(),
                source,
            })
        } else {
            Ok(())
        };

        if let Err(e) = FileExt::unlock(&file) {
            warn!(dir = %self.dir.display(), error = %e, "failed to unlock database");
        }
        debug!(dir = %self.dir.display(), exclusive = self.exclusive, "released lock");
        removed
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, "error releasing database lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_exclusive_writes_and_removes_info() {
        let dir = tempdir().unwrap();
        let lock = DirLock::acquire(&Context::background(), dir.path(), true, SHORT, true).unwrap();
        assert!(lock.is_exclusive());

        let holder = lock_holder(dir.path()).unwrap().unwrap();
        assert_eq!(holder.pid, std::process::id() as i64);

        lock.release().unwrap();
        assert!(lock_holder(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_shared_writes_no_info() {
        let dir = tempdir().unwrap();
        let a = DirLock::acquire(&Context::background(), dir.path(), false, SHORT, true).unwrap();
        let b = DirLock::acquire(&Context::background(), dir.path(), false, SHORT, true).unwrap();
        assert!(!dir.path().join(LOCK_INFO_FILENAME).exists());
        a.release().unwrap();
        b.release().unwrap();
    }

    #[test]
    fn test_fail_fast_names_holder() {
        let dir = tempdir().unwrap();
        let held = DirLock::acquire(&Context::background(), dir.path(), true, SHORT, true).unwrap();

        let err = DirLock::acquire(&Context::background(), dir.path(), true, SHORT, true).unwrap_err();
        match &err {
            DbError::LockTimeout { holder, kind, .. } => {
                assert_eq!(*kind, "write");
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }

        // A reader is also kept out by the writer
        let err = DirLock::acquire(&Context::background(), dir.path(), false, SHORT, true).unwrap_err();
        assert!(matches!(err, DbError::LockTimeout { kind: "read", .. }));

        held.release().unwrap();
    }

    #[test]
    fn test_cancel_while_waiting() {
        let dir = tempdir().unwrap();
        let held = DirLock::acquire(&Context::background(), dir.path(), true, SHORT, true).unwrap();

        let (ctx, cancel) = Context::with_cancel();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });

        let started = Instant::now();
        let err = DirLock::acquire(&ctx, dir.path(), true, Duration::from_secs(60), false).unwrap_err();
        assert!(matches!(err, DbError::LockCancelled));
        assert!(started.elapsed() < Duration::from_secs(30));
        canceller.join().unwrap();

        held.release().unwrap();

        // The abandoned waiter must not keep the lock once it gets it
        let again = DirLock::acquire(&Context::background(), dir.path(), true, Duration::from_secs(5), true);
        assert!(again.is_ok());
    }

    #[test]
    fn test_waits_then_acquires_after_release() {
        let dir = tempdir().unwrap();
        let held = DirLock::acquire(&Context::background(), dir.path(), true, SHORT, true).unwrap();

        let path = dir.path().to_path_buf();
        let waiter = thread::spawn(move || {
            DirLock::acquire(&Context::background(), &path, true, Duration::from_millis(20), false)
        });

        thread::sleep(Duration::from_millis(150));
        assert!(!waiter.is_finished());

        held.release().unwrap();
        let lock = waiter.join().unwrap().unwrap();
        assert!(lock_holder(dir.path()).unwrap().is_some());
        lock.release().unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempdir().unwrap();
        {
            let _lock = DirLock::acquire(&Context::background(), dir.path(), true, SHORT, true).unwrap();
        }
        assert!(!dir.path().join(LOCK_INFO_FILENAME).exists());
        let lock = DirLock::acquire(&Context::background(), dir.path(), true, SHORT, true).unwrap();
        lock.release().unwrap();
    }
}
