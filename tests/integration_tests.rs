//! Integration tests for prefixdb
//!
//! These tests open real databases in temporary directories and exercise
//! the locking, persistence and query paths end to end.

use prefixdb::store::{
    ERROR_DB_FILENAME, PREFIX_DB_FILENAME, STATS_DB_FILENAME, USER_DB_FILENAME,
};
use prefixdb::{
    lock_holder, Context, Database, DatabaseOptions, DbError, Metric, MetricName, PrefixInfo,
    ScanOptions, Scope,
};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn open(dir: &Path, opts: DatabaseOptions) -> Database {
    Database::open(&Context::background(), dir, opts).unwrap()
}

fn writer_opts() -> DatabaseOptions {
    DatabaseOptions::new()
        .try_lock()
        .lock_status_delay(Duration::from_millis(100))
}

fn reader_opts() -> DatabaseOptions {
    writer_opts().read_only()
}

fn populate(db: &Database) {
    db.set("/a", &PrefixInfo::new("alice").with_files(3).with_disk_usage(100))
        .unwrap();
    db.set("/b", &PrefixInfo::new("bob").with_files(5).with_disk_usage(50))
        .unwrap();
}

#[test]
fn test_end_to_end_queries() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    populate(&db);

    assert_eq!(db.total(MetricName::TotalFileCount, &Scope::Global).unwrap(), 8);
    assert_eq!(
        db.top_n(MetricName::TotalDiskUsage, 1, &Scope::Global).unwrap(),
        vec![Metric::new("/a", 100)]
    );
    assert_eq!(
        db.top_n(MetricName::TotalDiskUsage, 10, &Scope::Global).unwrap(),
        vec![Metric::new("/a", 100), Metric::new("/b", 50)]
    );
    assert!(db.top_n(MetricName::TotalDiskUsage, 0, &Scope::Global).unwrap().is_empty());
    db.close().unwrap();
}

#[test]
fn test_repeated_set_accumulates() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());

    let info = PrefixInfo::new("alice").with_files(2).with_children(1).with_disk_usage(10);
    db.set("/a", &info).unwrap();
    db.set("/a", &info).unwrap();

    assert_eq!(db.total(MetricName::TotalFileCount, &Scope::Global).unwrap(), 4);
    assert_eq!(db.total(MetricName::TotalPrefixCount, &Scope::Global).unwrap(), 2);
    assert_eq!(db.total(MetricName::TotalDiskUsage, &Scope::user("alice")).unwrap(), 20);

    // The stored record is the last one written
    assert_eq!(db.get("/a").unwrap(), Some(info));
    db.close().unwrap();
}

#[test]
fn test_top_n_ties_by_prefix() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    for p in ["/c", "/a", "/b"] {
        db.set(p, &PrefixInfo::new("u").with_disk_usage(7)).unwrap();
    }
    db.set("/z", &PrefixInfo::new("u").with_disk_usage(9)).unwrap();

    let top = db.top_n(MetricName::TotalDiskUsage, 3, &Scope::Global).unwrap();
    assert_eq!(
        top,
        vec![Metric::new("/z", 9), Metric::new("/a", 7), Metric::new("/b", 7)]
    );
    db.close().unwrap();
}

#[test]
fn test_get_absent_and_present() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    assert!(db.get("/missing").unwrap().is_none());

    let info = PrefixInfo::new("carol").with_files(1).with_error("partial listing");
    db.set("/c", &info).unwrap();
    assert_eq!(db.get("/c").unwrap(), Some(info));
    db.close().unwrap();
}

#[test]
fn test_reopen_reproduces_statistics() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    populate(&db);
    db.save().unwrap();

    let db = open(dir.path(), reader_opts());
    assert_eq!(db.total(MetricName::TotalFileCount, &Scope::Global).unwrap(), 8);
    assert_eq!(db.total(MetricName::TotalDiskUsage, &Scope::user("bob")).unwrap(), 50);
    assert_eq!(
        db.top_n(MetricName::TotalDiskUsage, 1, &Scope::Global).unwrap(),
        vec![Metric::new("/a", 100)]
    );
    assert_eq!(db.user_ids(), vec!["alice".to_string(), "bob".to_string()]);
    db.close().unwrap();
}

#[test]
fn test_reopen_continues_accumulating() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    populate(&db);
    db.close().unwrap();

    let db = open(dir.path(), writer_opts());
    db.set("/a", &PrefixInfo::new("alice").with_files(1)).unwrap();
    assert_eq!(db.total(MetricName::TotalFileCount, &Scope::user("alice")).unwrap(), 4);
    db.close().unwrap();
}

#[test]
fn test_reset_stats_ignores_persisted_aggregates() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    populate(&db);
    db.close().unwrap();

    let db = open(dir.path(), writer_opts().reset_stats());
    assert_eq!(db.total(MetricName::TotalFileCount, &Scope::Global).unwrap(), 0);
    assert!(db.user_ids().is_empty());
    // Raw records are untouched
    assert!(db.get("/a").unwrap().is_some());
    db.close().unwrap();
}

#[test]
fn test_read_only_set_changes_nothing() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    populate(&db);
    db.close().unwrap();

    let files = [
        PREFIX_DB_FILENAME,
        STATS_DB_FILENAME,
        ERROR_DB_FILENAME,
        USER_DB_FILENAME,
    ];
    let before: Vec<Vec<u8>> = files
        .iter()
        .map(|f| fs::read(dir.path().join(f)).unwrap())
        .collect();

    let db = open(dir.path(), reader_opts());
    assert!(db.is_read_only());
    let err = db.set("/new", &PrefixInfo::new("dave").with_files(1)).unwrap_err();
    assert!(err.is_read_only());
    assert_eq!(db.total(MetricName::TotalFileCount, &Scope::Global).unwrap(), 8);
    assert!(db.get("/new").unwrap().is_none());
    db.close().unwrap();

    let after: Vec<Vec<u8>> = files
        .iter()
        .map(|f| fs::read(dir.path().join(f)).unwrap())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_read_only_missing_database_fails() {
    let dir = tempdir().unwrap();
    let err = Database::open(&Context::background(), dir.path(), reader_opts()).unwrap_err();
    assert!(matches!(err, DbError::StoreOpen { store: "prefix", .. }));

    // The failed open released its lock
    open(dir.path(), writer_opts()).close().unwrap();
}

#[test]
fn test_read_only_missing_directory_fails() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing");
    let err = Database::open(&Context::background(), &missing, reader_opts()).unwrap_err();
    assert!(matches!(err, DbError::LockFailed { .. }));
    assert!(err.is_lock_error());

    // Read-only opens never create the directory
    assert!(!missing.exists());
}

#[test]
fn test_per_user_queries() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    populate(&db);
    db.set("/a/x", &PrefixInfo::new("alice").with_files(1).with_disk_usage(500))
        .unwrap();

    assert_eq!(db.total(MetricName::TotalFileCount, &Scope::user("alice")).unwrap(), 4);
    assert_eq!(
        db.top_n(MetricName::TotalDiskUsage, 5, &Scope::user("alice")).unwrap(),
        vec![Metric::new("/a/x", 500), Metric::new("/a", 100)]
    );

    let err = db.total(MetricName::TotalFileCount, &Scope::user("mallory")).unwrap_err();
    assert!(matches!(err, DbError::UnknownUser(ref id) if id == "mallory"));
    let err = db.top_n(MetricName::TotalFileCount, 1, &Scope::user("mallory")).unwrap_err();
    assert!(matches!(err, DbError::UnknownUser(_)));
    db.close().unwrap();
}

#[test]
fn test_unsupported_metric_name() {
    let err = "inodes".parse::<MetricName>().unwrap_err();
    assert!(matches!(err, DbError::UnsupportedMetric(_)));
    assert_eq!(err.to_string(), "unsupported metric: inodes");
}

#[test]
fn test_error_store_records() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    db.set("/ok", &PrefixInfo::new("u").with_files(1)).unwrap();
    db.set("/denied", &PrefixInfo::new("u").with_error("permission denied"))
        .unwrap();
    db.set("/gone", &PrefixInfo::new("u").with_error("no such file"))
        .unwrap();
    db.close().unwrap();

    let db = open(dir.path(), reader_opts());
    let errors: Vec<_> = db.errors().map(|r| r.unwrap()).collect();
    let prefixes: Vec<_> = errors.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(prefixes, vec!["/denied", "/gone"]);
    assert_eq!(errors[0].1.err, "permission denied");

    let descending: Vec<_> = db
        .scan(None, ScanOptions::new().descending().limit(2))
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(descending, vec!["/ok", "/gone"]);
    db.close().unwrap();
}

#[test]
fn test_lock_info_written_while_open() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    let holder = lock_holder(dir.path()).unwrap().unwrap();
    assert_eq!(holder.pid, std::process::id() as i64);
    db.close().unwrap();
    assert!(lock_holder(dir.path()).unwrap().is_none());
}

#[test]
fn test_try_lock_names_holder() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());

    let started = Instant::now();
    let err = Database::open(&Context::background(), dir.path(), writer_opts()).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(err, DbError::LockTimeout { .. }));
    assert!(err.is_lock_error());
    assert!(err.to_string().contains(&std::process::id().to_string()));

    // Readers are kept out by a writer too
    let err = Database::open(&Context::background(), dir.path(), reader_opts()).unwrap_err();
    assert!(matches!(err, DbError::LockTimeout { kind: "read", .. }));
    db.close().unwrap();
}

#[test]
fn test_second_writer_blocks_until_release() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    populate(&db);

    let path = dir.path().to_path_buf();
    let waiter = thread::spawn(move || {
        let opts = DatabaseOptions::new().lock_status_delay(Duration::from_millis(20));
        let db = Database::open(&Context::background(), &path, opts).unwrap();
        let total = db.total(MetricName::TotalFileCount, &Scope::Global).unwrap();
        db.close().unwrap();
        total
    });

    thread::sleep(Duration::from_millis(200));
    assert!(!waiter.is_finished());

    db.close().unwrap();
    assert_eq!(waiter.join().unwrap(), 8);
}

#[test]
fn test_cancel_lock_wait() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());

    let (ctx, cancel) = Context::with_cancel();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });

    let opts = DatabaseOptions::new().lock_status_delay(Duration::from_secs(60));
    let err = Database::open(&ctx, dir.path(), opts).unwrap_err();
    assert!(matches!(err, DbError::LockCancelled));
    canceller.join().unwrap();
    db.close().unwrap();
}

#[test]
fn test_concurrent_readers() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts());
    populate(&db);
    db.close().unwrap();

    let first = open(dir.path(), reader_opts());
    let second = open(dir.path(), reader_opts());
    assert_eq!(
        first.total(MetricName::TotalDiskUsage, &Scope::Global).unwrap(),
        second.total(MetricName::TotalDiskUsage, &Scope::Global).unwrap()
    );
    assert!(lock_holder(dir.path()).unwrap().is_none());

    // A writer cannot get in while readers hold the lock
    let err = Database::open(&Context::background(), dir.path(), writer_opts()).unwrap_err();
    assert!(matches!(err, DbError::LockTimeout { kind: "write", .. }));

    first.close().unwrap();
    second.close().unwrap();
}

#[test]
fn test_concurrent_sets_in_process() {
    let dir = tempdir().unwrap();
    let db = open(dir.path(), writer_opts().sync_interval(Duration::from_secs(1)));

    thread::scope(|s| {
        for t in 0..4 {
            let db = &db;
            s.spawn(move || {
                for i in 0..25 {
                    let prefix = format!("/t{}/{}", t, i);
                    db.set(&prefix, &PrefixInfo::new(format!("user{}", t)).with_files(1))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(db.total(MetricName::TotalFileCount, &Scope::Global).unwrap(), 100);
    assert_eq!(db.user_ids().len(), 4);
    db.close().unwrap();

    let db = open(dir.path(), reader_opts());
    assert_eq!(db.scan(None, ScanOptions::new()).count(), 100);
    db.close().unwrap();
}
