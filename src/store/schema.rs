//! Store schema definitions and creation
//!
//! Every store is a SQLite file holding a single key/value table. Values
//! are opaque bincode blobs; keys are prefixes or reserved `__` names.

use rusqlite::{Connection, OptionalExtension};

/// Current schema version, recorded in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the key/value table
const CREATE_KV_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
) WITHOUT ROWID
"#;

/// Pragmas for stores opened read-write.
/// Rollback journal with full sync keeps every committed write durable.
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = DELETE;
PRAGMA synchronous = FULL;
PRAGMA temp_store = MEMORY;
PRAGMA cache_size = -16000;
"#;

/// Pragmas for stores opened read-only
const READ_PRAGMAS: &str = r#"
PRAGMA query_only = ON;
"#;

/// Configure a freshly opened read-write connection and create the table
pub fn create_store(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(WRITE_PRAGMAS)?;
    conn.execute(CREATE_KV_TABLE, [])?;
    conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    Ok(())
}

/// Configure a read-only connection
pub fn configure_read_only(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(READ_PRAGMAS)
}

/// Insert or replace a value
pub fn put_value(conn: &Connection, key: &str, value: &[u8]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
    stmt.execute(rusqlite::params![key, value])?;
    Ok(())
}

/// Fetch a value, `None` when the key is absent
pub fn get_value(conn: &Connection, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
    let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
    stmt.query_row([key], |row| row.get(0)).optional()
}

/// Count stored keys
pub fn count_keys(conn: &Connection) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Where a range scan starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart<'a> {
    /// From the first (or last, descending) key
    Unbounded,
    /// From this key, inclusive
    Included(&'a str),
    /// From just past this key
    Excluded(&'a str),
}

fn scan_sql(start: ScanStart<'_>, descending: bool) -> &'static str {
    match (start, descending) {
        (ScanStart::Unbounded, false) => "SELECT key, value FROM kv ORDER BY key ASC LIMIT ?1",
        (ScanStart::Unbounded, true) => "SELECT key, value FROM kv ORDER BY key DESC LIMIT ?1",
        (ScanStart::Included(_), false) => {
            "SELECT key, value FROM kv WHERE key >= ?2 ORDER BY key ASC LIMIT ?1"
        }
        (ScanStart::Included(_), true) => {
            "SELECT key, value FROM kv WHERE key <= ?2 ORDER BY key DESC LIMIT ?1"
        }
        (ScanStart::Excluded(_), false) => {
            "SELECT key, value FROM kv WHERE key > ?2 ORDER BY key ASC LIMIT ?1"
        }
        (ScanStart::Excluded(_), true) => {
            "SELECT key, value FROM kv WHERE key < ?2 ORDER BY key DESC LIMIT ?1"
        }
    }
}

/// Read up to `limit` key/value pairs in key order
pub fn scan_values(
    conn: &Connection,
    start: ScanStart<'_>,
    descending: bool,
    limit: usize,
) -> rusqlite::Result<Vec<(String, Vec<u8>)>> {
    let mut stmt = conn.prepare_cached(scan_sql(start, descending))?;
    let limit = limit.min(i64::MAX as usize) as i64;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, Vec<u8>)> {
        Ok((row.get(0)?, row.get(1)?))
    };

    let rows = match start {
        ScanStart::Unbounded => stmt.query_map(rusqlite::params![limit], map_row)?,
        ScanStart::Included(key) | ScanStart::Excluded(key) => {
            stmt.query_map(rusqlite::params![limit, key], map_row)?
        }
    };
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_store(&conn).unwrap();
        conn
    }

    #[test]
    fn test_create_store() {
        let conn = store();
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='kv'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_put_get_replace() {
        let conn = store();
        put_value(&conn, "/a", b"one").unwrap();
        assert_eq!(get_value(&conn, "/a").unwrap(), Some(b"one".to_vec()));

        put_value(&conn, "/a", b"two").unwrap();
        assert_eq!(get_value(&conn, "/a").unwrap(), Some(b"two".to_vec()));
        assert_eq!(get_value(&conn, "/missing").unwrap(), None);
        assert_eq!(count_keys(&conn).unwrap(), 1);
    }

    #[test]
    fn test_scan_ordering() {
        let conn = store();
        for key in ["/c", "/a", "/d", "/b"] {
            put_value(&conn, key, key.as_bytes()).unwrap();
        }

        let keys = |rows: Vec<(String, Vec<u8>)>| rows.into_iter().map(|(k, _)| k).collect::<Vec<_>>();

        assert_eq!(
            keys(scan_values(&conn, ScanStart::Unbounded, false, 10).unwrap()),
            vec!["/a", "/b", "/c", "/d"]
        );
        assert_eq!(
            keys(scan_values(&conn, ScanStart::Included("/b"), false, 2).unwrap()),
            vec!["/b", "/c"]
        );
        assert_eq!(
            keys(scan_values(&conn, ScanStart::Excluded("/b"), false, 10).unwrap()),
            vec!["/c", "/d"]
        );
        assert_eq!(
            keys(scan_values(&conn, ScanStart::Included("/c"), true, 10).unwrap()),
            vec!["/c", "/b", "/a"]
        );
        assert_eq!(
            keys(scan_values(&conn, ScanStart::Unbounded, true, 1).unwrap()),
            vec!["/d"]
        );
    }
}
