//! Error types for prefixdb
//!
//! This module defines the error hierarchy for the database:
//! - Lock acquisition failures, including holder diagnostics
//! - Per-store SQLite failures, tagged with the store they came from
//! - Query errors (unsupported metrics, unknown users)
//! - Configuration errors raised while building options from the CLI
//!
//! Operations that touch several stores keep going after a failure and
//! report every problem at once through [`Errors`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for database operations
#[derive(Error, Debug)]
pub enum DbError {
    /// Mutation attempted on a database opened read-only
    #[error("database is opened in readonly mode")]
    ReadOnly,

    /// Lock not obtained before the fail-fast deadline
    #[error("failed to acquire {kind} lock on '{dir}' after {delay:?}\nlock info from: {info_path}:\n{holder}")]
    LockTimeout {
        dir: PathBuf,
        kind: &'static str,
        delay: Duration,
        info_path: PathBuf,
        holder: String,
    },

    /// The underlying lock primitive reported an error
    #[error("failed to lock '{dir}': {source}\nlock info from: {info_path}:\n{holder}")]
    LockFailed {
        dir: PathBuf,
        info_path: PathBuf,
        holder: String,
        #[source]
        source: std::io::Error,
    },

    /// Caller cancelled while waiting for the lock
    #[error("cancelled while waiting for the database lock")]
    LockCancelled,

    /// A long-running read was cancelled through its context
    #[error("operation cancelled")]
    Cancelled,

    /// Failed to write or remove the lock info file
    #[error("lock info file '{path}': {source}")]
    LockInfo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A store could not be opened
    #[error("failed to open {store} store at '{path}': {source}")]
    StoreOpen {
        store: &'static str,
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A store could not be closed cleanly
    #[error("failed to close {store} store: {source}")]
    StoreClose {
        store: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Any other storage operation failed
    #[error("{store} store: {source}")]
    Store {
        store: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Stored value could not be encoded or decoded
    #[error("{store} store: codec error for key '{key}': {reason}")]
    Codec {
        store: &'static str,
        key: String,
        reason: String,
    },

    /// Query named a metric the aggregation engine does not know
    #[error("unsupported metric: {0}")]
    UnsupportedMetric(String),

    /// Per-user query named a user with no registered statistics
    #[error("user not found: {0}")]
    UnknownUser(String),

    /// I/O errors (directory creation etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Several independent failures from one operation
    #[error("{0}")]
    Multiple(Errors),
}

impl DbError {
    /// Check if this error only reflects the access mode
    pub fn is_read_only(&self) -> bool {
        matches!(self, DbError::ReadOnly)
    }

    /// Check if this error came from lock acquisition
    pub fn is_lock_error(&self) -> bool {
        matches!(
            self,
            DbError::LockTimeout { .. } | DbError::LockFailed { .. } | DbError::LockCancelled
        )
    }

    /// Attach the outcome of cleanup performed after this error
    pub fn with_cleanup(self, cleanup: DbResult<()>) -> DbError {
        match cleanup {
            Ok(()) => self,
            Err(cleanup_err) => {
                let mut errs = Errors::new();
                errs.push(self);
                errs.push(cleanup_err);
                DbError::Multiple(errs)
            }
        }
    }

    /// Iterate this error, flattening any nested `Multiple`
    pub fn flatten(&self) -> Vec<&DbError> {
        match self {
            DbError::Multiple(errs) => errs.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }
}

/// Accumulates errors from an operation that continues past failures.
#[derive(Debug, Default)]
pub struct Errors {
    errors: Vec<DbError>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error from `result`, if any
    pub fn append<T>(&mut self, result: DbResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    pub fn push(&mut self, err: DbError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DbError> {
        self.errors.iter()
    }

    /// Every error message on one line
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Collapse into `Ok`, the single error, or `DbError::Multiple`
    pub fn into_result(mut self) -> DbResult<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(DbError::Multiple(self)),
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "--- {} of {} errors\n{}", i + 1, self.errors.len(), err)?;
        }
        Ok(())
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Database directory argument is unusable
    #[error("Invalid database directory '{path}': {reason}")]
    InvalidDirectory { path: PathBuf, reason: String },

    /// Duration argument could not be parsed
    #[error("Invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },
}

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;
