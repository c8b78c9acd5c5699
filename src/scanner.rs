//! Ordered iteration over stored records
//!
//! A [`Scanner`] walks the prefix store (or the error store) in key
//! order, reading a page of records at a time so that large databases
//! can be listed without loading everything at once.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::lock::Context;
use crate::store::{KvStore, ScanStart};
use crate::types::PrefixInfo;
use std::collections::VecDeque;

/// Records read per store query
const PAGE_SIZE: usize = 256;

/// Options controlling a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Scan the error store rather than the prefix store
    pub errors: bool,

    /// Scan in descending key order
    pub descending: bool,

    /// Stop after this many records
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(mut self) -> Self {
        self.errors = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Iterator over `(prefix, record)` pairs in key order
pub struct Scanner<'a> {
    store: &'a KvStore,
    descending: bool,
    remaining: Option<usize>,
    /// Key to resume from, and whether it is included
    next: Option<(String, bool)>,
    page: VecDeque<(String, PrefixInfo)>,
    done: bool,
    ctx: Context,
}

impl<'a> Scanner<'a> {
    fn new(store: &'a KvStore, start: Option<&str>, opts: ScanOptions) -> Self {
        Self {
            store,
            descending: opts.descending,
            remaining: opts.limit,
            next: start.map(|key| (key.to_string(), true)),
            page: VecDeque::new(),
            done: false,
            ctx: Context::background(),
        }
    }

    /// Stop the scan with `DbError::Cancelled` once `ctx` is cancelled
    pub fn until_cancelled(mut self, ctx: &Context) -> Self {
        self.ctx = ctx.clone();
        self
    }

    fn fill(&mut self) -> DbResult<()> {
        let want = match self.remaining {
            Some(n) => n.min(PAGE_SIZE),
            None => PAGE_SIZE,
        };
        let start = match &self.next {
            None => ScanStart::Unbounded,
            Some((key, true)) => ScanStart::Included(key),
            Some((key, false)) => ScanStart::Excluded(key),
        };

        let rows = self.store.scan::<PrefixInfo>(start, self.descending, want)?;
        if rows.len() < want {
            self.done = true;
        }
        if let Some((last, _)) = rows.last() {
            self.next = Some((last.clone(), false));
        }
        self.page.extend(rows);
        Ok(())
    }
}

impl Iterator for Scanner<'_> {
    type Item = DbResult<(String, PrefixInfo)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        if self.ctx.is_cancelled() {
            if self.done && self.page.is_empty() {
                return None;
            }
            self.done = true;
            self.page.clear();
            return Some(Err(DbError::Cancelled));
        }
        if self.page.is_empty() {
            if self.done {
                return None;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }

        let item = self.page.pop_front()?;
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
        }
        Some(Ok(item))
    }
}

impl Database {
    /// Iterate stored records starting at `start` (inclusive), or at the
    /// first key (last, when descending) if `start` is `None`
    pub fn scan(&self, start: Option<&str>, opts: ScanOptions) -> Scanner<'_> {
        let store = if opts.errors {
            &self.stores.errors
        } else {
            &self.stores.prefix
        };
        Scanner::new(store, start, opts)
    }

    /// Iterate every recorded error in key order
    pub fn errors(&self) -> Scanner<'_> {
        self.scan(None, ScanOptions::new().errors())
    }
}
