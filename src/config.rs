//! Configuration types for prefixdb
//!
//! This module defines:
//! - Database options with builder methods, used by library callers
//! - CLI argument parsing for the inspection tool using clap derive macros
//! - Conversion of CLI arguments into validated options

use crate::error::ConfigError;
use crate::store::StoreConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Sync interval used when a zero interval is requested
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Initial delay between lock status notices
pub const DEFAULT_LOCK_STATUS_DELAY: Duration = Duration::from_secs(60);

/// Default number of entries for top-N queries
const DEFAULT_TOP_N: usize = 10;

/// Options controlling how a database is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Open for reading only, with a shared lock
    pub read_only: bool,

    /// Ignore previously persisted statistics
    pub reset_stats: bool,

    /// Periodic sync interval for read-write stores, `None` syncs every write
    pub sync_interval: Option<Duration>,

    /// Fail instead of waiting when the lock is held
    pub try_lock: bool,

    /// Initial delay before reporting lock contention
    pub lock_status_delay: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            reset_stats: false,
            sync_interval: None,
            try_lock: false,
            lock_status_delay: DEFAULT_LOCK_STATUS_DELAY,
        }
    }
}

impl DatabaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn reset_stats(mut self) -> Self {
        self.reset_stats = true;
        self
    }

    /// Commit batched writes every `interval`; zero selects the default
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    pub fn try_lock(mut self) -> Self {
        self.try_lock = true;
        self
    }

    pub fn lock_status_delay(mut self, delay: Duration) -> Self {
        self.lock_status_delay = delay;
        self
    }

    /// Store configuration derived from these options
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            read_only: self.read_only,
            sync_interval: self.sync_interval.map(round_sync_interval),
        }
    }

    /// Create and validate options from CLI arguments.
    ///
    /// The inspection tool only ever opens databases read-only.
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        if !args.dir.exists() {
            return Err(ConfigError::InvalidDirectory {
                path: args.dir.clone(),
                reason: "does not exist".to_string(),
            });
        }
        if !args.dir.is_dir() {
            return Err(ConfigError::InvalidDirectory {
                path: args.dir.clone(),
                reason: "not a directory".to_string(),
            });
        }

        let mut opts = Self::new()
            .read_only()
            .lock_status_delay(args.lock_delay);
        if args.try_lock {
            opts = opts.try_lock();
        }
        Ok(opts)
    }
}

/// Round a sync interval to whole seconds.
///
/// Zero selects [`DEFAULT_SYNC_INTERVAL`]; anything else has half a
/// second added and is then rounded to the nearest second.
pub fn round_sync_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        return DEFAULT_SYNC_INTERVAL;
    }
    let padded = interval + Duration::from_millis(500);
    let secs = (padded.as_millis() + 500) / 1000;
    Duration::from_secs(secs as u64)
}

/// Parse a duration such as `500ms`, `30s`, `5m`, `1h` or plain seconds
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(invalid("expected a number"));
    }
    let n: u64 = digits.parse().map_err(|_| invalid("number out of range"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => Ok(Duration::from_secs(n)),
        "m" => n
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| invalid("number out of range")),
        "h" => n
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| invalid("number out of range")),
        _ => Err(invalid("unknown unit, expected ms, s, m or h")),
    }
}

/// Inspect a prefix statistics database
#[derive(Parser, Debug, Clone)]
#[command(
    name = "prefixdb",
    version,
    about = "Inspect a prefix statistics database",
    long_about = "Opens a prefix statistics database read-only, with a shared lock,\n\
                  and reports aggregate statistics, stored records and lock status.",
    after_help = "EXAMPLES:\n    \
        prefixdb /var/db/crawl total files\n    \
        prefixdb /var/db/crawl top disk -n 20 --user alice\n    \
        prefixdb /var/db/crawl get /home/alice\n    \
        prefixdb /var/db/crawl errors --limit 50\n    \
        prefixdb /var/db/crawl lock-info --json"
)]
pub struct CliArgs {
    /// Database directory
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Fail instead of waiting if a writer holds the database
    #[arg(long, global = true)]
    pub try_lock: bool,

    /// Delay before reporting (or, with --try-lock, giving up on) lock contention
    #[arg(
        long,
        global = true,
        default_value = "60s",
        value_name = "DURATION",
        value_parser = parse_duration
    )]
    pub lock_delay: Duration,
}

/// Subcommands
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Total of a metric over all prefixes
    Total {
        /// Metric name (totalFileCount/files, totalPrefixCount/prefixes, totalDiskUsage/disk)
        #[arg(value_name = "METRIC", default_value = "totalFileCount")]
        metric: String,

        /// Restrict to one user's prefixes
        #[arg(short = 'u', long, value_name = "USER")]
        user: Option<String>,
    },

    /// Prefixes with the highest values of a metric
    Top {
        /// Metric name
        #[arg(value_name = "METRIC", default_value = "totalDiskUsage")]
        metric: String,

        /// Number of results to show
        #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_N)]
        n: usize,

        /// Restrict to one user's prefixes
        #[arg(short = 'u', long, value_name = "USER")]
        user: Option<String>,
    },

    /// Show the stored record for one prefix
    Get {
        #[arg(value_name = "PREFIX")]
        prefix: String,
    },

    /// List stored prefix records in key order
    Prefixes {
        /// First prefix to list
        #[arg(long, value_name = "PREFIX")]
        start: Option<String>,

        /// Maximum number of records
        #[arg(short = 'l', long, value_name = "NUM")]
        limit: Option<usize>,

        /// List in descending key order
        #[arg(long)]
        descending: bool,
    },

    /// List recorded errors in key order
    Errors {
        /// First prefix to list
        #[arg(long, value_name = "PREFIX")]
        start: Option<String>,

        /// Maximum number of records
        #[arg(short = 'l', long, value_name = "NUM")]
        limit: Option<usize>,
    },

    /// List known user ids
    Users,

    /// List supported metric names
    Metrics,

    /// Show who holds the write lock, if anyone
    LockInfo,
}
