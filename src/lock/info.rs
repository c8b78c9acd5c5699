//! Lock holder diagnostics
//!
//! The exclusive holder of a database lock writes a small JSON file next
//! to the lock file describing who it is. Nothing reads it to decide
//! ownership; it only feeds waiting notices and timeout errors.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Contents of the lock info file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub user: String,
    #[serde(rename = "current_directory")]
    pub cwd: String,
    #[serde(rename = "parent_process_pid")]
    pub ppid: i64,
    #[serde(rename = "process_pid")]
    pub pid: i64,
}

#[cfg(unix)]
fn parent_pid() -> i64 {
    std::os::unix::process::parent_id() as i64
}

#[cfg(not(unix))]
fn parent_pid() -> i64 {
    0
}

impl LockInfo {
    /// Describe the current process
    pub fn current() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Self {
            user,
            cwd,
            ppid: parent_pid(),
            pid: std::process::id() as i64,
        }
    }

    /// Read and parse an info file
    pub fn read(path: &Path) -> io::Result<Self> {
        let buf = fs::read(path)?;
        serde_json::from_slice(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Write this info to `path`, replacing any previous file atomically
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let buf = serde_json::to_vec(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("info.tmp");
        fs::write(&tmp, buf)?;
        fs::rename(&tmp, path)
    }
}

/// Human readable description of whoever holds the lock
pub fn describe_holder(path: &Path) -> String {
    match LockInfo::read(path) {
        Ok(info) => serde_json::to_string_pretty(&info)
            .unwrap_or_else(|e| format!("failed to format locker info: {}", e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            format!("{}: does not exist", path.display())
        }
        Err(e) => format!("failed to read locker info from {}: {}", path.display(), e),
    }
}
