//! Partition naming and partition file I/O
//!
//! Every UTC calendar day owns exactly one live partition:
//!
//! ```text
//! <root>/<YYYY>/<MM>/audit-<YYYY>-<MM>-<DD>.json                 live
//! <root>/<YYYY>/<MM>/audit-<YYYY>-<MM>-<DD>-<stamp>.json.gz      rotated
//! <root>/archives/audit-<YYYY>-<MM>-<DD>.json.gz                 archived
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::types::LogEntry;
use crate::utils::atomic_write_with;

use tracing::warn;

use super::store::{AuditLogError, AuditLogResult, ARCHIVES_DIR, INDEXES_DIR};

const FILE_PREFIX: &str = "audit-";

/// What a file under the log tree is, judged by its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFileKind {
    /// `audit-<date>.json`, accepting writes
    Live,
    /// `audit-<date>-<stamp>.json`, renamed for rotation but not yet compressed
    RotatedPending,
    /// `audit-<date>[-<stamp>].json.gz`
    Compressed,
}

/// Parsed file name of a partition or one of its compressed descendants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileName {
    pub date: NaiveDate,
    pub kind: LogFileKind,
    pub stamp: Option<String>,
}

impl LogFileName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let rest = file_name.strip_prefix(FILE_PREFIX)?;
        let date = NaiveDate::parse_from_str(rest.get(..10)?, "%Y-%m-%d").ok()?;
        let tail = rest.get(10..)?;

        let (stamp, ext) = match tail.strip_prefix('-') {
            Some(stamped) => {
                let dot = stamped.find('.')?;
                let stamp = &stamped[..dot];
                if stamp.is_empty() || !stamp.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return None;
                }
                (Some(stamp.to_string()), &stamped[dot..])
            }
            None => (None, tail),
        };

        let kind = match (ext, stamp.is_some()) {
            (".json", false) => LogFileKind::Live,
            (".json", true) => LogFileKind::RotatedPending,
            (".json.gz", _) => LogFileKind::Compressed,
            _ => return None,
        };

        Some(Self { date, kind, stamp })
    }
}

/// A file found while walking the live tree
#[derive(Debug, Clone)]
pub struct LogFile {
    pub path: PathBuf,
    pub name: LogFileName,
}

/// Maps dates to partition paths under one log root
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
}

impl PartitionLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base file name of the live partition for `date`
    pub fn file_name(date: NaiveDate) -> String {
        format!(
            "{}{:04}-{:02}-{:02}.json",
            FILE_PREFIX,
            date.year(),
            date.month(),
            date.day()
        )
    }

    /// Path of `date`'s partition relative to the root, `/`-separated
    ///
    /// This is the form stored in the index.
    pub fn relative_path(date: NaiveDate) -> String {
        format!(
            "{:04}/{:02}/{}",
            date.year(),
            date.month(),
            Self::file_name(date)
        )
    }

    /// Absolute path of `date`'s live partition
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.resolve(&Self::relative_path(date))
    }

    /// Resolve an index path against the root
    pub fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Rotated sibling of a live partition
    pub fn rotated_path(live: &Path, stamp: &str, compressed: bool) -> AuditLogResult<PathBuf> {
        let stem = live
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AuditLogError::InvalidPartition(live.display().to_string()))?;
        let ext = if compressed { "json.gz" } else { "json" };
        Ok(live.with_file_name(format!("{}-{}.{}", stem, stamp, ext)))
    }

    /// Walk the live tree (skipping archives and indexes) for log files
    pub fn scan(&self) -> io::Result<Vec<LogFile>> {
        let mut files = Vec::new();
        if self.root.exists() {
            self.scan_dir(&self.root, true, &mut files)?;
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Collect log files under `dir`
    ///
    /// Only an unreadable root is an error. Subdirectories can vanish under
    /// a concurrent archival pass; those are skipped with a warning.
    fn scan_dir(&self, dir: &Path, top_level: bool, out: &mut Vec<LogFile>) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if !top_level => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping entry with unknown type");
                    continue;
                }
            };

            if is_dir {
                if top_level && (name == ARCHIVES_DIR || name == INDEXES_DIR) {
                    continue;
                }
                self.scan_dir(&path, false, out)?;
            } else if let Some(parsed) = LogFileName::parse(name) {
                out.push(LogFile { path, name: parsed });
            }
        }
        Ok(())
    }

    /// Every live partition, oldest date first
    pub fn live_partitions(&self) -> io::Result<Vec<(NaiveDate, PathBuf)>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|f| f.name.kind == LogFileKind::Live)
            .map(|f| (f.name.date, f.path))
            .collect())
    }
}

/// Load a partition's entries
///
/// A missing or zero-length file reads as an empty partition.
pub fn read_partition(path: &Path) -> AuditLogResult<Vec<LogEntry>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    Ok(serde_json::from_str(&content)?)
}

/// Rewrite a partition with the given entries
pub fn write_partition(path: &Path, entries: &[LogEntry]) -> AuditLogResult<()> {
    atomic_write_with(path, |w| serde_json::to_writer(w, entries).map_err(io::Error::from))?;
    Ok(())
}
