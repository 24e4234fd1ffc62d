//! Audit statistics
//!
//! - `AuditStats`: pure aggregation over a result set
//! - `StorageInfo`: on-disk footprint of the log tree

use std::collections::BTreeMap;
use std::fs;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::LogEntry;

use super::archive::Archiver;
use super::partition::{LogFileKind, PartitionLayout};
use super::store::AuditLogResult;

/// Grouped counts over a set of entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total: usize,
    pub by_module: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
    pub by_user: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl AuditStats {
    /// Aggregate `entries`. No I/O, no ordering assumptions.
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let mut stats = Self::default();

        for entry in entries {
            stats.total += 1;
            *stats.by_module.entry(entry.action.module.clone()).or_insert(0) += 1;
            *stats.by_action.entry(entry.action.action_type.clone()).or_insert(0) += 1;
            *stats.by_user.entry(entry.user.id.clone()).or_insert(0) += 1;
            *stats.by_status.entry(entry.status.to_string()).or_insert(0) += 1;

            if stats.earliest.map_or(true, |t| entry.timestamp < t) {
                stats.earliest = Some(entry.timestamp);
            }
            if stats.latest.map_or(true, |t| entry.timestamp > t) {
                stats.latest = Some(entry.timestamp);
            }
        }

        stats
    }
}

/// Size of the log tree on disk
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    /// Number of live partitions
    pub live_partitions: usize,
    /// Total bytes of live partitions
    pub live_size: u64,
    /// Number of compressed rotation artifacts in the live tree
    pub rotated_files: usize,
    /// Total bytes of rotation artifacts
    pub rotated_size: u64,
    /// Number of archive files
    pub archive_files: usize,
    /// Total bytes of archives
    pub archive_size: u64,
    /// Entries waiting in the write buffer
    pub buffered_entries: usize,
    /// Whether `main-index.json` exists
    pub index_present: bool,
}

impl StorageInfo {
    /// Calculate total storage size
    pub fn total_size(&self) -> u64 {
        self.live_size + self.rotated_size + self.archive_size
    }

    /// Format size in human-readable format
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

impl std::fmt::Display for StorageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "live partitions: {} ({})",
            self.live_partitions,
            Self::format_size(self.live_size)
        )?;
        writeln!(
            f,
            "rotated files:   {} ({})",
            self.rotated_files,
            Self::format_size(self.rotated_size)
        )?;
        writeln!(
            f,
            "archives:        {} ({})",
            self.archive_files,
            Self::format_size(self.archive_size)
        )?;
        writeln!(f, "buffered:        {}", self.buffered_entries)?;
        write!(f, "index:           {}", if self.index_present { "present" } else { "missing" })
    }
}

/// Collector for on-disk statistics
pub struct StatsCollector<'a> {
    layout: &'a PartitionLayout,
    archiver: &'a Archiver,
}

impl<'a> StatsCollector<'a> {
    pub fn new(layout: &'a PartitionLayout, archiver: &'a Archiver) -> Self {
        Self { layout, archiver }
    }

    /// Walk the tree and sum file sizes
    ///
    /// `buffered_entries` and `index_present` are left for the caller.
    pub fn collect(&self) -> AuditLogResult<StorageInfo> {
        let mut info = StorageInfo::default();

        for file in self.layout.scan()? {
            let size = fs::metadata(&file.path).map(|m| m.len()).unwrap_or(0);
            match file.name.kind {
                LogFileKind::Live => {
                    info.live_partitions += 1;
                    info.live_size += size;
                }
                LogFileKind::Compressed => {
                    info.rotated_files += 1;
                    info.rotated_size += size;
                }
                LogFileKind::RotatedPending => {}
            }
        }

        let archives = self.archiver.list_archives()?;
        info.archive_files = archives.len();
        info.archive_size = archives.iter().map(|a| a.size).sum();

        Ok(info)
    }
}
