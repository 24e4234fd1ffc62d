//! Archival and retention
//!
//! Two tiers: live partitions older than the retention window are gzipped
//! into `archives/`; archives older than twice the window are deleted.
//! Archive files keep the modification time of the data they were made from.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::utils::rotation_stamp;
use crate::utils::time::{from_system_time, to_system_time};

use super::partition::{LogFile, LogFileKind, LogFileName, PartitionLayout};
use super::rotation::compress_file;
use super::store::{AuditLogError, AuditLogResult};

/// Information about an archive file
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// Path to the archive file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Modification time (age of the archived data)
    pub modified: DateTime<Utc>,
}

/// Result of one archival pass
#[derive(Debug, Clone, Default)]
pub struct ArchiveReport {
    /// Destination paths under `archives/`
    pub archived: Vec<PathBuf>,
    /// Files that could not be archived
    pub failed: usize,
}

/// Result of `cleanup`
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub archive: ArchiveReport,
    /// Archives permanently removed
    pub deleted: Vec<PathBuf>,
    /// Archives that could not be removed
    pub delete_failed: usize,
}

/// Moves aged partitions into long-term storage and expires old archives
pub struct Archiver {
    layout: PartitionLayout,
    archive_dir: PathBuf,
}

impl Archiver {
    pub fn new(layout: PartitionLayout, archive_dir: PathBuf) -> Self {
        Self {
            layout,
            archive_dir,
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Archive every live file last modified before `cutoff`
    ///
    /// Live partitions are compressed into `archives/`; rotation artifacts
    /// (already compressed) are moved there as they are. The caller must
    /// rebuild the index afterwards.
    pub fn archive_older_than(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AuditLogResult<ArchiveReport> {
        let cutoff = to_system_time(cutoff);
        let stamp = rotation_stamp(now);
        let mut report = ArchiveReport::default();

        for file in self.layout.scan()? {
            if file.name.kind == LogFileKind::RotatedPending {
                continue;
            }

            let modified = match fs::metadata(&file.path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "cannot stat partition");
                    report.failed += 1;
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            match self.archive_file(&file, &stamp) {
                Ok(dest) => {
                    debug!(from = %file.path.display(), to = %dest.display(), "archived");
                    report.archived.push(dest);
                    if let Some(parent) = file.path.parent() {
                        self.prune_empty_dirs(parent);
                    }
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to archive");
                    report.failed += 1;
                }
            }
        }

        if !report.archived.is_empty() || report.failed > 0 {
            info!(
                archived = report.archived.len(),
                failed = report.failed,
                "archival pass complete"
            );
        }
        Ok(report)
    }

    fn archive_file(&self, file: &LogFile, stamp: &str) -> AuditLogResult<PathBuf> {
        let file_name = file
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AuditLogError::InvalidPartition(file.path.display().to_string()))?;

        fs::create_dir_all(&self.archive_dir)?;
        let stem = file_name
            .strip_suffix(".json.gz")
            .or_else(|| file_name.strip_suffix(".json"))
            .unwrap_or(file_name);
        let dest = self.unique_destination(stem, &file.name, stamp);

        match file.name.kind {
            LogFileKind::Live => {
                if let Err(e) = compress_file(&file.path, &dest) {
                    let _ = fs::remove_file(&dest);
                    return Err(e.into());
                }
                fs::remove_file(&file.path)?;
            }
            _ => fs::rename(&file.path, &dest)?,
        }
        Ok(dest)
    }

    /// `archives/<stem>.json.gz`, or a stamped variant when that is taken
    fn unique_destination(&self, stem: &str, name: &LogFileName, stamp: &str) -> PathBuf {
        let plain = self.archive_dir.join(format!("{}.json.gz", stem));
        if !plain.exists() {
            return plain;
        }

        let base = if name.stamp.is_none() {
            format!("{}-{}", stem, stamp)
        } else {
            stem.to_string()
        };
        let mut candidate = self.archive_dir.join(format!("{}.json.gz", base));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.archive_dir.join(format!("{}N{}.json.gz", base, n));
            n += 1;
        }
        candidate
    }

    fn prune_empty_dirs(&self, dir: &Path) {
        let mut current = Some(dir);
        while let Some(dir) = current {
            if dir == self.layout.root() || !dir.starts_with(self.layout.root()) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Delete archives last modified before `cutoff`
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AuditLogResult<(Vec<PathBuf>, usize)> {
        let mut deleted = Vec::new();
        let mut failed = 0;

        for archive in self.list_archives()? {
            if archive.modified >= cutoff {
                continue;
            }
            match fs::remove_file(&archive.path) {
                Ok(()) => {
                    info!(path = %archive.path.display(), "deleted expired archive");
                    deleted.push(archive.path);
                }
                Err(e) => {
                    warn!(path = %archive.path.display(), error = %e, "failed to delete archive");
                    failed += 1;
                }
            }
        }

        Ok((deleted, failed))
    }

    /// List archive files, oldest first
    pub fn list_archives(&self) -> AuditLogResult<Vec<ArchiveInfo>> {
        if !self.archive_dir.exists() {
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.archive_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) != Some("gz") {
                continue;
            }
            let metadata = entry.metadata()?;
            archives.push(ArchiveInfo {
                path,
                size: metadata.len(),
                modified: from_system_time(metadata.modified()?),
            });
        }

        archives.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(archives)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_store::partition::write_partition;
    use crate::types::LogEntry;
    use crate::audit_store::rotation::read_compressed;
    use crate::types::{Actor, AuditAction, AuditRecord};
    use crate::utils::set_modified;
    use chrono::{Duration, NaiveDate, TimeZone};
    use tempfile::TempDir;

    fn entries(date: NaiveDate, n: usize) -> Vec<LogEntry> {
        let ts = Utc.from_utc_datetime(&date.and_hms_opt(10, 0, 0).unwrap());
        (0..n)
            .map(|_| {
                LogEntry::from_record(
                    AuditRecord::new(
                        AuditAction::new("CREATE", "CHEMICALS"),
                        Actor::new("u-1", "ada@lab.test", "ADMIN"),
                    ),
                    ts,
                )
            })
            .collect()
    }

    fn create_aged_partition(layout: &PartitionLayout, now: DateTime<Utc>, age_days: i64) -> PathBuf {
        let date = (now - Duration::days(age_days)).date_naive();
        let path = layout.partition_path(date);
        write_partition(&path, &entries(date, 2)).unwrap();
        set_modified(&path, to_system_time(now - Duration::days(age_days))).unwrap();
        path
    }

    fn create_archiver() -> (Archiver, PartitionLayout, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let layout = PartitionLayout::new(temp_dir.path());
        let archiver = Archiver::new(layout.clone(), temp_dir.path().join("archives"));
        (archiver, layout, temp_dir)
    }

    #[test]
    fn test_archive_moves_only_old_partitions() {
        let (archiver, layout, _temp_dir) = create_archiver();
        let now = Utc::now();
        let old = create_aged_partition(&layout, now, 40);
        let fresh = create_aged_partition(&layout, now, 1);

        let report = archiver.archive_older_than(now - Duration::days(30), now).unwrap();

        assert_eq!(report.archived.len(), 1);
        assert_eq!(report.failed, 0);
        assert!(!old.exists());
        assert!(fresh.exists());

        let archived = &report.archived[0];
        assert_eq!(
            archived.file_name().unwrap().to_string_lossy(),
            format!("{}.gz", old.file_name().unwrap().to_string_lossy())
        );
        assert_eq!(read_compressed(archived).unwrap().len(), 2);
    }

    #[test]
    fn test_archive_keeps_data_age() {
        let (archiver, layout, _temp_dir) = create_archiver();
        let now = Utc::now();
        create_aged_partition(&layout, now, 40);

        archiver.archive_older_than(now - Duration::days(30), now).unwrap();

        let archives = archiver.list_archives().unwrap();
        assert_eq!(archives.len(), 1);
        assert!(archives[0].modified < now - Duration::days(39));
    }

    #[test]
    fn test_archive_name_collision() {
        let (archiver, layout, _temp_dir) = create_archiver();
        let now = Utc::now();

        let path = create_aged_partition(&layout, now, 40);
        archiver.archive_older_than(now - Duration::days(30), now).unwrap();

        // Same day written again later and archived again
        write_partition(&path, &entries((now - Duration::days(40)).date_naive(), 1)).unwrap();
        set_modified(&path, to_system_time(now - Duration::days(35))).unwrap();
        archiver.archive_older_than(now - Duration::days(30), now).unwrap();

        assert_eq!(archiver.list_archives().unwrap().len(), 2);
    }

    #[test]
    fn test_archive_file_rejects_nameless_path() {
        let (archiver, _layout, _temp_dir) = create_archiver();
        let file = LogFile {
            path: PathBuf::from("/"),
            name: LogFileName::parse("audit-2024-01-01.json").unwrap(),
        };

        let result = archiver.archive_file(&file, "20240101T000000000");
        assert!(matches!(result, Err(AuditLogError::InvalidPartition(_))));
        assert!(!archiver.archive_dir().exists());
    }

    #[test]
    fn test_purge_older_than() {
        let (archiver, layout, _temp_dir) = create_archiver();
        let now = Utc::now();
        create_aged_partition(&layout, now, 40);
        create_aged_partition(&layout, now, 70);

        archiver.archive_older_than(now - Duration::days(30), now).unwrap();
        assert_eq!(archiver.list_archives().unwrap().len(), 2);

        let (deleted, failed) = archiver.purge_older_than(now - Duration::days(60)).unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(failed, 0);
        assert_eq!(archiver.list_archives().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_month_dirs_pruned() {
        let (archiver, layout, temp_dir) = create_archiver();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        let old = create_aged_partition(&layout, now, 100);

        archiver.archive_older_than(now - Duration::days(30), now).unwrap();

        assert!(!old.parent().unwrap().exists());
        assert!(temp_dir.path().exists());
        assert!(archiver.archive_dir().exists());
    }

    #[test]
    fn test_rotated_artifacts_are_moved() {
        let (archiver, layout, _temp_dir) = create_archiver();
        let now = Utc::now();
        let live = create_aged_partition(&layout, now, 40);

        let rotated = PartitionLayout::rotated_path(&live, "20240101T000000000", true).unwrap();
        compress_file(&live, &rotated).unwrap();

        let report = archiver.archive_older_than(now - Duration::days(30), now).unwrap();
        assert_eq!(report.archived.len(), 2);
        assert!(!rotated.exists());
        assert!(archiver
            .archive_dir()
            .join(rotated.file_name().unwrap())
            .exists());
    }
}
