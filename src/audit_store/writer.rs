//! Flush path: buffered entries → partition files → rotation → index
//!
//! Runs on a blocking thread. The engine guarantees only one batch is
//! written at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, warn};

use crate::types::LogEntry;
use crate::utils::rotation_stamp;

use super::index::IndexMaintainer;
use super::partition::{read_partition, write_partition, PartitionLayout};
use super::rotation::LogRotation;
use super::store::{AuditLogError, AuditLogResult};

/// Outcome of writing one batch
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Entries now on disk
    pub persisted: usize,
    /// Dates whose partition could not be written; their entries must be requeued
    pub failed_dates: BTreeSet<NaiveDate>,
    /// Rotation artifacts produced by this flush
    pub rotated: Vec<PathBuf>,
    /// First write error, if any
    pub error: Option<AuditLogError>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failed_dates.is_empty()
    }
}

/// Writes batches into their date partitions
pub struct PartitionWriter {
    layout: PartitionLayout,
    rotation: LogRotation,
    indexes: IndexMaintainer,
}

impl PartitionWriter {
    pub fn new(layout: PartitionLayout, rotation: LogRotation, indexes: IndexMaintainer) -> Self {
        Self {
            layout,
            rotation,
            indexes,
        }
    }

    /// Append `batch` to its partitions, rotate oversized ones, update the index
    ///
    /// Entries keep their arrival order within each partition. A failure on
    /// one date does not stop the others.
    pub fn write_batch(&self, batch: &[LogEntry], now: DateTime<Utc>) -> FlushReport {
        let mut report = FlushReport::default();

        let mut by_date: BTreeMap<NaiveDate, Vec<&LogEntry>> = BTreeMap::new();
        for entry in batch {
            by_date.entry(entry.date()).or_default().push(entry);
        }

        let mut written: Vec<(NaiveDate, &[&LogEntry])> = Vec::with_capacity(by_date.len());

        for (date, entries) in &by_date {
            let path = self.layout.partition_path(*date);

            if let Err(e) = self.append(&path, entries, now) {
                error!(partition = %path.display(), entries = entries.len(), error = %e, "partition write failed");
                report.failed_dates.insert(*date);
                report.error.get_or_insert(e);
                continue;
            }
            report.persisted += entries.len();
            written.push((*date, entries.as_slice()));

            match self.rotation.rotate_if_oversized(&path, now) {
                Ok(Some(rotated)) => report.rotated.push(rotated),
                Ok(None) => {}
                Err(e) => {
                    error!(partition = %path.display(), error = %e, "partition rotation failed");
                }
            }
        }

        if !written.is_empty() {
            if let Err(e) = self.indexes.update(written) {
                error!(error = %e, "index update failed");
                self.indexes.invalidate();
            }
        }

        debug!(
            persisted = report.persisted,
            partitions = by_date.len(),
            failed = report.failed_dates.len(),
            "flushed batch"
        );
        report
    }

    fn append(&self, path: &Path, entries: &[&LogEntry], now: DateTime<Utc>) -> AuditLogResult<()> {
        let mut existing = self.load_for_append(path, now)?;
        existing.extend(entries.iter().map(|e| (*e).clone()));
        write_partition(path, &existing)
    }

    /// Read a partition before appending to it
    ///
    /// An unparsable partition is set aside as `<name>.corrupt-<stamp>` so a
    /// single damaged file cannot keep the buffer from draining.
    fn load_for_append(&self, path: &Path, now: DateTime<Utc>) -> AuditLogResult<Vec<LogEntry>> {
        match read_partition(path) {
            Ok(entries) => Ok(entries),
            Err(AuditLogError::Json(e)) => {
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| AuditLogError::InvalidPartition(path.display().to_string()))?;
                let quarantine =
                    path.with_file_name(format!("{}.corrupt-{}", file_name, rotation_stamp(now)));
                fs::rename(path, &quarantine)?;
                warn!(
                    partition = %path.display(),
                    moved_to = %quarantine.display(),
                    error = %e,
                    "corrupt partition set aside"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_store::rotation::read_compressed;
    use crate::types::{Actor, AuditAction, AuditRecord};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry(module: &str, ts: DateTime<Utc>) -> LogEntry {
        let record = AuditRecord::new(
            AuditAction::new("CREATE", module),
            Actor::new("u-1", "ada@lab.test", "ADMIN"),
        );
        LogEntry::from_record(record, ts)
    }

    fn create_test_writer(max_file_size: u64) -> (PartitionWriter, PartitionLayout, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let layout = PartitionLayout::new(temp_dir.path());
        let writer = PartitionWriter::new(
            layout.clone(),
            LogRotation::new(layout.clone(), max_file_size),
            IndexMaintainer::new(layout.clone(), temp_dir.path().join("indexes/main-index.json")),
        );
        (writer, layout, temp_dir)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_batch_split_by_date() {
        let (writer, layout, _temp_dir) = create_test_writer(u64::MAX);
        let batch = vec![
            entry("CHEMICALS", Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap()),
            entry("ORDERS", Utc.with_ymd_and_hms(2024, 1, 2, 0, 1, 0).unwrap()),
            entry("CHEMICALS", Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()),
        ];

        let report = writer.write_batch(&batch, Utc::now());
        assert!(report.is_complete());
        assert_eq!(report.persisted, 3);

        let first = read_partition(&layout.partition_path(day(1))).unwrap();
        let second = read_partition(&layout.partition_path(day(2))).unwrap();
        assert_eq!(first, vec![batch[0].clone(), batch[2].clone()]);
        assert_eq!(second, vec![batch[1].clone()]);
    }

    #[test]
    fn test_appends_preserve_order_across_flushes() {
        let (writer, layout, _temp_dir) = create_test_writer(u64::MAX);
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let a = entry("CHEMICALS", ts);
        let b = entry("CHEMICALS", ts + chrono::Duration::seconds(1));

        writer.write_batch(std::slice::from_ref(&a), Utc::now());
        writer.write_batch(std::slice::from_ref(&b), Utc::now());

        assert_eq!(read_partition(&layout.partition_path(day(1))).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_flush_updates_index() {
        let (writer, _layout, temp_dir) = create_test_writer(u64::MAX);
        let ts = Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap();
        writer.write_batch(&[entry("EQUIPMENT", ts)], Utc::now());

        let index = crate::audit_store::AuditIndex::load(&temp_dir.path().join("indexes/main-index.json"))
            .unwrap()
            .unwrap();
        assert_eq!(index.module_paths("EQUIPMENT"), vec!["2024/01/audit-2024-01-03.json"]);
        assert_eq!(index.dates.get("2024-01-03").map(String::as_str), Some("2024/01/audit-2024-01-03.json"));
    }

    #[test]
    fn test_oversized_partition_rotates_after_write() {
        let (writer, layout, _temp_dir) = create_test_writer(1024);
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let batch: Vec<_> = (0..20).map(|_| entry("CHEMICALS", ts)).collect();

        let report = writer.write_batch(&batch, Utc::now());
        assert_eq!(report.rotated.len(), 1);

        let live = layout.partition_path(day(1));
        assert!(read_partition(&live).unwrap().is_empty());
        assert_eq!(read_compressed(&report.rotated[0]).unwrap(), batch);
    }

    #[test]
    fn test_corrupt_partition_is_quarantined() {
        let (writer, layout, _temp_dir) = create_test_writer(u64::MAX);
        let live = layout.partition_path(day(1));
        fs::create_dir_all(live.parent().unwrap()).unwrap();
        fs::write(&live, "[{truncated").unwrap();

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let report = writer.write_batch(&[entry("CHEMICALS", ts)], Utc::now());

        assert!(report.is_complete());
        assert_eq!(read_partition(&live).unwrap().len(), 1);
        let quarantined = fs::read_dir(live.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(quarantined, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_date_reported() {
        let (writer, layout, temp_dir) = create_test_writer(u64::MAX);
        // A regular file where the 2024 directory should be makes day 1 unwritable
        fs::write(temp_dir.path().join("2024"), "not a directory").unwrap();

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let ok_ts = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let report = writer.write_batch(&[entry("CHEMICALS", ts), entry("ORDERS", ok_ts)], Utc::now());

        assert_eq!(report.persisted, 1);
        assert!(report.failed_dates.contains(&day(1)));
        assert!(report.error.is_some());
        assert_eq!(
            read_partition(&layout.partition_path(ok_ts.date_naive())).unwrap().len(),
            1
        );
    }
}
