//! AuditLog - the engine facade
//!
//! Producers call `log`/`log_bulk`, which only touch the in-memory buffer.
//! A background task flushes the buffer every `flush_interval`; reaching
//! `buffer_threshold` schedules a flush right away. All file I/O runs on
//! blocking threads.
//!
//! Flushes, archival passes and index rebuilds hold the same async mutex,
//! so no partition or index file is ever written by two operations at once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::types::{Actor, AuditAction, AuditQuery, AuditRecord, DateRange, LogEntry};
use crate::utils::{cleanup_temp_files, days_before, Clock, SystemClock};

use super::archive::{ArchiveInfo, ArchiveReport, Archiver, CleanupReport};
use super::index::{AuditIndex, IndexMaintainer};
use super::partition::PartitionLayout;
use super::query::QueryEngine;
use super::rotation::LogRotation;
use super::stats::{AuditStats, StatsCollector, StorageInfo};
use super::store::{AuditLogConfig, AuditLogResult};
use super::writer::PartitionWriter;

/// Result cap for `user_activity` / `module_activity`
pub const ACTIVITY_LIMIT: usize = 1000;

/// Result cap for the query behind `stats`
pub const STATS_LIMIT: usize = 10_000;

/// State shared with the background flusher and blocking tasks
struct Shared {
    config: AuditLogConfig,
    clock: Arc<dyn Clock>,
    layout: PartitionLayout,
    writer: PartitionWriter,
    queries: QueryEngine,
    indexes: IndexMaintainer,
    archiver: Archiver,
    /// Entries not yet on disk, in arrival order
    buffer: Mutex<Vec<LogEntry>>,
    /// Serializes flushes, archival and index rebuilds
    flush_lock: tokio::sync::Mutex<()>,
    /// A threshold flush is queued and has not started draining yet
    flush_scheduled: AtomicBool,
    runtime: Handle,
}

impl Shared {
    /// Drain the buffer into partitions
    ///
    /// Entries of partitions that failed to write go back to the front of
    /// the buffer, ahead of anything logged meanwhile.
    async fn flush(self: &Arc<Self>) -> AuditLogResult<usize> {
        let _guard = self.flush_lock.lock().await;
        self.flush_scheduled.store(false, Ordering::Release);

        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        let batch = Arc::new(batch);
        let job = Arc::clone(&batch);
        let shared = Arc::clone(self);
        let now = self.clock.now();

        let report =
            match tokio::task::spawn_blocking(move || shared.writer.write_batch(&job, now)).await {
                Ok(report) => report,
                Err(e) => {
                    let entries = Arc::try_unwrap(batch).unwrap_or_else(|b| (*b).clone());
                    error!(entries = entries.len(), error = %e, "flush task failed, requeueing");
                    self.requeue(entries);
                    return Err(e.into());
                }
            };

        if !report.is_complete() {
            let failed: Vec<LogEntry> = batch
                .iter()
                .filter(|entry| report.failed_dates.contains(&entry.date()))
                .cloned()
                .collect();
            warn!(requeued = failed.len(), "flush incomplete, entries returned to buffer");
            self.requeue(failed);
        }

        match report.error {
            Some(e) => Err(e),
            None => Ok(report.persisted),
        }
    }

    /// Flush and log the outcome; used where nobody can receive an error
    async fn flush_logged(self: &Arc<Self>, trigger: &'static str) {
        match self.flush().await {
            Ok(0) => {}
            Ok(persisted) => debug!(trigger, persisted, "audit buffer flushed"),
            Err(e) => error!(trigger, error = %e, "audit flush failed"),
        }
    }

    fn requeue(&self, mut entries: Vec<LogEntry>) {
        let mut buffer = self.buffer.lock();
        entries.append(&mut buffer);
        *buffer = entries;
    }

    /// Queue a flush on the runtime unless one is already queued
    fn schedule_flush(self: &Arc<Self>) {
        if self.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            shared.flush_logged("threshold").await;
        });
    }

    fn enqueue(self: &Arc<Self>, entries: Vec<LogEntry>) {
        let len = {
            let mut buffer = self.buffer.lock();
            buffer.extend(entries);
            buffer.len()
        };
        if len >= self.config.buffer_threshold {
            self.schedule_flush();
        }
    }
}

async fn run_flusher(shared: Arc<Shared>, shutdown: Arc<Notify>) {
    let period = shared.config.flush_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pending = !shared.buffer.lock().is_empty();
                if pending {
                    shared.flush_logged("timer").await;
                }
            }
            _ = shutdown.notified() => break,
        }
    }
    debug!("audit flusher stopped");
}

/// The audit log engine
///
/// Construct one per process with `open`, share it by reference (or `Arc`),
/// and call `shutdown` before exit so buffered entries reach disk.
pub struct AuditLog {
    shared: Arc<Shared>,
    flusher: Option<JoinHandle<()>>,
    shutdown: Arc<Notify>,
}

impl AuditLog {
    /// Open (or create) the log tree at `config.log_dir` using the wall clock
    pub async fn open(config: AuditLogConfig) -> AuditLogResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Open with a custom clock for entry timestamps and retention cutoffs
    ///
    /// Startup removes leftover temp files and finishes any rotation that
    /// was interrupted between rename and compression.
    #[instrument(skip_all, fields(log_dir = %config.log_dir.display()))]
    pub async fn open_with_clock(
        config: AuditLogConfig,
        clock: Arc<dyn Clock>,
    ) -> AuditLogResult<Self> {
        config.validate()?;

        let layout = PartitionLayout::new(&config.log_dir);
        let indexes = IndexMaintainer::new(layout.clone(), config.index_path());
        let archiver = Archiver::new(layout.clone(), config.archive_dir());

        let root = config.log_dir.clone();
        let rotation = LogRotation::new(layout.clone(), config.max_file_size);
        let (temp_files, recovered) = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            let temp_files = cleanup_temp_files(&root)?;
            let recovered = rotation.recover_pending()?;
            AuditLogResult::Ok((temp_files, recovered))
        })
        .await??;

        if temp_files > 0 || !recovered.is_empty() {
            warn!(
                temp_files,
                recovered_rotations = recovered.len(),
                "cleaned up after interrupted writes"
            );
        }

        let writer = PartitionWriter::new(
            layout.clone(),
            LogRotation::new(layout.clone(), config.max_file_size),
            indexes.clone(),
        );
        let queries = QueryEngine::new(layout.clone(), indexes.clone());

        let shared = Arc::new(Shared {
            config,
            clock,
            layout,
            writer,
            queries,
            indexes,
            archiver,
            buffer: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_scheduled: AtomicBool::new(false),
            runtime: Handle::current(),
        });

        let shutdown = Arc::new(Notify::new());
        let flusher = tokio::spawn(run_flusher(Arc::clone(&shared), Arc::clone(&shutdown)));

        info!(
            buffer_threshold = shared.config.buffer_threshold,
            flush_interval_ms = shared.config.flush_interval.as_millis() as u64,
            max_file_size = shared.config.max_file_size,
            "audit log opened"
        );

        Ok(Self {
            shared,
            flusher: Some(flusher),
            shutdown,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &AuditLogConfig {
        &self.shared.config
    }

    /// Live partition path for a date
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.shared.layout.partition_path(date)
    }

    /// Number of entries waiting to be flushed
    pub fn buffered_len(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    /// Record an action with `SUCCESS` status
    ///
    /// Returns the assigned entry id immediately; the entry reaches disk on
    /// the next flush. Write failures are logged, never returned here.
    pub fn log(
        &self,
        action: AuditAction,
        actor: Actor,
        context: Map<String, Value>,
        details: Option<Value>,
    ) -> Uuid {
        let mut record = AuditRecord::new(action, actor).context(context);
        record.details = details;
        self.log_record(record)
    }

    /// Record a fully specified audit record
    pub fn log_record(&self, record: AuditRecord) -> Uuid {
        let entry = LogEntry::from_record(record, self.shared.clock.now());
        let id = entry.id;
        self.shared.enqueue(vec![entry]);
        id
    }

    /// Record many entries at once, keeping their order
    pub fn log_bulk<I>(&self, records: I) -> Vec<Uuid>
    where
        I: IntoIterator<Item = AuditRecord>,
    {
        let entries: Vec<LogEntry> = records
            .into_iter()
            .map(|record| LogEntry::from_record(record, self.shared.clock.now()))
            .collect();
        let ids = entries.iter().map(|e| e.id).collect();
        self.shared.enqueue(entries);
        ids
    }

    /// Flush the buffer now
    ///
    /// Waits for an in-flight flush first. Returns the number of entries
    /// persisted, or the first write error (failed entries are requeued).
    pub async fn force_flush(&self) -> AuditLogResult<usize> {
        self.shared.flush().await
    }

    /// Search persisted entries
    ///
    /// Buffered entries are not visible until flushed.
    pub async fn query(&self, query: &AuditQuery) -> AuditLogResult<Vec<LogEntry>> {
        let shared = Arc::clone(&self.shared);
        let query = query.clone();
        tokio::task::spawn_blocking(move || shared.queries.execute(&query)).await?
    }

    /// Most recent entries of one user
    pub async fn user_activity(
        &self,
        user_id: &str,
        range: DateRange,
    ) -> AuditLogResult<Vec<LogEntry>> {
        let query = AuditQuery::new()
            .user(user_id)
            .range(range)
            .paginate(0, ACTIVITY_LIMIT);
        self.query(&query).await
    }

    /// Most recent entries of one module
    pub async fn module_activity(
        &self,
        module: &str,
        range: DateRange,
    ) -> AuditLogResult<Vec<LogEntry>> {
        let query = AuditQuery::new()
            .module(module)
            .range(range)
            .paginate(0, ACTIVITY_LIMIT);
        self.query(&query).await
    }

    /// Aggregate counts over (up to `STATS_LIMIT`) entries in the range
    pub async fn stats(&self, range: DateRange) -> AuditLogResult<AuditStats> {
        let query = AuditQuery::new().range(range).paginate(0, STATS_LIMIT);
        let entries = self.query(&query).await?;
        Ok(AuditStats::from_entries(&entries))
    }

    /// Move live files last modified before `older_than` into `archives/`,
    /// then rebuild the index from scratch
    #[instrument(skip(self))]
    pub async fn archive(&self, older_than: DateTime<Utc>) -> AuditLogResult<ArchiveReport> {
        let _guard = self.shared.flush_lock.lock().await;
        let shared = Arc::clone(&self.shared);
        let now = self.shared.clock.now();

        tokio::task::spawn_blocking(move || {
            let report = shared.archiver.archive_older_than(older_than, now)?;
            shared.indexes.rebuild()?;
            Ok(report)
        })
        .await?
    }

    /// Two-tier retention
    ///
    /// Archives live data older than `retention_days`, then deletes archives
    /// older than twice that.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, retention_days: u32) -> AuditLogResult<CleanupReport> {
        let now = self.shared.clock.now();
        let archive = self.archive(days_before(now, retention_days)).await?;

        let purge_cutoff = days_before(now, retention_days.saturating_mul(2));
        let shared = Arc::clone(&self.shared);
        let (deleted, delete_failed) =
            tokio::task::spawn_blocking(move || shared.archiver.purge_older_than(purge_cutoff))
                .await??;

        info!(
            archived = archive.archived.len(),
            deleted = deleted.len(),
            "retention cleanup complete"
        );

        Ok(CleanupReport {
            archive,
            deleted,
            delete_failed,
        })
    }

    /// Reconstruct the index by scanning every live partition
    #[instrument(skip(self))]
    pub async fn rebuild_indexes(&self) -> AuditLogResult<AuditIndex> {
        let _guard = self.shared.flush_lock.lock().await;
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.indexes.rebuild()).await?
    }

    /// Archive files, oldest first
    pub async fn list_archives(&self) -> AuditLogResult<Vec<ArchiveInfo>> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.archiver.list_archives()).await?
    }

    /// On-disk footprint plus buffer state
    pub async fn storage_info(&self) -> AuditLogResult<StorageInfo> {
        let shared = Arc::clone(&self.shared);
        let mut info = tokio::task::spawn_blocking(move || {
            let mut info = StatsCollector::new(&shared.layout, &shared.archiver).collect()?;
            info.index_present = shared.indexes.index_path().exists();
            AuditLogResult::Ok(info)
        })
        .await??;
        info.buffered_entries = self.buffered_len();
        Ok(info)
    }

    /// Stop the background flusher and flush what is left
    pub async fn shutdown(mut self) -> AuditLogResult<usize> {
        self.shutdown.notify_one();
        if let Some(flusher) = self.flusher.take() {
            if let Err(e) = flusher.await {
                warn!(error = %e, "audit flusher ended abnormally");
            }
        }

        let persisted = self.shared.flush().await?;
        info!(persisted, "audit log shut down");
        Ok(persisted)
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        if let Some(flusher) = self.flusher.take() {
            flusher.abort();
            let pending = self.buffered_len();
            if pending > 0 {
                warn!(pending, "audit log dropped without shutdown, buffered entries lost");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_store::partition::read_partition;
    use crate::utils::ManualClock;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn record(module: &str) -> AuditRecord {
        AuditRecord::new(
            AuditAction::new("CREATE", module),
            Actor::new("u-1", "ada@lab.test", "ADMIN"),
        )
    }

    async fn create_test_log(threshold: usize) -> (AuditLog, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
        ));
        let config = AuditLogConfig::new(temp_dir.path())
            .with_buffer_threshold(threshold)
            .with_flush_interval(std::time::Duration::from_secs(3600));
        let log = AuditLog::open_with_clock(config, clock.clone()).await.unwrap();
        (log, clock, temp_dir)
    }

    #[tokio::test]
    async fn test_log_returns_before_disk_write() {
        let (log, _clock, _temp_dir) = create_test_log(100).await;

        log.log(
            AuditAction::new("LOGIN", "AUTH"),
            Actor::new("u-1", "ada@lab.test", "ADMIN"),
            Map::new(),
            None,
        );

        assert_eq!(log.buffered_len(), 1);
        assert!(!log.partition_path(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).exists());

        assert_eq!(log.force_flush().await.unwrap(), 1);
        assert_eq!(log.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let (log, _clock, temp_dir) = create_test_log(100).await;

        assert_eq!(log.force_flush().await.unwrap(), 0);
        assert_eq!(log.force_flush().await.unwrap(), 0);
        assert!(!temp_dir.path().join("indexes").join("main-index.json").exists());
    }

    #[tokio::test]
    async fn test_bulk_preserves_order() {
        let (log, clock, _temp_dir) = create_test_log(100).await;
        let records: Vec<_> = ["A", "B", "C"].iter().map(|m| record(m)).collect();

        clock.advance(Duration::seconds(1));
        let ids = log.log_bulk(records);
        log.force_flush().await.unwrap();

        let stored = read_partition(&log.partition_path(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
            .unwrap();
        let stored_ids: Vec<_> = stored.iter().map(|e| e.id).collect();
        assert_eq!(stored_ids, ids);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_flush_requeues_at_front() {
        let (log, _clock, temp_dir) = create_test_log(100).await;
        std::fs::write(temp_dir.path().join("2024"), "blocks the year directory").unwrap();

        let first = log.log_record(record("CHEMICALS"));
        assert!(log.force_flush().await.is_err());
        assert_eq!(log.buffered_len(), 1);

        let second = log.log_record(record("ORDERS"));
        std::fs::remove_file(temp_dir.path().join("2024")).unwrap();
        assert_eq!(log.force_flush().await.unwrap(), 2);

        let stored = read_partition(&log.partition_path(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
            .unwrap();
        assert_eq!(stored.iter().map(|e| e.id).collect::<Vec<_>>(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining() {
        let (log, _clock, temp_dir) = create_test_log(100).await;
        log.log_record(record("CHEMICALS"));
        log.log_record(record("CHEMICALS"));

        assert_eq!(log.shutdown().await.unwrap(), 2);
        assert!(temp_dir.path().join("2024/01/audit-2024-01-01.json").exists());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = AuditLogConfig::new(temp_dir.path()).with_max_file_size(0);
        assert!(AuditLog::open(config).await.is_err());
    }
}
