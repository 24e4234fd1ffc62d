//! Audit Store Module
//!
//! Date-partitioned, append-only audit log storage:
//! - `AuditLog`: Buffered writer, background flusher and query facade
//! - `PartitionWriter`: Appends batches to daily partition files
//! - `LogRotation`: Compresses oversized partitions
//! - `IndexMaintainer`: Keeps `indexes/main-index.json` in step with partitions
//! - `QueryEngine`: Index-assisted filtering, sorting and pagination
//! - `Archiver`: Moves aged files into `archives/` and purges old archives
//! - `StatsCollector`: Storage footprint
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌─────────┐    ┌────────────┐    ┌──────────────────┐    ┌──────────────┐
//! │ log()   │───►│ buffer     │───►│ write_batch()    │───►│ rotate if    │
//! │ bulk()  │    │ (memory)   │    │ YYYY/MM/audit-*  │    │ oversized    │
//! └─────────┘    └────────────┘    └──────────────────┘    └──────┬───────┘
//!                 threshold or                                    │
//!                 interval tick                           ┌───────▼───────┐
//!                                                         │ merge index   │
//!                                                         └───────────────┘
//!
//! Read Path:
//! ┌───────────────┐    ┌─────────────────┐    ┌──────────────┐
//! │ index lookup  │───►│ read candidates │───►│ filter, sort │───► page
//! │ (or full scan)│    │ (rayon)         │    │ newest first │
//! └───────────────┘    └─────────────────┘    └──────────────┘
//!
//! Retention:
//! live files older than R ──► archives/*.json.gz ──► deleted after 2R
//! ```

mod archive;
mod engine;
mod index;
mod partition;
mod query;
mod rotation;
mod stats;
mod store;
mod writer;

pub use archive::{ArchiveInfo, ArchiveReport, Archiver, CleanupReport};
pub use engine::{AuditLog, ACTIVITY_LIMIT, STATS_LIMIT};
pub use index::{AuditIndex, IndexMaintainer};
pub use partition::{
    read_partition, write_partition, LogFile, LogFileKind, LogFileName, PartitionLayout,
};
pub use query::{matches, CandidateSource, QueryEngine, QueryPlan};
pub use rotation::{compress_file, read_compressed, LogRotation};
pub use stats::{AuditStats, StatsCollector, StorageInfo};
pub use store::{
    AuditLogConfig, AuditLogError, AuditLogResult, ARCHIVES_DIR, DEFAULT_BUFFER_THRESHOLD,
    DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_FILE_SIZE, DEFAULT_RETENTION_DAYS, INDEXES_DIR,
};
pub use writer::{FlushReport, PartitionWriter};
