//! Audit Log Storage Engine
//!
//! Append-only, date-partitioned audit trail stored as plain JSON files,
//! with an inverted index, size-based rotation and two-tier retention.
//!
//! # Features
//!
//! - **Buffered writes**: `log()` returns immediately; a background task flushes
//! - **Daily partitions**: `YYYY/MM/audit-YYYY-MM-DD.json`, rewritten atomically
//! - **Indexed queries**: user/module/action/date lookups narrow the files read
//! - **Rotation**: oversized partitions are gzip-compressed in place
//! - **Retention**: archive after R days, delete archives after 2R days
//!
//! # Modules
//!
//! - `types`: Core data structures (LogEntry, AuditRecord, AuditQuery)
//! - `audit_store`: The engine, partition writer, index, query and retention
//! - `utils`: Atomic file writes, clocks and timestamp helpers
//!
//! # Example
//!
//! ```no_run
//! use audit_log::{Actor, AuditAction, AuditLog, AuditLogConfig, AuditQuery};
//! use serde_json::Map;
//!
//! #[tokio::main]
//! async fn main() -> audit_log::AuditLogResult<()> {
//!     let log = AuditLog::open(AuditLogConfig::new("logs")).await?;
//!
//!     log.log(
//!         AuditAction::new("CREATE", "CHEMICALS").on_entity("chem-42"),
//!         Actor::new("u-1", "ada@lab.test", "ADMIN"),
//!         Map::new(),
//!         None,
//!     );
//!     log.force_flush().await?;
//!
//!     let recent = log.query(&AuditQuery::new().module("CHEMICALS")).await?;
//!     println!("{} entries", recent.len());
//!
//!     log.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod audit_store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use audit_store::{
    ArchiveInfo, ArchiveReport, AuditIndex, AuditLog, AuditLogConfig, AuditLogError,
    AuditLogResult, AuditStats, CleanupReport, StorageInfo,
};
pub use types::{Actor, AuditAction, AuditQuery, AuditRecord, DateRange, EntryStatus, LogEntry};
pub use utils::{Clock, ManualClock, SystemClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
