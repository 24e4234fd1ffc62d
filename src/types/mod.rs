//! Core data types for the audit log
//!
//! - `entry`: LogEntry, Actor, AuditAction, EntryStatus, AuditRecord
//! - `query`: AuditQuery and DateRange filters

mod entry;
mod query;

pub use entry::{Actor, AuditAction, AuditRecord, EntryStatus, LogEntry};
pub use query::{AuditQuery, DateRange};
