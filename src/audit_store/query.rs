//! Query engine: index-assisted candidate selection, exact filtering,
//! global sort and pagination
//!
//! The index only narrows which partitions are read. Every entry of every
//! candidate is still checked against all filters.

use std::collections::BTreeSet;
use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::types::{AuditQuery, LogEntry};

use super::index::{AuditIndex, IndexMaintainer};
use super::partition::{read_partition, PartitionLayout};
use super::store::AuditLogResult;

/// Which dimension chose the candidate partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    User,
    Module,
    Action,
    DateRange,
    /// Every live partition: no selective filter, or no usable index
    FullScan,
}

/// Partitions a query will read
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub source: CandidateSource,
    pub files: Vec<PathBuf>,
}

/// Reads partitions to answer `AuditQuery`s
pub struct QueryEngine {
    layout: PartitionLayout,
    indexes: IndexMaintainer,
}

impl QueryEngine {
    pub fn new(layout: PartitionLayout, indexes: IndexMaintainer) -> Self {
        Self { layout, indexes }
    }

    /// Pick the candidate partitions for `query`
    ///
    /// Precedence: user → module → action → date range → all partitions.
    /// Without a readable index every live partition is a candidate.
    pub fn plan(&self, query: &AuditQuery) -> AuditLogResult<QueryPlan> {
        let index = match self.indexes.load() {
            Ok(Some(index)) => Some(index),
            Ok(None) => {
                debug!("no audit index, falling back to full scan");
                None
            }
            Err(e) => {
                warn!(error = %e, "audit index unreadable, falling back to full scan");
                None
            }
        };

        match index.and_then(|index| self.indexed_candidates(&index, query)) {
            Some((source, relative)) => {
                let files = relative
                    .into_iter()
                    .map(|rel| self.layout.resolve(&rel))
                    .filter(|path| {
                        let exists = path.exists();
                        if !exists {
                            debug!(path = %path.display(), "index points at missing partition");
                        }
                        exists
                    })
                    .collect();
                Ok(QueryPlan { source, files })
            }
            None => {
                let files = self
                    .layout
                    .live_partitions()?
                    .into_iter()
                    .map(|(_, path)| path)
                    .collect();
                Ok(QueryPlan {
                    source: CandidateSource::FullScan,
                    files,
                })
            }
        }
    }

    fn indexed_candidates(
        &self,
        index: &AuditIndex,
        query: &AuditQuery,
    ) -> Option<(CandidateSource, BTreeSet<String>)> {
        let (source, paths) = if let Some(user_id) = &query.user_id {
            (CandidateSource::User, index.user_paths(user_id))
        } else if let Some(module) = &query.module {
            (CandidateSource::Module, index.module_paths(module))
        } else if let Some(action) = &query.action_type {
            (CandidateSource::Action, index.action_paths(action))
        } else if !query.range.is_unbounded() {
            (CandidateSource::DateRange, index.range_paths(&query.range))
        } else {
            return None;
        };
        Some((source, paths.into_iter().collect()))
    }

    /// Run a query: plan, read candidates in parallel, filter, sort newest
    /// first, then apply offset/limit
    ///
    /// Unreadable candidate files are skipped so the rest still answer.
    pub fn execute(&self, query: &AuditQuery) -> AuditLogResult<Vec<LogEntry>> {
        let plan = self.plan(query)?;
        let needle = query.search.as_ref().map(|s| s.to_lowercase());

        let per_file: Vec<Vec<LogEntry>> = plan
            .files
            .par_iter()
            .map(|path| match read_partition(path) {
                Ok(entries) => entries
                    .into_iter()
                    .filter(|entry| matches(entry, query, needle.as_deref()))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable partition");
                    Vec::new()
                }
            })
            .collect();

        let mut results: Vec<LogEntry> = per_file.into_iter().flatten().collect();
        let total = results.len();

        // Reverse first so equal timestamps come out latest-arrival first
        results.reverse();
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let page: Vec<LogEntry> = results
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        debug!(
            source = ?plan.source,
            files = plan.files.len(),
            matched = total,
            returned = page.len(),
            "audit query"
        );
        Ok(page)
    }
}

/// Whether `entry` satisfies every filter in `query`
///
/// `needle` is the lowercased search string.
pub fn matches(entry: &LogEntry, query: &AuditQuery, needle: Option<&str>) -> bool {
    if query.user_id.as_deref().is_some_and(|id| entry.user.id != id) {
        return false;
    }
    if query.module.as_deref().is_some_and(|m| entry.action.module != m) {
        return false;
    }
    if query
        .action_type
        .as_deref()
        .is_some_and(|a| entry.action.action_type != a)
    {
        return false;
    }
    if let Some(entity_id) = query.entity_id.as_deref() {
        if entry.action.entity_id.as_deref() != Some(entity_id) {
            return false;
        }
    }
    if query.status.is_some_and(|s| entry.status != s) {
        return false;
    }
    if !query.range.contains(&entry.timestamp) {
        return false;
    }
    if let Some(needle) = needle {
        let haystack = serde_json::to_string(entry)
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        if !haystack.contains(needle) {
            return false;
        }
    }
    true
}
