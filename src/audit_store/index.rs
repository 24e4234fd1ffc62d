//! Secondary indexes over live partitions
//!
//! `indexes/main-index.json` maps each user, module, action type and date to
//! the partitions that may hold matching entries. Paths are stored relative
//! to the log root. The file is rewritten whole after every flush; its size
//! is bounded by the number of distinct keys, not by the number of entries.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{DateRange, LogEntry};
use crate::utils::atomic_write_with;

use super::partition::{read_partition, PartitionLayout};
use super::store::AuditLogResult;

/// In-memory form of the index file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditIndex {
    #[serde(default)]
    pub users: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub modules: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub actions: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub dates: BTreeMap<String, String>,
}

impl AuditIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entries` as living in the partition for `date`
    ///
    /// Idempotent: recording the same entries twice leaves the index unchanged.
    pub fn record<'a, I>(&mut self, date: NaiveDate, entries: I)
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let path = PartitionLayout::relative_path(date);

        for entry in entries {
            insert(&mut self.users, &entry.user.id, &path);
            insert(&mut self.modules, &entry.action.module, &path);
            insert(&mut self.actions, &entry.action.action_type, &path);
        }

        self.dates.insert(date.to_string(), path);
    }

    pub fn user_paths(&self, user_id: &str) -> Vec<String> {
        lookup(&self.users, user_id)
    }

    pub fn module_paths(&self, module: &str) -> Vec<String> {
        lookup(&self.modules, module)
    }

    pub fn action_paths(&self, action_type: &str) -> Vec<String> {
        lookup(&self.actions, action_type)
    }

    /// Partitions whose day overlaps the range
    pub fn range_paths(&self, range: &DateRange) -> Vec<String> {
        self.dates
            .iter()
            .filter(|(day, _)| {
                NaiveDate::parse_from_str(day, "%Y-%m-%d")
                    .map(|day| range.overlaps_day(day))
                    .unwrap_or(false)
            })
            .map(|(_, path)| path.clone())
            .collect()
    }

    pub fn partition_count(&self) -> usize {
        self.dates.len()
    }

    /// Load an index file
    ///
    /// # Returns
    /// * `Ok(None)` - no index file
    /// * `Err(_)` - file exists but cannot be read or parsed
    pub fn load(path: &Path) -> AuditLogResult<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Atomically replace the index file
    pub fn save(&self, path: &Path) -> AuditLogResult<()> {
        atomic_write_with(path, |w| serde_json::to_writer_pretty(w, self).map_err(io::Error::from))?;
        Ok(())
    }
}

fn insert(map: &mut BTreeMap<String, BTreeSet<String>>, key: &str, path: &str) {
    if let Some(paths) = map.get_mut(key) {
        if !paths.contains(path) {
            paths.insert(path.to_string());
        }
    } else {
        map.insert(key.to_string(), BTreeSet::from([path.to_string()]));
    }
}

fn lookup(map: &BTreeMap<String, BTreeSet<String>>, key: &str) -> Vec<String> {
    map.get(key)
        .map(|paths| paths.iter().cloned().collect())
        .unwrap_or_default()
}

/// Keeps `main-index.json` in step with the partitions
#[derive(Debug, Clone)]
pub struct IndexMaintainer {
    layout: PartitionLayout,
    index_path: PathBuf,
}

impl IndexMaintainer {
    pub fn new(layout: PartitionLayout, index_path: PathBuf) -> Self {
        Self { layout, index_path }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn load(&self) -> AuditLogResult<Option<AuditIndex>> {
        AuditIndex::load(&self.index_path)
    }

    /// Merge freshly flushed entries into the persisted index
    ///
    /// A missing or unreadable index is rebuilt from the partitions first, so
    /// partitions written before it went missing stay reachable.
    pub fn update<'a, I>(&self, touched: I) -> AuditLogResult<()>
    where
        I: IntoIterator<Item = (NaiveDate, &'a [&'a LogEntry])>,
    {
        let mut index = match self.load() {
            Ok(Some(index)) => index,
            Ok(None) => {
                debug!("no index file, building from partitions");
                self.scan()?
            }
            Err(e) => {
                warn!(error = %e, "index unreadable, rebuilding from partitions");
                self.scan()?
            }
        };

        for (date, entries) in touched {
            index.record(date, entries.iter().copied());
        }

        index.save(&self.index_path)
    }

    /// Reconstruct the index from every live partition and persist it
    pub fn rebuild(&self) -> AuditLogResult<AuditIndex> {
        let index = self.scan()?;
        index.save(&self.index_path)?;

        info!(
            partitions = index.partition_count(),
            users = index.users.len(),
            modules = index.modules.len(),
            "rebuilt audit index"
        );
        Ok(index)
    }

    /// Drop the index file so readers fall back to a full scan
    pub fn invalidate(&self) {
        match fs::remove_file(&self.index_path) {
            Ok(()) => warn!(path = %self.index_path.display(), "invalidated audit index"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to invalidate audit index"),
        }
    }

    fn scan(&self) -> AuditLogResult<AuditIndex> {
        let partitions = self.layout.live_partitions()?;

        let loaded: Vec<_> = partitions
            .par_iter()
            .map(|(date, path)| (*date, path, read_partition(path)))
            .collect();

        let mut index = AuditIndex::new();
        for (date, path, result) in loaded {
            match result {
                Ok(entries) => index.record(date, &entries),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable partition");
                }
            }
        }
        Ok(index)
    }
}
