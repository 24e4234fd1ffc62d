//! Size-triggered rotation and gzip compression
//!
//! Rotation of an oversized live partition:
//! 1. rename `audit-<date>.json` to `audit-<date>-<stamp>.json`
//! 2. stream-compress it to `audit-<date>-<stamp>.json.gz`
//! 3. delete the uncompressed rotated copy
//! 4. recreate an empty live file
//!
//! A crash between 1 and 3 leaves a `RotatedPending` file behind;
//! `recover_pending` finishes the job on the next start.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, warn};

use crate::types::LogEntry;
use crate::utils::rotation_stamp;

use super::partition::{LogFile, LogFileKind, PartitionLayout};
use super::store::AuditLogResult;

/// Gzip `src` into `dst`, keeping `src`'s modification time
///
/// Returns the compressed size in bytes.
pub fn compress_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut input = File::open(src)?;
    let modified = input.metadata()?.modified()?;

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut encoder = GzEncoder::new(BufWriter::new(File::create(dst)?), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    let file = encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    file.set_modified(modified)?;

    Ok(file.metadata()?.len())
}

/// Decode a rotated or archived artifact back into entries
pub fn read_compressed(path: &Path) -> AuditLogResult<Vec<LogEntry>> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let mut content = String::new();
    decoder.read_to_string(&mut content)?;

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Rotation manager for live partitions
pub struct LogRotation {
    layout: PartitionLayout,
    max_file_size: u64,
}

impl LogRotation {
    pub fn new(layout: PartitionLayout, max_file_size: u64) -> Self {
        Self {
            layout,
            max_file_size,
        }
    }

    /// Rotate `live` if it is larger than the size ceiling
    ///
    /// # Returns
    /// * `Ok(Some(path))` - path of the new `.json.gz` artifact
    /// * `Ok(None)` - partition is within the ceiling
    pub fn rotate_if_oversized(
        &self,
        live: &Path,
        now: DateTime<Utc>,
    ) -> AuditLogResult<Option<PathBuf>> {
        let size = match fs::metadata(live) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if size <= self.max_file_size {
            return Ok(None);
        }

        self.rotate(live, now).map(Some)
    }

    /// Unconditionally rotate a live partition
    ///
    /// If compression fails the renamed file is moved back, leaving the
    /// partition as it was before the call.
    pub fn rotate(&self, live: &Path, now: DateTime<Utc>) -> AuditLogResult<PathBuf> {
        let (pending, compressed) = unique_targets(live, &rotation_stamp(now))?;

        fs::rename(live, &pending)?;

        let compressed_size = match compress_file(&pending, &compressed) {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&compressed);
                fs::rename(&pending, live)?;
                return Err(e.into());
            }
        };

        if let Err(e) = fs::remove_file(&pending) {
            warn!(path = %pending.display(), error = %e, "failed to remove rotated copy");
        }

        File::create(live)?.sync_all()?;

        info!(
            partition = %live.display(),
            rotated = %compressed.display(),
            compressed_size,
            "rotated oversized partition"
        );

        Ok(compressed)
    }

    /// Compress rotated files that a crash left uncompressed
    pub fn recover_pending(&self) -> AuditLogResult<Vec<PathBuf>> {
        let mut recovered = Vec::new();

        for file in self.layout.scan()? {
            if file.name.kind != LogFileKind::RotatedPending {
                continue;
            }

            let target = file.path.with_extension("json.gz");
            match compress_file(&file.path, &target).and_then(|_| fs::remove_file(&file.path)) {
                Ok(()) => {
                    info!(path = %target.display(), "recovered interrupted rotation");
                    recovered.push(target);
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to recover rotated file");
                }
            }
        }

        Ok(recovered)
    }

    /// Compressed rotation artifacts still in the live tree
    pub fn list_rotated(&self) -> AuditLogResult<Vec<LogFile>> {
        Ok(self
            .layout
            .scan()?
            .into_iter()
            .filter(|f| f.name.kind == LogFileKind::Compressed)
            .collect())
    }
}

fn unique_targets(live: &Path, stamp: &str) -> AuditLogResult<(PathBuf, PathBuf)> {
    let mut candidate = stamp.to_string();
    let mut n = 1;
    loop {
        let pending = PartitionLayout::rotated_path(live, &candidate, false)?;
        let compressed = PartitionLayout::rotated_path(live, &candidate, true)?;
        if !pending.exists() && !compressed.exists() {
            return Ok((pending, compressed));
        }
        candidate = format!("{}N{}", stamp, n);
        n += 1;
    }
}
