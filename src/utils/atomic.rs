//! Atomic file operations
//!
//! Partitions and the index are rewritten whole on every flush. Writes go
//! through a temp file so a crash leaves either the old or the new version:
//!
//! 1. Write to a temporary file (.tmp)
//! 2. Call sync_all() to flush to disk
//! 3. Rename temp file to final path (atomic on most filesystems)

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

/// Atomically write content using a writer function
///
/// The writer is buffered; it is flushed and synced before the rename.
///
/// ```ignore
/// atomic_write_with("logs/indexes/main-index.json", |w| {
///     serde_json::to_writer(w, &index).map_err(io::Error::from)
/// })?;
/// ```
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(&temp_path)?);
    if let Err(e) = write_fn(&mut writer).and_then(|_| writer.flush()) {
        drop(writer);
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Set a file's modification time
///
/// Compressed copies keep the age of the data they were made from, so
/// retention windows measure the data rather than the copy.
pub fn set_modified<P: AsRef<Path>>(path: P, modified: SystemTime) -> io::Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(modified)
}

/// Remove leftover .tmp files under `dir` (recursively)
///
/// Call on startup to clear temp files left behind by an interrupted write.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    let mut cleaned = 0;

    if !dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            cleaned += cleanup_temp_files(&path)?;
        } else if path.extension().map(|e| e == "tmp").unwrap_or(false) {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_with() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        atomic_write_with(&path, |w| {
            w.write_all(b"[1,2,3]")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[1,2,3]");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("2024").join("01").join("test.json");

        atomic_write_with(&path, |w| w.write_all(b"[]")).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_failed_write_keeps_old_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");
        fs::write(&path, "old").unwrap();

        let result = atomic_write_with(&path, |w| {
            w.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::Other, "boom"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_set_modified() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("old.json");
        fs::write(&path, "[]").unwrap();

        let past = SystemTime::now() - Duration::from_secs(40 * 86_400);
        set_modified(&path, past).unwrap();

        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        let drift = modified
            .duration_since(past)
            .unwrap_or_else(|e| e.duration());
        assert!(drift < Duration::from_secs(2));
    }

    #[test]
    fn test_cleanup_temp_files_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("2024").join("01");
        fs::create_dir_all(&nested).unwrap();

        fs::write(temp_dir.path().join("main-index.tmp"), "temp").unwrap();
        fs::write(nested.join("audit-2024-01-01.tmp"), "temp").unwrap();
        fs::write(nested.join("audit-2024-01-01.json"), "[]").unwrap();

        let cleaned = cleanup_temp_files(temp_dir.path()).unwrap();
        assert_eq!(cleaned, 2);
        assert!(nested.join("audit-2024-01-01.json").exists());
    }
}
