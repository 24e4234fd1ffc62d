//! Audit store configuration and errors

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Default number of buffered entries that triggers an immediate flush
pub const DEFAULT_BUFFER_THRESHOLD: usize = 100;

/// Default period of the background flush task (5s)
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Default live partition size before rotation (50MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Default retention window in days
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Name of the long-term archive directory under the log root
pub const ARCHIVES_DIR: &str = "archives";

/// Name of the index directory under the log root
pub const INDEXES_DIR: &str = "indexes";

/// Configuration for the AuditLog engine
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    /// Root of the log tree
    pub log_dir: PathBuf,
    /// Buffered entries that trigger an immediate flush
    pub buffer_threshold: usize,
    /// Period of the background flush task
    pub flush_interval: Duration,
    /// Live partition size (bytes) above which the partition rotates
    pub max_file_size: u64,
    /// Retention window used by the CLI when none is given
    pub retention_days: u32,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl AuditLogConfig {
    /// Create config with custom log directory
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Self {
        Self {
            log_dir: log_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Build a config from `AUDIT_LOG_*` environment variables
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("AUDIT_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(n) = env_parse::<usize>("AUDIT_LOG_BUFFER_SIZE") {
            config.buffer_threshold = n;
        }
        if let Some(ms) = env_parse::<u64>("AUDIT_LOG_FLUSH_INTERVAL_MS") {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(bytes) = env_parse::<u64>("AUDIT_LOG_MAX_FILE_SIZE") {
            config.max_file_size = bytes;
        }
        if let Some(days) = env_parse::<u32>("AUDIT_LOG_RETENTION_DAYS") {
            config.retention_days = days;
        }

        config
    }

    pub fn with_buffer_threshold(mut self, threshold: usize) -> Self {
        self.buffer_threshold = threshold;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Check values the engine cannot run with
    pub fn validate(&self) -> AuditLogResult<()> {
        if self.buffer_threshold == 0 {
            return Err(AuditLogError::InvalidConfig(
                "buffer_threshold must be > 0".into(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(AuditLogError::InvalidConfig(
                "flush_interval must be > 0".into(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(AuditLogError::InvalidConfig(
                "max_file_size must be > 0".into(),
            ));
        }
        if self.retention_days == 0 {
            return Err(AuditLogError::InvalidConfig(
                "retention_days must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the log root
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Get path to the archive directory
    pub fn archive_dir(&self) -> PathBuf {
        self.log_dir.join(ARCHIVES_DIR)
    }

    /// Get path to the index directory
    pub fn index_dir(&self) -> PathBuf {
        self.log_dir.join(INDEXES_DIR)
    }

    /// Get path to main-index.json
    pub fn index_path(&self) -> PathBuf {
        self.index_dir().join("main-index.json")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Result type for audit store operations
pub type AuditLogResult<T> = Result<T, AuditLogError>;

/// Errors that can occur in audit store operations
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid partition {0}")]
    InvalidPartition(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for AuditLogError {
    fn from(e: tokio::task::JoinError) -> Self {
        AuditLogError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuditLogConfig::default();
        assert_eq!(config.buffer_threshold, 100);
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.max_file_size, 50 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths() {
        let config = AuditLogConfig::new("/var/audit");
        assert_eq!(config.archive_dir(), PathBuf::from("/var/audit/archives"));
        assert_eq!(
            config.index_path(),
            PathBuf::from("/var/audit/indexes/main-index.json")
        );
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = AuditLogConfig::default().with_buffer_threshold(0);
        assert!(matches!(
            config.validate(),
            Err(AuditLogError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AuditLogError = io_err.into();
        assert!(matches!(err, AuditLogError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
