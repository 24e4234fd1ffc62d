//! Audit Log - Maintenance CLI
//!
//! Inspects and maintains a log tree written by the library. Query results
//! and stats go to stdout as JSON; diagnostics go to stderr.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use audit_log::audit_store::StorageInfo;
use audit_log::utils::{days_before, parse_instant};
use audit_log::{AuditLog, AuditLogConfig, AuditQuery, DateRange, EntryStatus};

#[derive(Parser)]
#[command(name = "audit-log", version, about = "Audit log storage maintenance")]
struct Cli {
    /// Log root (defaults to AUDIT_LOG_DIR, then ./logs)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search persisted entries, newest first
    Query {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        entity: Option<String>,
        /// SUCCESS, FAILURE, WARNING or INFO
        #[arg(long)]
        status: Option<String>,
        /// RFC 3339 instant or YYYY-MM-DD
        #[arg(long)]
        from: Option<String>,
        /// RFC 3339 instant or YYYY-MM-DD (inclusive)
        #[arg(long)]
        to: Option<String>,
        /// Case-insensitive text anywhere in the entry
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Grouped counts over a time window
    Stats {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Rebuild indexes/main-index.json from the live partitions
    RebuildIndex,
    /// Move live files older than N days into archives/
    Archive {
        #[arg(long)]
        older_than_days: u32,
    },
    /// Archive after R days, delete archives after 2R days
    Cleanup {
        /// Defaults to AUDIT_LOG_RETENTION_DAYS, then 90
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// List archive files, oldest first
    Archives,
    /// Show storage usage
    Info,
}

fn parse_range(from: Option<&str>, to: Option<&str>) -> anyhow::Result<DateRange> {
    let from = from
        .map(|s| parse_instant(s, false).ok_or_else(|| anyhow!("invalid --from: {}", s)))
        .transpose()?;
    let to = to
        .map(|s| parse_instant(s, true).ok_or_else(|| anyhow!("invalid --to: {}", s)))
        .transpose()?;
    Ok(DateRange { from, to })
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AuditLogConfig::from_env();
    if let Some(dir) = cli.dir {
        config.log_dir = dir;
    }
    let retention_days = config.retention_days;

    let log = AuditLog::open(config)
        .await
        .context("failed to open audit log")?;

    match cli.command {
        Command::Query {
            user,
            module,
            action,
            entity,
            status,
            from,
            to,
            search,
            offset,
            limit,
        } => {
            let status = status
                .map(|s| EntryStatus::parse(&s).ok_or_else(|| anyhow!("invalid --status: {}", s)))
                .transpose()?;
            let query = AuditQuery {
                user_id: user,
                module,
                action_type: action,
                entity_id: entity,
                status,
                range: parse_range(from.as_deref(), to.as_deref())?,
                search,
                offset,
                limit,
            };
            print_json(&log.query(&query).await?)?;
        }

        Command::Stats { from, to } => {
            let range = parse_range(from.as_deref(), to.as_deref())?;
            print_json(&log.stats(range).await?)?;
        }

        Command::RebuildIndex => {
            let index = log.rebuild_indexes().await?;
            println!("Indexed {} partitions", index.partition_count());
        }

        Command::Archive { older_than_days } => {
            let cutoff = days_before(chrono::Utc::now(), older_than_days);
            let report = log.archive(cutoff).await?;
            println!("Archived {} files ({} failed)", report.archived.len(), report.failed);
        }

        Command::Cleanup {
            retention_days: days,
        } => {
            let report = log.cleanup(days.unwrap_or(retention_days)).await?;
            println!(
                "Archived {} files, deleted {} archives ({} failures)",
                report.archive.archived.len(),
                report.deleted.len(),
                report.archive.failed + report.delete_failed
            );
        }

        Command::Archives => {
            for archive in log.list_archives().await? {
                println!(
                    "{}  {:>10}  {}",
                    archive.modified.format("%Y-%m-%d %H:%M:%S"),
                    StorageInfo::format_size(archive.size),
                    archive.path.display()
                );
            }
        }

        Command::Info => {
            println!("{}", log.storage_info().await?);
        }
    }

    log.shutdown().await?;
    Ok(())
}
