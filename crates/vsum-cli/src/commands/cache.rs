//! `vsum cache`

use anyhow::Result;
use clap::Subcommand;
use serde_json::json;
use std::process::ExitCode;
use std::time::Duration;
use vsum_pipeline::{
    clean_downloads, download_stats, CacheManager, DownloadCleanup, DownloadStats, EvictionSummary, PipelineConfig,
};

use super::format_bytes;

const SECONDS_PER_DAY: u64 = 24 * 3600;

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache and download usage
    Status {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every cached frame set
    Clean {
        /// Also delete downloaded videos not used recently
        #[arg(long)]
        downloads: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove frame sets older than the retention period
    CleanOld {
        /// Retention in days (default: CACHE_MAX_AGE_DAYS)
        #[arg(long)]
        days: Option<u64>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: CacheAction, config: &PipelineConfig) -> Result<ExitCode> {
    match action {
        CacheAction::Status { json } => {
            // Read-only: runs in other processes may be using the cache
            let cache = CacheManager::inspect(config.cache_dir(), config.max_cache_bytes, config.cache_stale_after())
                .await?;
            let downloads = download_stats(config.downloads_dir()).await?;
            status(&cache, &downloads, json)?;
        }
        CacheAction::Clean { downloads, json } => {
            let cache = open(config).await?;
            let summary = cache.evict_all().await?;
            let cleanup = if downloads {
                Some(clean_downloads(config.downloads_dir(), config.cache_stale_after()).await?)
            } else {
                None
            };
            report_eviction(&cache, &summary, cleanup.as_ref(), json)?;
        }
        CacheAction::CleanOld { days, json } => {
            let cache = open(config).await?;
            let retention = days.map(retention_days).unwrap_or(config.cache_max_age);
            let summary = cache.evict_older_than(retention).await?;
            report_eviction(&cache, &summary, None, json)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn open(config: &PipelineConfig) -> Result<CacheManager> {
    Ok(CacheManager::open_with(config.cache_dir(), config.max_cache_bytes, config.cache_stale_after()).await?)
}

fn retention_days(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY))
}

fn status(cache: &CacheManager, downloads: &DownloadStats, as_json: bool) -> Result<()> {
    let stats = cache.stats();
    let entries = cache.entries();

    if as_json {
        let entries: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "key": e.key.dir_name(),
                    "source_name": e.source_name,
                    "plan": e.plan,
                    "frames": e.frame_count(),
                    "size_bytes": e.size_bytes,
                    "created_at": e.created_at,
                    "last_accessed_at": e.last_accessed_at,
                })
            })
            .collect();
        return super::print_json(&json!({ "stats": stats, "entries": entries, "downloads": downloads }));
    }

    println!("Cache: {}", stats.root.display());
    let percent = if stats.max_bytes > 0 {
        stats.total_bytes as f64 * 100.0 / stats.max_bytes as f64
    } else {
        0.0
    };
    println!(
        "  {} entries, {} of {} ({:.1}%)",
        stats.entry_count,
        format_bytes(stats.total_bytes),
        format_bytes(stats.max_bytes),
        percent
    );
    if stats.reserved_bytes > 0 || stats.pinned_entries > 0 {
        println!(
            "  {} reserved by running extractions, {} entries in use",
            format_bytes(stats.reserved_bytes),
            stats.pinned_entries
        );
    }
    for entry in &entries {
        println!(
            "  {:<40} {:>5} frames {:>10}  last used {}",
            entry.source_name,
            entry.frame_count(),
            format_bytes(entry.size_bytes),
            entry.last_accessed_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!(
        "Downloads: {}\n  {} files, {}",
        downloads.dir.display(),
        downloads.file_count,
        format_bytes(downloads.total_bytes)
    );
    Ok(())
}

fn report_eviction(
    cache: &CacheManager,
    summary: &EvictionSummary,
    downloads: Option<&DownloadCleanup>,
    as_json: bool,
) -> Result<()> {
    let stats = cache.stats();
    if as_json {
        return super::print_json(&json!({ "evicted": summary, "stats": stats, "downloads": downloads }));
    }
    println!(
        "Removed {} entries, freed {}",
        summary.removed,
        format_bytes(summary.freed_bytes)
    );
    if summary.skipped > 0 {
        println!("Skipped {} entries in use", summary.skipped);
    }
    println!(
        "Cache now {} entries, {}",
        stats.entry_count,
        format_bytes(stats.total_bytes)
    );
    if let Some(cleanup) = downloads {
        println!(
            "Removed {} downloads, freed {}",
            cleanup.removed,
            format_bytes(cleanup.freed_bytes)
        );
        if cleanup.skipped > 0 {
            println!("Kept {} recently used downloads", cleanup.skipped);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_days_saturates() {
        assert_eq!(retention_days(2), Duration::from_secs(2 * 86400));
        assert_eq!(retention_days(u64::MAX), Duration::from_secs(u64::MAX));
    }
}
