/// `ngpack cache` command implementation
///
/// Inspects and maintains the disk content cache.
use anyhow::Result;

use ngpack::cache::{ContentCache, EvictionConfig};

use crate::cli::{CacheArgs, CacheCommands};
use crate::cli_utils::{format_bytes, ngpack_prefix};

pub async fn run(args: CacheArgs) -> Result<()> {
    let config = super::load_config(&args.common)?;

    let Some(cache_dir) = config.cache_dir() else {
        anyhow::bail!("The disk cache is disabled (cache.enabled = false or NGPACK_CACHE=0)");
    };
    let cache = ContentCache::on_disk(cache_dir);

    match args.command {
        CacheCommands::Stats => stats(&cache),
        CacheCommands::Gc => gc(&cache, &config.eviction_config()?),
        CacheCommands::Clear => clear(&cache),
    }
}

/// Show cache statistics
fn stats(cache: &ContentCache) -> Result<()> {
    let stats = cache.stats()?;

    println!("Content Cache Statistics");
    println!();
    println!("Location: {}", stats.cache_dir.display());
    println!("Total entries: {}", stats.total_entries);
    println!("Total size: {}", format_bytes(stats.total_bytes));

    if stats.total_entries > 0 {
        println!(
            "Average size per entry: {}",
            format_bytes(stats.total_bytes / stats.total_entries)
        );
    }

    Ok(())
}

/// Run one eviction pass
fn gc(cache: &ContentCache, config: &EvictionConfig) -> Result<()> {
    let report = cache.evict(config)?;

    println!(
        "{} Evicted {} entries ({}) using {} policy",
        ngpack_prefix(),
        report.evicted.len(),
        format_bytes(report.bytes_evicted),
        config.policy.as_str()
    );
    println!(
        "{} Cache size: {} -> {} (limit {})",
        ngpack_prefix(),
        format_bytes(report.bytes_before),
        format_bytes(report.bytes_before - report.bytes_evicted),
        format_bytes(config.max_size_bytes)
    );

    Ok(())
}

/// Remove every entry
fn clear(cache: &ContentCache) -> Result<()> {
    let removed = cache.clear()?;
    println!(
        "{} Removed {} entries from {}",
        ngpack_prefix(),
        removed,
        cache.location().display()
    );
    Ok(())
}
