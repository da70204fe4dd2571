//! Archive statistics.
//!
//! A quick summary of what has been imported: record counts per
//! collection, schema version and file size. Used by `memora stats`.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::migrate;
use crate::models::{Feedback, Message, Thread, UserProfile};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub schema_version: i64,
    pub size_bytes: u64,
    pub threads: i64,
    pub messages: i64,
    pub feedback: i64,
    pub users: i64,
    /// Creation time of the newest thread, if any has one.
    pub newest_thread: Option<String>,
}

pub async fn collect_stats(config: &Config) -> Result<ArchiveStats> {
    let store = Store::open(config).await?;

    let newest_thread: Option<String> = sqlx::query_scalar(
        "SELECT created_at FROM threads WHERE created_at != '' ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_optional(store.pool())
    .await?;

    let stats = ArchiveStats {
        schema_version: migrate::schema_version(store.pool()).await?,
        size_bytes: std::fs::metadata(&config.db.path)
            .map(|m| m.len())
            .unwrap_or(0),
        threads: store.count::<Thread>().await?,
        messages: store.count::<Message>().await?,
        feedback: store.count::<Feedback>().await?,
        users: store.count::<UserProfile>().await?,
        newest_thread,
    };
    store.close().await;
    Ok(stats)
}

/// Run the stats command and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let stats = collect_stats(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Memora — Archive Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(stats.size_bytes));
    println!("  Schema:      v{}", stats.schema_version);
    println!();
    println!("  Threads:     {}", stats.threads);
    println!("  Messages:    {}", stats.messages);
    println!("  Feedback:    {}", stats.feedback);
    println!("  Users:       {}", stats.users);
    if let Some(newest) = &stats.newest_thread {
        println!("  Newest:      {}", newest);
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
