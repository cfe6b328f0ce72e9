//! Corpus statistics and health overview.
//!
//! Quick summary of what's stored: chunk counts, embedding coverage, and
//! per-category breakdowns. Used by `medkb stats` to give confidence that
//! ingestions are landing as expected.

use crate::config::Config;
use crate::config_store::ConfigStore;
use crate::db;
use crate::error::Result;
use crate::store::KnowledgeStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let store = KnowledgeStore::new(pool.clone());
    let configs = ConfigStore::new(pool.clone());

    let stats = store.statistics().await?;
    let config_rows = configs.list().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("medkb — Knowledge Base Stats");
    println!("============================");
    println!();
    println!("  Database:   {}", config.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!();
    println!("  Chunks:     {}", stats.total_chunks);
    println!("  Active:     {}", stats.active_chunks);
    println!("  Inactive:   {}", stats.inactive_chunks);
    println!(
        "  Embedded:   {} / {} ({}%)",
        stats.embedded_chunks,
        stats.active_chunks,
        if stats.active_chunks > 0 {
            (stats.embedded_chunks * 100) / stats.active_chunks
        } else {
            0
        }
    );

    if !stats.by_category.is_empty() {
        println!();
        println!("  By category:");
        println!("  {:<24} {:>8}", "CATEGORY", "CHUNKS");
        println!("  {}", "-".repeat(34));
        for (category, count) in &stats.by_category {
            println!("  {:<24} {:>8}", category, count);
        }
    }

    if !config_rows.is_empty() {
        println!();
        println!("  Embedding configs:");
        for cfg in &config_rows {
            let flags = match (cfg.is_active, cfg.is_default) {
                (true, true) => "active, default",
                (true, false) => "active",
                (false, _) => "inactive",
            };
            println!(
                "  {:<24} {} ({}) [{}] {}",
                cfg.name,
                cfg.model_id,
                cfg.provider.as_str(),
                flags,
                cfg.test_status.as_str()
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
