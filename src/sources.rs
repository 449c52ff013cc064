use anyhow::Result;

use crate::catalog;
use crate::config::Config;
use crate::db;

/// Print tracked channels and their sync watermarks.
pub async fn list_sources(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let sources = catalog::list_sources(&pool).await?;
    pool.close().await;

    if sources.is_empty() {
        println!(
            "No sources yet. Run `estate sync backfill` to track @{}.",
            config.channel.normalized_handle()
        );
        return Ok(());
    }

    println!("{:<24} {:<16} {:<14} WATERMARK", "USERNAME", "PEER", "TITLE");
    for source in &sources {
        let title: String = source
            .title
            .as_deref()
            .unwrap_or("-")
            .chars()
            .take(14)
            .collect();
        println!(
            "{:<24} {:<16} {:<14} {}",
            source.username.as_deref().unwrap_or("-"),
            source.peer_id,
            title,
            source
                .last_message_id
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    Ok(())
}
