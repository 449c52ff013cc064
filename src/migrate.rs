use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all catalog tables and indexes on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Tracked channels; last_message_id is the incremental-sync watermark
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL DEFAULT 'telegram_channel',
            peer_id INTEGER NOT NULL UNIQUE,
            title TEXT,
            username TEXT,
            last_message_id INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channel_messages (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            message_id INTEGER NOT NULL,
            grouped_id INTEGER,
            posted_at INTEGER NOT NULL,
            text_raw TEXT,
            permalink TEXT,
            has_media INTEGER NOT NULL DEFAULT 0,
            media_count INTEGER NOT NULL DEFAULT 0,
            UNIQUE(source_id, message_id),
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            listing_key INTEGER NOT NULL,
            message_id INTEGER NOT NULL,
            title TEXT,
            description_raw TEXT,
            permalink TEXT,
            posted_at INTEGER NOT NULL,
            price_value REAL,
            price_currency TEXT,
            price_usd REAL,
            area_m2 REAL,
            floor INTEGER,
            total_floors INTEGER,
            rooms_text TEXT,
            rooms_bedrooms INTEGER,
            rooms_living INTEGER,
            condition_norm TEXT,
            property_type TEXT,
            address_text TEXT,
            street TEXT,
            district TEXT,
            building_name TEXT,
            lat REAL,
            lng REAL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(source_id, listing_key),
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Tombstones: keys that ingestion must never re-create
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS excluded_listings (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            listing_key INTEGER NOT NULL,
            message_id INTEGER,
            permalink TEXT,
            reason TEXT,
            deleted_by TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(source_id, listing_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media (
            id TEXT PRIMARY KEY,
            message_row_id TEXT NOT NULL,
            media_type TEXT NOT NULL,
            storage_bucket TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            public_url TEXT NOT NULL,
            position INTEGER NOT NULL,
            UNIQUE(message_row_id, position),
            FOREIGN KEY (message_row_id) REFERENCES channel_messages(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listing_images (
            listing_id TEXT NOT NULL,
            media_id TEXT NOT NULL,
            url TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (listing_id, position),
            FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE,
            FOREIGN KEY (media_id) REFERENCES media(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_grouped ON channel_messages(source_id, grouped_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_source ON listings(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listing_images_media ON listing_images(media_id)")
        .execute(pool)
        .await?;

    Ok(())
}
