//! Catalog data access.
//!
//! Every write is keyed by a natural key and expressed as an
//! `INSERT ... ON CONFLICT DO UPDATE`, so re-running ingestion over the same
//! messages converges on the same rows instead of appending duplicates.
//! All functions return `sqlx::Error` so callers can wrap them in their own
//! error types.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::channel::{ChannelMessage, ChannelRef};
use crate::models::{Listing, ListingImage, ListingRef, MediaRecord, Source};

const LISTING_COLUMNS: &str = "id, source_id, listing_key, message_id, title, description_raw, \
     permalink, posted_at, price_value, price_currency, price_usd, area_m2, floor, total_floors, \
     rooms_text, rooms_bedrooms, rooms_living, condition_norm, property_type, address_text, \
     street, district, building_name, lat, lng";

/// A typed value for a dynamic column update. `None` writes SQL `NULL`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(Option<String>),
    Real(Option<f64>),
    Int(Option<i64>),
}

fn source_from_row(row: &SqliteRow) -> Source {
    Source {
        id: row.get("id"),
        peer_id: row.get("peer_id"),
        title: row.get("title"),
        username: row.get("username"),
        last_message_id: row.get("last_message_id"),
    }
}

fn listing_ref_from_row(row: &SqliteRow) -> ListingRef {
    ListingRef {
        id: row.get("id"),
        source_id: row.get("source_id"),
        listing_key: row.get("listing_key"),
        message_id: row.get("message_id"),
        permalink: row.get("permalink"),
    }
}

fn listing_from_row(row: &SqliteRow) -> Listing {
    Listing {
        id: row.get("id"),
        source_id: row.get("source_id"),
        listing_key: row.get("listing_key"),
        message_id: row.get("message_id"),
        title: row.get("title"),
        description_raw: row.get("description_raw"),
        permalink: row.get("permalink"),
        posted_at: row.get("posted_at"),
        price_value: row.get("price_value"),
        price_currency: row.get("price_currency"),
        price_usd: row.get("price_usd"),
        area_m2: row.get("area_m2"),
        floor: row.get("floor"),
        total_floors: row.get("total_floors"),
        rooms_text: row.get("rooms_text"),
        rooms_bedrooms: row.get("rooms_bedrooms"),
        rooms_living: row.get("rooms_living"),
        condition_norm: row.get("condition_norm"),
        property_type: row.get("property_type"),
        address_text: row.get("address_text"),
        street: row.get("street"),
        district: row.get("district"),
        building_name: row.get("building_name"),
        lat: row.get("lat"),
        lng: row.get("lng"),
        images: Vec::new(),
    }
}

// ============ Sources ============

/// Create or refresh the source row for a resolved channel.
pub async fn upsert_source(pool: &SqlitePool, channel: &ChannelRef) -> Result<Source, sqlx::Error> {
    let now = Utc::now().timestamp();
    let row = sqlx::query(
        r#"
        INSERT INTO sources (id, kind, peer_id, title, username, created_at, updated_at)
        VALUES (?, 'telegram_channel', ?, ?, ?, ?, ?)
        ON CONFLICT(peer_id) DO UPDATE SET
            title = excluded.title,
            username = excluded.username,
            updated_at = excluded.updated_at
        RETURNING id, peer_id, title, username, last_message_id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(channel.peer_id)
    .bind(&channel.title)
    .bind(&channel.username)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(source_from_row(&row))
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<Source>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, peer_id, title, username, last_message_id FROM sources ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(source_from_row).collect())
}

/// Raise the watermark to `observed` unless it is already higher.
/// Returns the stored value afterwards.
pub async fn advance_watermark(
    pool: &SqlitePool,
    source_id: &str,
    observed: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        UPDATE sources
        SET last_message_id = MAX(COALESCE(last_message_id, 0), ?), updated_at = ?
        WHERE id = ?
        RETURNING last_message_id
        "#,
    )
    .bind(observed)
    .bind(Utc::now().timestamp())
    .bind(source_id)
    .fetch_one(pool)
    .await
}

// ============ Messages & listings ============

pub async fn is_excluded(
    pool: &SqlitePool,
    source_id: &str,
    listing_key: i64,
) -> Result<bool, sqlx::Error> {
    let hit: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM excluded_listings WHERE source_id = ? AND listing_key = ?",
    )
    .bind(source_id)
    .bind(listing_key)
    .fetch_optional(pool)
    .await?;
    Ok(hit.is_some())
}

/// Upsert a raw channel message. Returns the message row id.
pub async fn upsert_message(
    pool: &SqlitePool,
    source: &Source,
    message: &ChannelMessage,
) -> Result<String, sqlx::Error> {
    let text = message.text_trimmed().and(message.text.clone());
    let media_count: i64 = if message.has_media() { 1 } else { 0 };

    sqlx::query_scalar(
        r#"
        INSERT INTO channel_messages (id, source_id, message_id, grouped_id, posted_at, text_raw, permalink, has_media, media_count)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id, message_id) DO UPDATE SET
            grouped_id = excluded.grouped_id,
            posted_at = excluded.posted_at,
            text_raw = excluded.text_raw,
            permalink = excluded.permalink,
            has_media = excluded.has_media,
            media_count = excluded.media_count
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&source.id)
    .bind(message.id)
    .bind(message.grouped_id)
    .bind(message.date)
    .bind(text)
    .bind(source.permalink(message.id))
    .bind(message.has_media())
    .bind(media_count)
    .fetch_one(pool)
    .await
}

/// Upsert the listing a message belongs to. Returns the listing id.
///
/// Album members without a caption never blank out a description that a
/// sibling message already provided; the captioned message stays the
/// representative one.
pub async fn upsert_listing(
    pool: &SqlitePool,
    source: &Source,
    message: &ChannelMessage,
) -> Result<String, sqlx::Error> {
    let now = Utc::now().timestamp();
    let text = message.text_trimmed().and(message.text.clone());

    sqlx::query_scalar(
        r#"
        INSERT INTO listings (id, source_id, listing_key, message_id, title, description_raw, permalink, posted_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, NULL, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id, listing_key) DO UPDATE SET
            message_id = CASE WHEN excluded.description_raw IS NOT NULL OR listings.description_raw IS NULL
                THEN excluded.message_id ELSE listings.message_id END,
            permalink = CASE WHEN excluded.description_raw IS NOT NULL OR listings.description_raw IS NULL
                THEN excluded.permalink ELSE listings.permalink END,
            posted_at = CASE WHEN excluded.description_raw IS NOT NULL OR listings.description_raw IS NULL
                THEN excluded.posted_at ELSE listings.posted_at END,
            description_raw = COALESCE(excluded.description_raw, listings.description_raw),
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&source.id)
    .bind(message.listing_key())
    .bind(message.id)
    .bind(text)
    .bind(source.permalink(message.id))
    .bind(message.date)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub async fn listing_refs(pool: &SqlitePool, source_id: &str) -> Result<Vec<ListingRef>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, source_id, listing_key, message_id, permalink FROM listings WHERE source_id = ? ORDER BY message_id",
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(listing_ref_from_row).collect())
}

pub async fn get_listing_ref(pool: &SqlitePool, id: &str) -> Result<Option<ListingRef>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, source_id, listing_key, message_id, permalink FROM listings WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(listing_ref_from_row))
}

/// Full listing with its images ordered by position.
pub async fn get_listing(pool: &SqlitePool, id: &str) -> Result<Option<Listing>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {} FROM listings WHERE id = ?", LISTING_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut listing = listing_from_row(&row);

    let images = sqlx::query(
        "SELECT media_id, url, position FROM listing_images WHERE listing_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    listing.images = images
        .iter()
        .map(|r| ListingImage {
            media_id: r.get("media_id"),
            url: r.get("url"),
            position: r.get("position"),
        })
        .collect();

    Ok(Some(listing))
}

/// One page of listings in stable order, for batch processing.
pub async fn listing_page(
    pool: &SqlitePool,
    offset: usize,
    limit: usize,
) -> Result<Vec<Listing>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM listings ORDER BY created_at, id LIMIT ? OFFSET ?",
        LISTING_COLUMNS
    ))
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(listing_from_row).collect())
}

pub async fn listings_by_ids(pool: &SqlitePool, ids: &[String]) -> Result<Vec<Listing>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM listings WHERE id IN (",
        LISTING_COLUMNS
    ));
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    qb.push(") ORDER BY created_at, id");

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows.iter().map(listing_from_row).collect())
}

/// Write a set of columns on one listing. Returns `false` when no row matched.
pub async fn update_listing_columns(
    pool: &SqlitePool,
    id: &str,
    columns: &[(&'static str, ColumnValue)],
) -> Result<bool, sqlx::Error> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE listings SET updated_at = ");
    qb.push_bind(Utc::now().timestamp());
    for (column, value) in columns {
        qb.push(", ").push(*column).push(" = ");
        match value {
            ColumnValue::Text(v) => qb.push_bind(v.clone()),
            ColumnValue::Real(v) => qb.push_bind(*v),
            ColumnValue::Int(v) => qb.push_bind(*v),
        };
    }
    qb.push(" WHERE id = ").push_bind(id.to_string());

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_listing(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM listings WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============ Tombstones ============

/// Record that a listing key must never be re-created.
pub async fn insert_tombstone(
    pool: &SqlitePool,
    listing: &ListingRef,
    reason: Option<&str>,
    deleted_by: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO excluded_listings (id, source_id, listing_key, message_id, permalink, reason, deleted_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id, listing_key) DO UPDATE SET
            message_id = excluded.message_id,
            permalink = excluded.permalink,
            reason = excluded.reason,
            deleted_by = excluded.deleted_by
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&listing.source_id)
    .bind(listing.listing_key)
    .bind(listing.message_id)
    .bind(&listing.permalink)
    .bind(reason)
    .bind(deleted_by)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

// ============ Media ============

/// Record a stored photo and link it to a listing in one transaction, so a
/// media row never exists without its listing image. Returns the media id.
#[allow(clippy::too_many_arguments)]
pub async fn record_listing_photo(
    pool: &SqlitePool,
    message_row_id: &str,
    listing_id: &str,
    bucket: &str,
    path: &str,
    public_url: &str,
    media_position: i64,
    image_position: i64,
) -> Result<String, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let media_id: String = sqlx::query_scalar(
        r#"
        INSERT INTO media (id, message_row_id, media_type, storage_bucket, storage_path, public_url, position)
        VALUES (?, ?, 'photo', ?, ?, ?, ?)
        ON CONFLICT(message_row_id, position) DO UPDATE SET
            storage_bucket = excluded.storage_bucket,
            storage_path = excluded.storage_path,
            public_url = excluded.public_url
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(message_row_id)
    .bind(bucket)
    .bind(path)
    .bind(public_url)
    .bind(media_position)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO listing_images (listing_id, media_id, url, position)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(listing_id, position) DO UPDATE SET
            media_id = excluded.media_id,
            url = excluded.url
        "#,
    )
    .bind(listing_id)
    .bind(&media_id)
    .bind(public_url)
    .bind(image_position)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(media_id)
}

/// Media rows referenced by a listing's images.
pub async fn media_for_listing(
    pool: &SqlitePool,
    listing_id: &str,
) -> Result<Vec<MediaRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT m.id, m.storage_bucket, m.storage_path
        FROM media m
        JOIN listing_images li ON li.media_id = m.id
        WHERE li.listing_id = ?
        ORDER BY li.position
        "#,
    )
    .bind(listing_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| MediaRecord {
            id: r.get("id"),
            storage_bucket: r.get("storage_bucket"),
            storage_path: r.get("storage_path"),
        })
        .collect())
}

/// Delete a listing's image associations and the given media rows.
pub async fn delete_listing_media(
    pool: &SqlitePool,
    listing_id: &str,
    media_ids: &[String],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM listing_images WHERE listing_id = ?")
        .bind(listing_id)
        .execute(&mut *tx)
        .await?;
    for media_id in media_ids {
        sqlx::query("DELETE FROM media WHERE id = ?")
            .bind(media_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

// ============ Extraction support ============

/// Listings whose description is absent or blank: `(id, source_id, listing_key)`.
pub async fn listings_missing_description(
    pool: &SqlitePool,
    scope: Option<&[String]>,
) -> Result<Vec<(String, String, i64)>, sqlx::Error> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, source_id, listing_key FROM listings \
         WHERE (description_raw IS NULL OR TRIM(description_raw) = '')",
    );
    if let Some(ids) = scope {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        qb.push(" AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        qb.push(")");
    }

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|r| (r.get("id"), r.get("source_id"), r.get("listing_key")))
        .collect())
}

/// Longest non-blank text among the messages that share a listing key.
pub async fn longest_message_text(
    pool: &SqlitePool,
    source_id: &str,
    listing_key: i64,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT text_raw FROM channel_messages
        WHERE source_id = ? AND (grouped_id = ? OR message_id = ?)
          AND text_raw IS NOT NULL AND TRIM(text_raw) != ''
        ORDER BY LENGTH(text_raw) DESC, message_id
        LIMIT 1
        "#,
    )
    .bind(source_id)
    .bind(listing_key)
    .bind(listing_key)
    .fetch_optional(pool)
    .await
}
