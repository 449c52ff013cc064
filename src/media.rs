//! Media pipeline.
//!
//! Media is best-effort relative to message text: every failure in here is
//! logged and swallowed so it never aborts the surrounding sync loop.

use std::collections::BTreeMap;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::catalog;
use crate::channel::{ChannelClient, ChannelMessage, ChannelRef};
use crate::models::Source;
use crate::storage::ObjectStore;

/// Attachments per message. Only the first is stored today.
const MEDIA_ORDINAL: i64 = 0;

/// Object path for a message attachment.
pub fn media_path(source_id: &str, message_id: i64, ordinal: i64) -> String {
    format!("{}/{}/{}.jpg", source_id, message_id, ordinal)
}

/// Download, store and link the photo of `message` to `listing_id`.
///
/// Returns `true` when an object was stored and recorded.
#[allow(clippy::too_many_arguments)]
pub async fn process_media(
    pool: &SqlitePool,
    channel: &dyn ChannelClient,
    store: &dyn ObjectStore,
    chan: &ChannelRef,
    source: &Source,
    message: &ChannelMessage,
    message_row_id: &str,
    listing_id: &str,
) -> bool {
    if !message.has_photo() {
        return false;
    }

    let bytes = match channel.download_media(chan, message).await {
        Ok(b) => b,
        Err(e) => {
            warn!(message_id = message.id, error = %e, "media download failed");
            return false;
        }
    };
    if bytes.is_empty() {
        warn!(message_id = message.id, "media download returned no bytes");
        return false;
    }

    let bucket = store.default_bucket().to_string();
    let path = media_path(&source.id, message.id, MEDIA_ORDINAL);
    if let Err(e) = store.put(&bucket, &path, &bytes, "image/jpeg").await {
        warn!(message_id = message.id, path = %path, error = %e, "media upload failed");
        return false;
    }
    let url = store.public_url(&bucket, &path);

    // Position is the message id so album photos keep channel order.
    let recorded = catalog::record_listing_photo(
        pool,
        message_row_id,
        listing_id,
        &bucket,
        &path,
        &url,
        MEDIA_ORDINAL,
        message.id,
    )
    .await;
    if let Err(e) = recorded {
        warn!(message_id = message.id, listing_id, error = %e, "failed to record listing photo");
        return false;
    }

    debug!(message_id = message.id, path = %path, size = bytes.len(), "stored media");
    true
}

/// Remove a listing's stored objects, then its image and media rows.
///
/// Storage failures are logged and row cleanup still proceeds. Returns the
/// number of media rows removed.
pub async fn cleanup_media(
    pool: &SqlitePool,
    store: &dyn ObjectStore,
    listing_id: &str,
) -> Result<usize, sqlx::Error> {
    let media = catalog::media_for_listing(pool, listing_id).await?;
    if media.is_empty() {
        catalog::delete_listing_media(pool, listing_id, &[]).await?;
        return Ok(0);
    }

    let mut by_bucket: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for record in &media {
        if record.storage_bucket.is_empty() || record.storage_path.is_empty() {
            continue;
        }
        by_bucket
            .entry(record.storage_bucket.as_str())
            .or_default()
            .push(record.storage_path.clone());
    }

    for (bucket, paths) in &by_bucket {
        if let Err(e) = store.remove(bucket, paths).await {
            warn!(listing_id, bucket, count = paths.len(), error = %e, "storage removal failed");
        }
    }

    let ids: Vec<String> = media.iter().map(|m| m.id.clone()).collect();
    catalog::delete_listing_media(pool, listing_id, &ids).await?;
    Ok(ids.len())
}
