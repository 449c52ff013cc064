mod common;

use common::{count, listing_id_for_key, post, Harness};
use estate_feed::catalog;
use estate_feed::error::SyncError;
use estate_feed::extract::run_extraction;
use estate_feed::models::REASON_SOURCE_DELETED;

#[tokio::test]
async fn test_reingestion_is_idempotent() {
    let h = Harness::new().await;
    let mut cover = post(20, "ЖК Sunrise\n2+1, 85 м²\nЦена: $120,000", 2);
    cover.grouped_id = Some(20);
    let mut second = post(21, "", 2);
    second.text = None;
    second.grouped_id = Some(20);
    h.channel.push_photo(cover, b"cover-bytes".to_vec());
    h.channel.push_photo(second, b"second-bytes".to_vec());
    h.channel.push(post(30, "Студия у моря, $45,000", 1));

    let first = h.engine.run_backfill().await.unwrap();
    assert_eq!(first.processed, 3);
    assert_eq!(first.listings_touched.len(), 2);
    assert_eq!(first.media_stored, 2);

    let again = h.engine.run_backfill().await.unwrap();
    assert_eq!(again.processed, 3);

    assert_eq!(count(h.pool(), "listings").await, 2);
    assert_eq!(count(h.pool(), "channel_messages").await, 3);
    assert_eq!(count(h.pool(), "media").await, 2);
    assert_eq!(count(h.pool(), "listing_images").await, 2);

    // The captioned album member stays representative
    let id = listing_id_for_key(h.pool(), 20).await;
    let listing = catalog::get_listing(h.pool(), &id).await.unwrap().unwrap();
    assert_eq!(listing.message_id, 20);
    assert!(listing.description_raw.unwrap().contains("ЖК Sunrise"));
    assert_eq!(listing.images.len(), 2);
    assert_eq!(listing.images[0].position, 20);
    assert!(listing.images[0].url.starts_with("http://cdn.test/media/listing-images/"));
}

#[tokio::test]
async fn test_tombstone_blocks_recreation() {
    let h = Harness::new().await;
    h.channel.push(post(5, "2+1, $90,000", 1));
    h.engine.run_backfill().await.unwrap();

    let id = listing_id_for_key(h.pool(), 5).await;
    let listing = catalog::get_listing_ref(h.pool(), &id).await.unwrap().unwrap();
    catalog::insert_tombstone(h.pool(), &listing, Some("manual"), Some("test"))
        .await
        .unwrap();
    catalog::delete_listing(h.pool(), &id).await.unwrap();

    let report = h.engine.run_backfill().await.unwrap();
    assert_eq!(report.skipped_excluded, 1);
    assert_eq!(report.processed, 0);
    assert_eq!(count(h.pool(), "listings").await, 0);
}

#[tokio::test]
async fn test_backfill_stops_at_cutoff_and_keeps_highest_watermark() {
    let h = Harness::new().await;
    for id in 1..=3 {
        h.channel.push(post(id, "старое объявление $50,000", 200));
    }
    for id in 4..=6 {
        h.channel.push(post(id, "новое объявление $60,000", 1));
    }

    let report = h.engine.run_backfill().await.unwrap();
    assert_eq!(report.messages_seen, 3);
    assert_eq!(report.watermark_before, None);
    assert_eq!(report.watermark_after, Some(6));
    assert_eq!(count(h.pool(), "listings").await, 3);

    let source = &catalog::list_sources(h.pool()).await.unwrap()[0];
    catalog::advance_watermark(h.pool(), &source.id, 50)
        .await
        .unwrap();
    let report = h.engine.run_backfill().await.unwrap();
    assert_eq!(report.watermark_after, Some(50));
}

#[tokio::test]
async fn test_incremental_reports_touched_listings() {
    let h = Harness::new().await;
    h.channel.push(post(1, "2+1, $80,000", 3));
    h.engine.run_backfill().await.unwrap();

    h.channel.push(post(2, "1+1, $55,000", 0));
    h.channel.push(post(3, "3+1, $150,000", 0));
    let report = h.engine.run_incremental().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.watermark_before, Some(1));
    assert_eq!(report.watermark_after, Some(3));

    let mut expected = vec![
        listing_id_for_key(h.pool(), 2).await,
        listing_id_for_key(h.pool(), 3).await,
    ];
    expected.sort();
    assert_eq!(report.touched_ids(), expected);

    let idle = h.engine.run_incremental().await.unwrap();
    assert_eq!(idle.processed, 0);
    assert!(idle.listings_touched.is_empty());
    assert_eq!(idle.watermark_after, Some(3));
}

#[tokio::test]
async fn test_interrupted_iteration_keeps_progress() {
    let h = Harness::new().await;
    for id in 1..=5 {
        h.channel.push(post(id, "квартира $70,000", 0));
    }
    h.channel.fail_iteration_after(Some(2));

    let report = h.engine.run_incremental().await.unwrap();
    assert!(report.interrupted.is_some());
    assert_eq!(report.processed, 2);
    assert_eq!(report.watermark_after, Some(2));

    h.channel.fail_iteration_after(None);
    let report = h.engine.run_incremental().await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.watermark_after, Some(5));

    assert_eq!(h.channel.connect_count(), 2);
    assert_eq!(h.channel.disconnect_count(), 2);
}

async fn seed_listings(h: &Harness, n: i64) {
    for id in 1..=n {
        h.channel.push(post(id, &format!("объявление {} $100,000", id), 1));
    }
    h.engine.run_backfill().await.unwrap();
    assert_eq!(count(h.pool(), "listings").await, n);
}

#[tokio::test]
async fn test_deletion_guard_aborts_mass_deletion() {
    let h = Harness::new().await;
    seed_listings(&h, 25).await;
    for id in 1..=20 {
        h.channel.remove(id);
    }

    let err = h.engine.run_deleted_check().await.unwrap_err();
    match err {
        SyncError::DeletionGuardTripped { missing, total } => {
            assert_eq!(missing, 20);
            assert_eq!(total, 25);
        }
        other => panic!("expected guard trip, got {other}"),
    }
    assert_eq!(count(h.pool(), "listings").await, 25);
    assert_eq!(count(h.pool(), "excluded_listings").await, 0);

    // The session is closed even when the run fails
    assert_eq!(h.channel.connect_count(), h.channel.disconnect_count());
}

#[tokio::test]
async fn test_lookup_blackout_trips_guard() {
    let h = Harness::new().await;
    seed_listings(&h, 25).await;
    h.channel.set_lookup_blackout(true);

    let err = h.engine.run_deleted_check().await.unwrap_err();
    assert!(matches!(err, SyncError::DeletionGuardTripped { missing: 25, .. }));
    assert_eq!(count(h.pool(), "listings").await, 25);
}

#[tokio::test]
async fn test_deleted_check_removes_and_tombstones() {
    let h = Harness::new().await;
    seed_listings(&h, 25).await;
    for id in 1..=10 {
        h.channel.remove(id);
    }

    let report = h.engine.run_deleted_check().await.unwrap();
    assert_eq!(report.checked, 25);
    assert_eq!(report.missing, 10);
    assert_eq!(report.deleted, 10);
    assert_eq!(count(h.pool(), "listings").await, 15);

    let reasons: Vec<String> = sqlx::query_scalar("SELECT reason FROM excluded_listings")
        .fetch_all(h.pool())
        .await
        .unwrap();
    assert_eq!(reasons.len(), 10);
    assert!(reasons.iter().all(|r| r == REASON_SOURCE_DELETED));

    // Removed keys stay gone on the next backfill
    let report = h.engine.run_backfill().await.unwrap();
    assert_eq!(report.skipped_excluded, 0);
    assert_eq!(count(h.pool(), "listings").await, 15);
}

#[tokio::test]
async fn test_deleted_listing_media_is_cleaned_up() {
    let h = Harness::new().await;
    h.channel
        .push_photo(post(7, "1+1, $65,000", 1), b"jpeg".to_vec());
    h.channel.push(post(8, "2+1, $85,000", 1));
    h.engine.run_backfill().await.unwrap();

    let source = &catalog::list_sources(h.pool()).await.unwrap()[0];
    let file = h.media_root().join(&source.id).join("7").join("0.jpg");
    assert!(file.exists());
    assert_eq!(count(h.pool(), "media").await, 1);

    h.channel.remove(7);
    let report = h.engine.run_deleted_check().await.unwrap();
    assert_eq!(report.deleted, 1);

    assert!(!file.exists());
    assert_eq!(count(h.pool(), "media").await, 0);
    assert_eq!(count(h.pool(), "listing_images").await, 0);
    assert_eq!(count(h.pool(), "listings").await, 1);
}

#[tokio::test]
async fn test_empty_photo_download_is_skipped() {
    let h = Harness::new().await;
    h.channel.push_photo(post(9, "студия $40,000", 1), Vec::new());

    let report = h.engine.run_backfill().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.media_stored, 0);
    assert_eq!(count(h.pool(), "media").await, 0);
}

#[tokio::test]
async fn test_extraction_fills_and_respects_existing_fields() {
    let h = Harness::new().await;
    h.channel.push(post(
        11,
        "Продается квартира\nЦена: $120,000\n85 м²\n2+1\n5/9 этаж",
        1,
    ));
    h.engine.run_backfill().await.unwrap();
    let id = listing_id_for_key(h.pool(), 11).await;
    let extraction = &h.engine.config().extraction;

    let report = run_extraction(h.pool(), extraction, None).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.updated, 1);

    let listing = catalog::get_listing(h.pool(), &id).await.unwrap().unwrap();
    assert_eq!(listing.property_type.as_deref(), Some("apartment"));
    assert_eq!(listing.price_value, Some(120_000.0));
    assert_eq!(listing.price_currency.as_deref(), Some("USD"));
    assert_eq!(listing.price_usd, Some(120_000.0));
    assert_eq!(listing.area_m2, Some(85.0));
    assert_eq!(listing.rooms_text.as_deref(), Some("2+1"));
    assert_eq!(listing.floor, Some(5));
    assert_eq!(listing.total_floors, Some(9));

    // Operator corrections survive a re-run; a blanked description is refilled
    sqlx::query("UPDATE listings SET area_m2 = 60, description_raw = NULL WHERE id = ?")
        .bind(&id)
        .execute(h.pool())
        .await
        .unwrap();
    let scope = vec![id.clone()];
    let report = run_extraction(h.pool(), extraction, Some(&scope)).await.unwrap();
    assert_eq!(report.descriptions_filled, 1);

    let listing = catalog::get_listing(h.pool(), &id).await.unwrap().unwrap();
    assert_eq!(listing.area_m2, Some(60.0));
    assert!(listing.description_raw.unwrap().contains("Цена"));
}

#[tokio::test]
async fn test_storage_removal_failure_still_deletes_listings() {
    let h = Harness::new().await;
    h.channel
        .push_photo(post(1, "1+1, $60,000", 1), b"one".to_vec());
    h.channel
        .push_photo(post(2, "2+1, $80,000", 1), b"two".to_vec());
    h.channel.push(post(3, "3+1, $120,000", 1));
    h.engine.run_backfill().await.unwrap();
    assert_eq!(count(h.pool(), "media").await, 2);

    let source = &catalog::list_sources(h.pool()).await.unwrap()[0];
    let file = h.media_root().join(&source.id).join("1").join("0.jpg");

    h.channel.remove(1);
    h.channel.remove(2);
    h.store.fail_remove(true);
    let report = h.engine.run_deleted_check().await.unwrap();
    assert_eq!(report.missing, 2);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 0);

    // Objects stay behind, rows are gone either way
    assert!(file.exists());
    assert_eq!(count(h.pool(), "excluded_listings").await, 2);
    assert_eq!(count(h.pool(), "listings").await, 1);
    assert_eq!(count(h.pool(), "media").await, 0);
    assert_eq!(count(h.pool(), "listing_images").await, 0);
}

#[tokio::test]
async fn test_upload_failure_keeps_the_message() {
    let h = Harness::new().await;
    h.store.fail_put(true);
    h.channel
        .push_photo(post(4, "студия $45,000", 1), b"jpeg".to_vec());

    let report = h.engine.run_backfill().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.media_stored, 0);
    assert_eq!(count(h.pool(), "channel_messages").await, 1);
    assert_eq!(count(h.pool(), "listings").await, 1);
    assert_eq!(count(h.pool(), "media").await, 0);
}

#[tokio::test]
async fn test_failed_message_does_not_stop_the_run() {
    let h = Harness::new().await;
    for id in 1..=3 {
        h.channel.push(post(id, "квартира $70,000", 0));
    }
    sqlx::query(
        "CREATE TRIGGER reject_second BEFORE INSERT ON channel_messages \
         WHEN NEW.message_id = 2 BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(h.pool())
    .await
    .unwrap();

    let report = h.engine.run_incremental().await.unwrap();
    assert_eq!(report.messages_seen, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert!(report.interrupted.is_none());
    assert_eq!(count(h.pool(), "listings").await, 2);
    assert_eq!(count(h.pool(), "channel_messages").await, 2);
}

#[tokio::test]
async fn test_photo_rows_are_written_together() {
    let h = Harness::new().await;
    h.channel
        .push_photo(post(6, "1+1, $55,000", 1), b"jpeg".to_vec());
    h.engine.run_backfill().await.unwrap();
    assert_eq!(count(h.pool(), "media").await, 1);

    let message_row_id: String = sqlx::query_scalar("SELECT id FROM channel_messages")
        .fetch_one(h.pool())
        .await
        .unwrap();
    // A link to an unknown listing fails, and the new media row goes with it
    let result = catalog::record_listing_photo(
        h.pool(),
        &message_row_id,
        "no-such-listing",
        "listing-images",
        "x/6/1.jpg",
        "http://cdn.test/media/listing-images/x/6/1.jpg",
        1,
        6,
    )
    .await;
    assert!(result.is_err());
    assert_eq!(count(h.pool(), "media").await, 1);
    assert_eq!(count(h.pool(), "listing_images").await, 1);
}
