//! Sync engine.
//!
//! Mirrors a channel into the catalog. Three procedures share one
//! per-message routine ([`SyncEngine::process_message`]):
//!
//! - **backfill** walks history newest first down to a look-back cutoff
//! - **incremental** walks forward from the stored watermark
//! - **deleted check** reconciles stored listings against the channel and
//!   removes the ones whose posts are gone, behind a mass-deletion guard
//!
//! Processing is sequential and at-least-once: every write is an upsert, so
//! a crashed run can simply be repeated.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::catalog;
use crate::channel::{ChannelClient, ChannelMessage, ChannelRef, IterOptions};
use crate::channel_http::HttpChannelClient;
use crate::config::{require_env, Config, CHANNEL_TOKEN_ENV};
use crate::db;
use crate::error::SyncError;
use crate::extract;
use crate::media;
use crate::models::{ListingRef, Source, SyncMode, REASON_SOURCE_DELETED};
use crate::storage::{self, ObjectStore};

/// Running totals of one sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub messages_seen: usize,
    pub processed: usize,
    pub skipped_excluded: usize,
    pub failed: usize,
    /// Distinct listing ids created or updated, in id order.
    pub listings_touched: BTreeSet<String>,
    pub media_stored: usize,
    pub checked: usize,
    pub missing: usize,
    pub deleted: usize,
    pub watermark_before: Option<i64>,
    pub watermark_after: Option<i64>,
    /// Transport error that ended iteration early, if any.
    pub interrupted: Option<String>,
}

impl SyncReport {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            messages_seen: 0,
            processed: 0,
            skipped_excluded: 0,
            failed: 0,
            listings_touched: BTreeSet::new(),
            media_stored: 0,
            checked: 0,
            missing: 0,
            deleted: 0,
            watermark_before: None,
            watermark_after: None,
            interrupted: None,
        }
    }

    pub fn touched_ids(&self) -> Vec<String> {
        self.listings_touched.iter().cloned().collect()
    }
}

/// Outcome of processing a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Stored { listing_id: String, media_stored: bool },
    Excluded,
    NotContent,
    Failed,
}

pub struct SyncEngine {
    pool: SqlitePool,
    channel: Arc<dyn ChannelClient>,
    store: Arc<dyn ObjectStore>,
    config: Config,
}

impl SyncEngine {
    pub fn new(
        pool: SqlitePool,
        channel: Arc<dyn ChannelClient>,
        store: Arc<dyn ObjectStore>,
        config: Config,
    ) -> Self {
        Self {
            pool,
            channel,
            store,
            config,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one procedure by mode.
    pub async fn run(&self, mode: SyncMode) -> Result<SyncReport, SyncError> {
        match mode {
            SyncMode::Backfill => self.run_backfill().await,
            SyncMode::Incremental => self.run_incremental().await,
            SyncMode::CheckDeleted => self.run_deleted_check().await,
        }
    }

    /// Connect, drive `run`, and always disconnect afterwards.
    async fn in_session<F>(&self, run: F) -> Result<SyncReport, SyncError>
    where
        F: Future<Output = Result<SyncReport, SyncError>>,
    {
        if let Err(e) = self.channel.connect().await {
            self.channel.disconnect().await;
            return Err(e.into());
        }
        let result = run.await;
        self.channel.disconnect().await;
        result
    }

    /// Resolve the configured channel and upsert its source row.
    async fn ensure_source(&self) -> Result<(ChannelRef, Source), SyncError> {
        let handle = self.config.channel.normalized_handle();
        let chan = self.channel.resolve_channel(&handle).await?;
        let source = catalog::upsert_source(&self.pool, &chan).await?;
        info!(
            title = chan.title.as_deref().unwrap_or(""),
            username = chan.username.as_deref().unwrap_or(""),
            "resolved channel"
        );
        Ok((chan, source))
    }

    /// Walk history newest first until the look-back cutoff, then raise the
    /// watermark to the highest id seen.
    pub async fn run_backfill(&self) -> Result<SyncReport, SyncError> {
        self.in_session(self.backfill()).await
    }

    async fn backfill(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(SyncMode::Backfill);
        let (chan, source) = self.ensure_source().await?;
        report.watermark_before = source.last_message_id;

        let cutoff = (Utc::now() - Duration::days(self.config.sync.backfill_days)).timestamp();
        info!(cutoff, "starting backfill");

        let mut max_seen: Option<i64> = None;
        let mut cursor = self.channel.iter_messages(&chan, IterOptions::default()).await?;
        loop {
            let message = match cursor.next().await {
                Ok(Some(m)) => m,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "message iteration failed");
                    report.interrupted = Some(e.to_string());
                    break;
                }
            };
            if message.date < cutoff {
                info!(message_id = message.id, "reached backfill cutoff");
                break;
            }

            self.record_outcome(&mut report, &chan, &source, &message).await;
            max_seen = max_seen.max(Some(message.id));
        }

        report.watermark_after = match max_seen {
            Some(id) => catalog::advance_watermark(&self.pool, &source.id, id).await?,
            None => source.last_message_id,
        };
        info!(
            processed = report.processed,
            watermark = ?report.watermark_after,
            "backfill complete"
        );
        Ok(report)
    }

    /// Walk forward from the watermark. The watermark is persisted after each
    /// message, so an interrupted run resumes after the last one handled.
    pub async fn run_incremental(&self) -> Result<SyncReport, SyncError> {
        self.in_session(self.incremental()).await
    }

    async fn incremental(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(SyncMode::Incremental);
        let (chan, source) = self.ensure_source().await?;
        report.watermark_before = source.last_message_id;
        report.watermark_after = source.last_message_id;

        let last_id = source.last_message_id.unwrap_or(0);
        info!(after = last_id, "starting incremental sync");

        let opts = IterOptions {
            min_id: Some(last_id),
            oldest_first: true,
        };
        let mut cursor = self.channel.iter_messages(&chan, opts).await?;
        loop {
            let message = match cursor.next().await {
                Ok(Some(m)) => m,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "message iteration failed");
                    report.interrupted = Some(e.to_string());
                    break;
                }
            };
            if message.id <= last_id {
                continue;
            }

            self.record_outcome(&mut report, &chan, &source, &message).await;
            report.watermark_after =
                catalog::advance_watermark(&self.pool, &source.id, message.id).await?;
        }

        info!(
            processed = report.processed,
            touched = report.listings_touched.len(),
            watermark = ?report.watermark_after,
            "incremental sync complete"
        );
        Ok(report)
    }

    /// Remove listings whose representative post no longer exists.
    ///
    /// Aborts with [`SyncError::DeletionGuardTripped`] before touching
    /// anything when the missing share looks like an access failure rather
    /// than real deletions.
    pub async fn run_deleted_check(&self) -> Result<SyncReport, SyncError> {
        self.in_session(self.deleted_check()).await
    }

    async fn deleted_check(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(SyncMode::CheckDeleted);
        let (chan, source) = self.ensure_source().await?;
        report.watermark_before = source.last_message_id;
        report.watermark_after = source.last_message_id;

        let listings = catalog::listing_refs(&self.pool, &source.id).await?;
        if listings.is_empty() {
            info!("no listings to check");
            return Ok(report);
        }
        info!(count = listings.len(), "checking listings against channel");

        let missing = self.find_missing(&chan, &listings, &mut report).await;
        report.checked = listings.len();
        report.missing = missing.len();

        let sync = &self.config.sync;
        let total = listings.len();
        let ratio = missing.len() as f64 / total as f64;
        if total >= sync.guard_min_listings && ratio > sync.guard_max_missing_ratio {
            error!(
                missing = missing.len(),
                total, "deletion aborted: suspiciously many listings missing"
            );
            return Err(SyncError::DeletionGuardTripped {
                missing: missing.len(),
                total,
            });
        }

        for listing in &missing {
            match self.exclude_and_delete(listing).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(listing_id = %listing.id, error = %e, "failed to remove deleted listing");
                }
            }
        }

        info!(
            missing = report.missing,
            deleted = report.deleted,
            "deleted check complete"
        );
        Ok(report)
    }

    /// Listings whose message id the channel no longer returns. Batches whose
    /// lookup fails contribute nothing.
    async fn find_missing(
        &self,
        chan: &ChannelRef,
        listings: &[ListingRef],
        report: &mut SyncReport,
    ) -> Vec<ListingRef> {
        let mut missing = Vec::new();
        for (index, batch) in listings.chunks(self.config.sync.check_batch_size).enumerate() {
            let ids: Vec<i64> = batch.iter().map(|l| l.message_id).collect();
            let found = match self.channel.fetch_messages_by_ids(chan, &ids).await {
                Ok(messages) => messages,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        offset = index * self.config.sync.check_batch_size,
                        error = %e,
                        "deleted-check batch failed"
                    );
                    continue;
                }
            };
            let existing: HashSet<i64> = found.iter().map(|m| m.id).collect();
            missing.extend(
                batch
                    .iter()
                    .filter(|l| !existing.contains(&l.message_id))
                    .cloned(),
            );
        }
        missing
    }

    /// Tombstone a listing, clean up its media, then delete it.
    async fn exclude_and_delete(&self, listing: &ListingRef) -> Result<(), SyncError> {
        catalog::insert_tombstone(&self.pool, listing, Some(REASON_SOURCE_DELETED), None).await?;
        if let Err(e) = media::cleanup_media(&self.pool, self.store.as_ref(), &listing.id).await {
            warn!(listing_id = %listing.id, error = %e, "media cleanup failed");
        }
        catalog::delete_listing(&self.pool, &listing.id).await?;
        debug!(listing_id = %listing.id, key = listing.listing_key, "removed deleted listing");
        Ok(())
    }

    async fn record_outcome(
        &self,
        report: &mut SyncReport,
        chan: &ChannelRef,
        source: &Source,
        message: &ChannelMessage,
    ) {
        report.messages_seen += 1;
        match self.process_message(chan, source, message).await {
            MessageOutcome::Stored {
                listing_id,
                media_stored,
            } => {
                report.processed += 1;
                report.listings_touched.insert(listing_id);
                if media_stored {
                    report.media_stored += 1;
                }
            }
            MessageOutcome::Excluded => report.skipped_excluded += 1,
            MessageOutcome::NotContent => {}
            MessageOutcome::Failed => report.failed += 1,
        }
    }

    /// Store one message and its listing. Never fails: errors are logged and
    /// reported as [`MessageOutcome::Failed`].
    pub async fn process_message(
        &self,
        chan: &ChannelRef,
        source: &Source,
        message: &ChannelMessage,
    ) -> MessageOutcome {
        if message.id <= 0 {
            return MessageOutcome::NotContent;
        }
        match self.store_message(chan, source, message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(message_id = message.id, error = %e, "failed to process message");
                MessageOutcome::Failed
            }
        }
    }

    async fn store_message(
        &self,
        chan: &ChannelRef,
        source: &Source,
        message: &ChannelMessage,
    ) -> Result<MessageOutcome, sqlx::Error> {
        let key = message.listing_key();
        if catalog::is_excluded(&self.pool, &source.id, key).await? {
            debug!(listing_key = key, "skipping excluded listing");
            return Ok(MessageOutcome::Excluded);
        }

        let message_row_id = catalog::upsert_message(&self.pool, source, message).await?;
        let listing_id = catalog::upsert_listing(&self.pool, source, message).await?;
        let media_stored = media::process_media(
            &self.pool,
            self.channel.as_ref(),
            self.store.as_ref(),
            chan,
            source,
            message,
            &message_row_id,
            &listing_id,
        )
        .await;

        debug!(message_id = message.id, listing_id = %listing_id, "processed message");
        Ok(MessageOutcome::Stored {
            listing_id,
            media_stored,
        })
    }
}

/// Build an engine over the configured database, gateway and object store.
pub async fn engine_from_config(config: &Config) -> anyhow::Result<SyncEngine> {
    let pool = db::connect(config).await?;
    let token = require_env(CHANNEL_TOKEN_ENV)?;
    let channel = HttpChannelClient::new(&config.channel, token)?;
    let store = storage::create_store(&config.storage)?;
    Ok(SyncEngine::new(
        pool,
        Arc::new(channel),
        Arc::from(store),
        config.clone(),
    ))
}

pub fn print_sync_report(report: &SyncReport) {
    println!("sync {}", report.mode);
    println!("  messages seen: {}", report.messages_seen);
    println!("  processed: {}", report.processed);
    println!("  skipped (excluded): {}", report.skipped_excluded);
    println!("  failed: {}", report.failed);
    println!("  listings touched: {}", report.listings_touched.len());
    println!("  media stored: {}", report.media_stored);
    if report.mode == SyncMode::CheckDeleted {
        println!("  checked: {}", report.checked);
        println!("  missing: {}", report.missing);
        println!("  deleted: {}", report.deleted);
    }
    let fmt_mark = |m: Option<i64>| m.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
    println!(
        "  watermark: {} -> {}",
        fmt_mark(report.watermark_before),
        fmt_mark(report.watermark_after)
    );
    if let Some(ref reason) = report.interrupted {
        println!("  interrupted: {}", reason);
    }
}

/// `estate sync <mode>`: one run, optionally followed by extraction.
pub async fn run_sync(config: &Config, mode: SyncMode, extract_after: bool) -> anyhow::Result<()> {
    let engine = engine_from_config(config).await?;
    let report = engine.run(mode).await?;
    print_sync_report(&report);

    if extract_after {
        if let Some(extraction) =
            extract::extract_after_sync(engine.pool(), &config.extraction, &report).await?
        {
            extract::print_extraction_report(&extraction);
        }
    }

    engine.pool().close().await;
    println!("ok");
    Ok(())
}
