#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;

use estate_feed::channel::{ChannelMessage, MemoryChannel};
use estate_feed::config::{self, Config};
use estate_feed::error::StorageError;
use estate_feed::ingest::SyncEngine;
use estate_feed::storage::{FsObjectStore, ObjectStore};
use estate_feed::{db, migrate};

pub const HANDLE: &str = "@tbilisi_flats";
pub const BUCKET: &str = "listing-images";

pub fn test_config(root: &Path) -> Config {
    let text = format!(
        r#"[db]
path = "{root}/data/estate.sqlite"

[channel]
handle = "{handle}"

[storage]
backend = "fs"
bucket = "{bucket}"
root = "{root}/media"
public_base_url = "http://cdn.test/media"

[sync]
backfill_days = 90
check_batch_size = 10
"#,
        root = root.display(),
        handle = HANDLE,
        bucket = BUCKET,
    );
    let cfg: Config = toml::from_str(&text).unwrap();
    config::validate(&cfg).unwrap();
    cfg
}

/// Filesystem store whose uploads and removals can be switched to fail.
pub struct FlakyStore {
    inner: FsObjectStore,
    fail_put: AtomicBool,
    fail_remove: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: FsObjectStore) -> Self {
        Self {
            inner,
            fail_put: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
        }
    }

    pub fn fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    fn refused(path: &str) -> StorageError {
        StorageError::Status {
            status: 503,
            path: path.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    fn default_bucket(&self) -> &str {
        self.inner.default_bucket()
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(Self::refused(path));
        }
        self.inner.put(bucket, path, bytes, content_type).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.inner.public_url(bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Self::refused(bucket));
        }
        self.inner.remove(bucket, paths).await
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub channel: Arc<MemoryChannel>,
    pub store: Arc<FlakyStore>,
    pub engine: SyncEngine,
}

impl Harness {
    pub async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(tmp.path());
        let pool = db::connect(&cfg).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();

        let channel = Arc::new(MemoryChannel::new(HANDLE, 1001));
        let store = Arc::new(FlakyStore::new(FsObjectStore::new(
            tmp.path().join("media"),
            BUCKET,
            "http://cdn.test/media",
        )));
        let engine = SyncEngine::new(pool, channel.clone(), store.clone(), cfg);
        Self {
            tmp,
            channel,
            store,
            engine,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        self.engine.pool()
    }

    pub fn media_root(&self) -> PathBuf {
        self.tmp.path().join("media").join(BUCKET)
    }
}

/// A text post dated `days_ago` days back.
pub fn post(id: i64, text: &str, days_ago: i64) -> ChannelMessage {
    ChannelMessage {
        id,
        grouped_id: None,
        date: Utc::now().timestamp() - days_ago * 86_400 - 60,
        text: Some(text.to_string()),
        media: None,
    }
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn listing_id_for_key(pool: &SqlitePool, key: i64) -> String {
    sqlx::query_scalar("SELECT id FROM listings WHERE listing_key = ?")
        .bind(key)
        .fetch_one(pool)
        .await
        .unwrap()
}
