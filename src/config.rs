//! TOML configuration parsing and validation.
//!
//! Secrets never live in the config file. The channel gateway token, the
//! control-surface API token and S3 credentials are read from environment
//! variables (optionally loaded from a `.env` file by the binary).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the channel gateway bearer token.
pub const CHANNEL_TOKEN_ENV: &str = "ESTATE_CHANNEL_TOKEN";
/// Environment variable holding the control-surface bearer token.
pub const API_TOKEN_ENV: &str = "ESTATE_API_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub channel: ChannelConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Public handle of the tracked channel, with or without a leading `@`.
    pub handle: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8700".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    100
}

impl ChannelConfig {
    /// The handle without the leading `@`.
    pub fn normalized_handle(&self) -> String {
        self.handle.trim().trim_start_matches('@').to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Local directory for the `fs` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Base URL under which stored objects are publicly reachable.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, R2, Supabase).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_storage_backend() -> String {
    "fs".to_string()
}
fn default_bucket() -> String {
    "listing-images".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_backfill_days")]
    pub backfill_days: i64,
    #[serde(default = "default_check_batch_size")]
    pub check_batch_size: usize,
    #[serde(default = "default_guard_ratio")]
    pub guard_max_missing_ratio: f64,
    #[serde(default = "default_guard_min")]
    pub guard_min_listings: usize,
    #[serde(default = "default_true")]
    pub extract_after_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backfill_days: default_backfill_days(),
            check_batch_size: default_check_batch_size(),
            guard_max_missing_ratio: default_guard_ratio(),
            guard_min_listings: default_guard_min(),
            extract_after_sync: true,
        }
    }
}

fn default_backfill_days() -> i64 {
    90
}
fn default_check_batch_size() -> usize {
    100
}
fn default_guard_ratio() -> f64 {
    0.6
}
fn default_guard_min() -> usize {
    20
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_batch")]
    pub batch_size: usize,
    /// Stored prices below this are treated as under-detected and replaced.
    #[serde(default = "default_min_plausible_price")]
    pub min_plausible_price: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_extraction_batch(),
            min_plausible_price: default_min_plausible_price(),
        }
    }
}

fn default_extraction_batch() -> usize {
    500
}
fn default_min_plausible_price() -> f64 {
    1000.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.channel.normalized_handle().is_empty() {
        anyhow::bail!("channel.handle must not be empty");
    }
    if config.channel.page_size == 0 {
        anyhow::bail!("channel.page_size must be > 0");
    }

    // Validate sync
    if config.sync.backfill_days <= 0 {
        anyhow::bail!("sync.backfill_days must be > 0");
    }
    if config.sync.check_batch_size == 0 {
        anyhow::bail!("sync.check_batch_size must be > 0");
    }
    let ratio = config.sync.guard_max_missing_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        anyhow::bail!("sync.guard_max_missing_ratio must be in (0.0, 1.0]");
    }

    if config.extraction.batch_size == 0 {
        anyhow::bail!("extraction.batch_size must be > 0");
    }

    // Validate storage
    match config.storage.backend.as_str() {
        "fs" => {
            if config.storage.root.is_none() {
                anyhow::bail!("storage.root must be set when backend is 'fs'");
            }
        }
        "s3" => {
            if config.storage.region.is_none() {
                anyhow::bail!("storage.region must be set when backend is 's3'");
            }
        }
        other => anyhow::bail!("Unknown storage backend: '{}'. Must be fs or s3.", other),
    }
    if config.storage.bucket.trim().is_empty() {
        anyhow::bail!("storage.bucket must not be empty");
    }

    Ok(())
}

/// Read a required secret from the environment.
pub fn require_env(name: &str) -> Result<String> {
    let value = std::env::var(name).with_context(|| format!("Missing env var {}", name))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("Env var {} is empty", name);
    }
    Ok(value)
}
