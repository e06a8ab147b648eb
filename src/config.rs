//! Configuration management for roundnote-bot

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Complete bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub payments: PaymentConfig,
    #[serde(default)]
    pub limits: LimitConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Telegram specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from BotFather
    #[serde(default = "default_bot_token")]
    pub bot_token: String,
    /// Operator allowed to run /broadcast
    #[serde(default)]
    pub admin_user_id: i64,
}

/// Payment provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Crypto Pay API token
    #[serde(default = "default_cryptopay_token")]
    pub cryptopay_token: String,
    /// Crypto Pay API base URL
    #[serde(default = "default_cryptopay_base_url")]
    pub cryptopay_base_url: String,
    /// Seconds between paid-invoice polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Asset charged on the crypto rail
    #[serde(default = "default_price_asset")]
    pub price_asset: String,
    /// Amount charged on the crypto rail (decimal string, provider format)
    #[serde(default = "default_price_amount")]
    pub price_amount: String,
    /// Amount charged on the in-platform Stars rail
    #[serde(default = "default_price_stars")]
    pub price_stars: u32,
    /// Days granted per settled invoice
    #[serde(default = "default_premium_days")]
    pub premium_days: i64,
}

/// Usage limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Free conversions per calendar day for non-premium users
    #[serde(default = "default_daily_free_quota")]
    pub daily_free_quota: i64,
    /// Maximum clip duration accepted, in seconds
    #[serde(default = "default_max_clip_secs")]
    pub max_clip_secs: u32,
}

/// Media pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Directory for per-job scratch artifacts
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Output diameter of the round note (width == height)
    #[serde(default = "default_note_length")]
    pub note_length: u32,
    /// Hard ceiling on one transcoder invocation, in seconds
    #[serde(default = "default_transcode_timeout_secs")]
    pub transcode_timeout_secs: u64,
}

/// Broadcast pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Recipients per batch before the pacing pause
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pacing pause after every batch, in milliseconds
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Progress report to the operator every N recipients
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let bot_token = std::env::var("ROUNDNOTE_BOT_TOKEN")
            .context("ROUNDNOTE_BOT_TOKEN not set")?;

        let admin_user_id = std::env::var("ROUNDNOTE_ADMIN_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let mut payments = PaymentConfig::default();
        if let Ok(token) = std::env::var("CRYPTOPAY_TOKEN") {
            payments.cryptopay_token = token;
        }
        if let Ok(base) = std::env::var("CRYPTOPAY_BASE_URL") {
            payments.cryptopay_base_url = base;
        }

        let mut database = DatabaseConfig::default();
        if let Ok(url) = std::env::var("ROUNDNOTE_DB_URL") {
            database.url = url;
        }

        Ok(Config {
            telegram: TelegramConfig {
                bot_token,
                admin_user_id,
            },
            payments,
            limits: LimitConfig::default(),
            media: MediaConfig::default(),
            broadcast: BroadcastConfig::default(),
            database,
        })
    }
}

fn default_bot_token() -> String {
    std::env::var("ROUNDNOTE_BOT_TOKEN").unwrap_or_default()
}

fn default_cryptopay_token() -> String {
    std::env::var("CRYPTOPAY_TOKEN").unwrap_or_default()
}

fn default_cryptopay_base_url() -> String {
    "https://pay.crypt.bot".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_price_asset() -> String {
    "USDT".to_string()
}

fn default_price_amount() -> String {
    "3.00".to_string()
}

fn default_price_stars() -> u32 {
    250
}

fn default_premium_days() -> i64 {
    365
}

fn default_daily_free_quota() -> i64 {
    3
}

fn default_max_clip_secs() -> u32 {
    60
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("roundnote")
}

fn default_note_length() -> u32 {
    400
}

fn default_transcode_timeout_secs() -> u64 {
    120
}

fn default_batch_size() -> usize {
    25
}

fn default_batch_pause_ms() -> u64 {
    1_000
}

fn default_progress_every() -> usize {
    100
}

fn default_database_url() -> String {
    "sqlite://roundnote.db?mode=rwc".to_string()
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            cryptopay_token: default_cryptopay_token(),
            cryptopay_base_url: default_cryptopay_base_url(),
            poll_interval_secs: default_poll_interval_secs(),
            price_asset: default_price_asset(),
            price_amount: default_price_amount(),
            price_stars: default_price_stars(),
            premium_days: default_premium_days(),
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            daily_free_quota: default_daily_free_quota(),
            max_clip_secs: default_max_clip_secs(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            note_length: default_note_length(),
            transcode_timeout_secs: default_transcode_timeout_secs(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            progress_every: default_progress_every(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}
