//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! transfer and Telegram retry constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Base URL of a self-hosted Bot API server
    pub telegram_api_url: Option<String>,

    /// Comma-separated list of allowed user IDs (empty means everyone)
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,

    /// Wasabi access key
    pub wasabi_access_key: Option<String>,
    /// Wasabi secret key
    pub wasabi_secret_key: Option<String>,
    /// Wasabi bucket name
    pub wasabi_bucket: Option<String>,
    /// Wasabi region, used to derive the endpoint
    #[serde(default = "default_wasabi_region")]
    pub wasabi_region: String,
    /// Explicit endpoint URL, overrides the region-derived one
    pub wasabi_endpoint_url: Option<String>,

    /// Directory for transient staging files
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Lifetime of generated pre-signed links, in seconds
    #[serde(default = "default_link_ttl_secs")]
    pub link_ttl_secs: u64,

    /// Largest attachment accepted for upload, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Relay requests allowed per user per minute (0 disables the limit)
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
}

fn default_wasabi_region() -> String {
    "us-east-1".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

const fn default_link_ttl_secs() -> u64 {
    DEFAULT_LINK_TTL_SECS
}

const fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

const fn default_rate_limit_per_minute() -> u32 {
    DEFAULT_RATE_LIMIT_PER_MINUTE
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wasabi_relay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // `APP__LINK_TTL_SECS=3600` sets `link_ttl_secs`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables; empty values count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks values the store would only reject later, per request
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` if `link_ttl_secs` is 0 or longer than
    /// the 7-day ceiling of S3 pre-signed URLs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link_ttl_secs == 0 || self.link_ttl_secs > MAX_LINK_TTL_SECS {
            return Err(ConfigError::Message(format!(
                "LINK_TTL_SECS must be between 1 and {MAX_LINK_TTL_SECS}, got {}",
                self.link_ttl_secs
            )));
        }
        Ok(())
    }

    /// Returns a set of Telegram IDs that are allowed to use the bot
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        self.allowed_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Endpoint of the object store: the explicit override, or the
    /// Wasabi endpoint of the configured region.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        self.wasabi_endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.wasabisys.com", self.wasabi_region))
    }

    /// Lifetime of pre-signed links
    #[must_use]
    pub const fn link_ttl(&self) -> Duration {
        Duration::from_secs(self.link_ttl_secs)
    }
}

/// Default pre-signed link lifetime: 24 hours.
pub const DEFAULT_LINK_TTL_SECS: u64 = 86_400;
/// Longest lifetime S3 accepts for a pre-signed URL: 7 days.
pub const MAX_LINK_TTL_SECS: u64 = 604_800;
/// Default upload size cap (the limit of a self-hosted Bot API server).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2000 * 1024 * 1024;
/// Default number of relay requests per user per minute.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 30;
/// Length of a rate-limit window.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Files at or above this size are sent with a multipart upload.
pub const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;
/// Part size for multipart uploads.
pub const MULTIPART_PART_SIZE: u64 = 16 * 1024 * 1024;
/// Parts uploaded concurrently within one multipart upload.
pub const MULTIPART_CONCURRENCY: usize = 4;
/// S3 limit on the number of parts in one multipart upload.
pub const MULTIPART_MAX_PARTS: u64 = 10_000;

/// Minimum gap between two edits of a transfer status message.
pub const PROGRESS_EDIT_INTERVAL_MS: u64 = 2000;

/// Number of files shown by `/list` before the "...and N more" line.
pub const LIST_PREVIEW_LIMIT: usize = 15;
/// Longest accepted file name, in characters.
pub const MAX_FILE_NAME_LEN: usize = 200;

// Telegram API retry configuration
/// Maximum retry attempts for Telegram API calls
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

/// Cooldown period (seconds) between "Access Denied" messages for same user.
/// Default: 20 minutes.
pub const UNAUTHORIZED_COOLDOWN_SECS: u64 = 1200;
/// Time-to-live (seconds) for cache entries.
/// Default: 2 hours.
pub const UNAUTHORIZED_CACHE_TTL_SECS: u64 = 7200;
/// Maximum cache capacity (number of entries).
pub const UNAUTHORIZED_CACHE_MAX_SIZE: u64 = 10_000;

/// Get unauthorized cooldown from env or default.
///
/// Environment variable: `UNAUTHORIZED_COOLDOWN_SECS`.
#[must_use]
pub fn get_unauthorized_cooldown() -> u64 {
    env_u64("UNAUTHORIZED_COOLDOWN_SECS", UNAUTHORIZED_COOLDOWN_SECS)
}

/// Get unauthorized cache TTL from env or default.
///
/// Environment variable: `UNAUTHORIZED_CACHE_TTL_SECS`.
#[must_use]
pub fn get_unauthorized_cache_ttl() -> u64 {
    env_u64("UNAUTHORIZED_CACHE_TTL_SECS", UNAUTHORIZED_CACHE_TTL_SECS)
}

/// Get unauthorized cache max size from env or default.
///
/// Environment variable: `UNAUTHORIZED_CACHE_MAX_SIZE`.
#[must_use]
pub fn get_unauthorized_cache_max_size() -> u64 {
    env_u64("UNAUTHORIZED_CACHE_MAX_SIZE", UNAUTHORIZED_CACHE_MAX_SIZE)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
