use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub pandascore: PandascoreConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from an optional TOML file layered under `FRAGCAST_*`
    /// environment variables (e.g. `FRAGCAST_DATABASE__URL`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match path {
            Some(p) => builder.add_source(File::from(p)),
            None => builder.add_source(File::with_name("fragcast").required(false)),
        };
        let config = builder
            .add_source(Environment::with_prefix("FRAGCAST").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct PandascoreConfig {
    /// API bearer token
    pub token: String,
    #[serde(default = "default_pandascore_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Page size for category fetches
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_pandascore_base_url() -> String {
    "https://api.pandascore.co".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Bot token for the REST API
    pub bot_token: String,
    #[serde(default = "default_discord_api_base")]
    pub api_base: String,
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

/// Temporal cache sizing and maintenance knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Rolling coverage window in hours
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    /// Minimum historical coverage before backfill stops
    #[serde(default = "default_window_hours")]
    pub min_coverage_hours: i64,
    /// Hard ceiling on backfill pages per coverage pass
    #[serde(default = "default_max_backfill_pages")]
    pub max_backfill_pages: u32,
    /// Page size for backfill fetches
    #[serde(default = "default_page_size")]
    pub backfill_page_size: u32,
    /// Per-partition cap for the in-memory read cache
    #[serde(default = "default_read_cache_limit")]
    pub read_cache_limit: i64,
    /// Timeout for latency-sensitive store reads
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_window_hours() -> i64 {
    42
}

fn default_max_backfill_pages() -> u32 {
    10
}

fn default_read_cache_limit() -> i64 {
    20
}

fn default_query_timeout_secs() -> u64 {
    3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            min_coverage_hours: default_window_hours(),
            max_backfill_pages: default_max_backfill_pages(),
            backfill_page_size: default_page_size(),
            read_cache_limit: default_read_cache_limit(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

/// Periodic cycle intervals and detection thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Coarse refresh cycle interval (seconds)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Fast detection cycle interval (seconds)
    #[serde(default = "default_detection_interval_secs")]
    pub detection_interval_secs: u64,
    /// Dispatch cycle interval (seconds)
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
    /// Age after which an unconfirmed running match becomes a suspect
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: i64,
    /// Finished pages fetched when confirming suspects
    #[serde(default = "default_confirm_pages")]
    pub confirm_pages: u32,
    /// Page size used by the fast cycle's upcoming fetch
    #[serde(default = "default_fast_page_size")]
    pub fast_page_size: u32,
}

fn default_refresh_interval_secs() -> u64 {
    180
}

fn default_detection_interval_secs() -> u64 {
    60
}

fn default_dispatch_interval_secs() -> u64 {
    30
}

fn default_staleness_secs() -> i64 {
    90
}

fn default_confirm_pages() -> u32 {
    3
}

fn default_fast_page_size() -> u32 {
    25
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            detection_interval_secs: default_detection_interval_secs(),
            dispatch_interval_secs: default_dispatch_interval_secs(),
            staleness_secs: default_staleness_secs(),
            confirm_pages: default_confirm_pages(),
            fast_page_size: default_fast_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_defaults_match_policy() {
        let cache = CacheConfig::default();
        assert_eq!(cache.window_hours, 42);
        assert_eq!(cache.min_coverage_hours, 42);
        assert_eq!(cache.max_backfill_pages, 10);
        assert_eq!(cache.query_timeout_secs, 3);
    }

    #[test]
    fn scheduler_defaults_keep_fast_cycle_shorter() {
        let scheduler = SchedulerConfig::default();
        assert!(scheduler.detection_interval_secs < scheduler.refresh_interval_secs);
        assert!(scheduler.staleness_secs > 60);
    }
}
