use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

use crate::crawler::DEFAULT_BASE_URL;
use crate::observer::ObserverConfig;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 65536 = 64KB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "rankwatch.db")
    pub database_path: String,

    /// Root of the site being crawled
    /// Env: CRAWLER_BASE_URL (default: "https://www.csdm.pro")
    pub crawler_base_url: String,

    /// Timeout of a single page fetch
    /// Env: CRAWLER_TIMEOUT_SECS (default: 30)
    pub crawler_timeout: Duration,

    /// Wait between presence polls
    /// Env: ONLINE_INTERVAL_SECS (default: 60)
    pub online_interval: Duration,

    /// Wait between full leaderboard polls
    /// Env: STATS_INTERVAL_SECS (default: 1200 = 20 minutes)
    pub stats_interval: Duration,

    /// Leaderboard pages scanned per poll
    /// Env: STATS_PAGE_COUNT (default: 20)
    pub stats_page_count: u32,

    /// Deepest rank still checked for renames
    /// Env: TRACKED_RANK_LIMIT (default: 200)
    pub tracked_rank_limit: i64,

    /// Per-subscriber event buffer
    /// Env: EVENT_BUFFER (default: 16)
    pub event_buffer: usize,

    /// Discord API Token
    /// Env: DISCORD_TOKEN (optional, the bot is disabled without it)
    pub discord_token: Option<String>,

    /// Channel receiving every username change
    /// Env: RENAME_CHANNEL_ID (optional)
    pub rename_channel_id: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            port: env_or_default("PORT", defaults.port),
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            crawler_base_url: env_or_default_string("CRAWLER_BASE_URL", DEFAULT_BASE_URL),
            crawler_timeout: Duration::from_secs(env_or_default("CRAWLER_TIMEOUT_SECS", 30)),
            online_interval: Duration::from_secs(env_or_default("ONLINE_INTERVAL_SECS", 60)),
            stats_interval: Duration::from_secs(env_or_default("STATS_INTERVAL_SECS", 20 * 60)),
            stats_page_count: env_or_default("STATS_PAGE_COUNT", defaults.stats_page_count),
            tracked_rank_limit: env_or_default("TRACKED_RANK_LIMIT", defaults.tracked_rank_limit),
            event_buffer: env_or_default("EVENT_BUFFER", defaults.event_buffer),
            discord_token: var("DISCORD_TOKEN").ok().filter(|t| !t.is_empty()),
            rename_channel_id: var("RENAME_CHANNEL_ID")
                .ok()
                .and_then(|id| id.parse().ok()),
        }
    }

    /// Settings of the two polling loops
    pub fn observer(&self) -> ObserverConfig {
        ObserverConfig {
            online_interval: self.online_interval,
            stats_interval: self.stats_interval,
            page_count: self.stats_page_count,
            tracked_rank_limit: self.tracked_rank_limit,
        }
    }
}

impl Default for Config {
    /// Create configuration with all default values
    fn default() -> Self {
        Self {
            request_body_limit: 64 * 1024, // 64 KB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            database_path: "rankwatch.db".to_string(),
            crawler_base_url: DEFAULT_BASE_URL.to_string(),
            crawler_timeout: Duration::from_secs(30),
            online_interval: Duration::from_secs(60),
            stats_interval: Duration::from_secs(20 * 60),
            stats_page_count: 20,
            tracked_rank_limit: 200,
            event_buffer: 16,
            discord_token: None,
            rename_channel_id: None,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.request_body_limit, 64 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_path, "rankwatch.db");
        assert_eq!(config.crawler_base_url, "https://www.csdm.pro");
        assert_eq!(config.online_interval, Duration::from_secs(60));
        assert_eq!(config.stats_interval, Duration::from_secs(1200));
        assert_eq!(config.stats_page_count, 20);
        assert_eq!(config.tracked_rank_limit, 200);
        assert_eq!(config.event_buffer, 16);
        assert!(config.discord_token.is_none());
        assert!(config.rename_channel_id.is_none());
    }

    #[test]
    fn test_observer_config_follows_config() {
        let config = Config {
            stats_page_count: 3,
            tracked_rank_limit: 50,
            ..Config::default()
        };
        let observer = config.observer();
        assert_eq!(observer.page_count, 3);
        assert_eq!(observer.tracked_rank_limit, 50);
        assert_eq!(observer.online_interval, config.online_interval);
    }
}
