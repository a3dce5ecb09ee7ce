//! Configuration module for feedsync.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{FeedsyncError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedsync.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; stdout only when unset.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Periodic synchronization configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Whether the periodic scheduler runs.
    #[serde(default = "default_sync_enabled")]
    pub enabled: bool,
    /// Seconds between two scheduler ticks.
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
    /// Retries after the initial attempt before a feed is disabled.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay before each retry, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Maximum number of feed pipelines running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_sync_enabled() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    3600 // hourly
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    60
}

fn default_max_concurrency() -> usize {
    8
}

impl SyncConfig {
    /// Tick interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_sync_enabled(),
            interval_secs: default_sync_interval(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// HTTP fetch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Accept loopback, private and link-local hosts.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_user_agent() -> String {
    concat!("feedsync/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            user_agent: default_user_agent(),
            allow_private_hosts: false,
        }
    }
}

/// Outgoing mail configuration for failure notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// Deliver queued notifications by SMTP.
    #[serde(default)]
    pub enabled: bool,
    /// SMTP relay host.
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Upgrade the connection with STARTTLS.
    #[serde(default = "default_starttls")]
    pub starttls: bool,
    /// SMTP user; no authentication when unset.
    #[serde(default)]
    pub username: Option<String>,
    /// SMTP password.
    #[serde(default)]
    pub password: Option<String>,
    /// Sender address.
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// Sender display name.
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Seconds between two outbox delivery passes.
    #[serde(default = "default_delivery_interval")]
    pub delivery_interval_secs: u64,
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

fn default_from_address() -> String {
    "feedsync@localhost".to_string()
}

fn default_from_name() -> String {
    "feedsync".to_string()
}

fn default_delivery_interval() -> u64 {
    60
}

impl MailConfig {
    /// Delivery interval as a [`Duration`].
    pub fn delivery_interval(&self) -> Duration {
        Duration::from_secs(self.delivery_interval_secs)
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            starttls: default_starttls(),
            username: None,
            password: None,
            from_address: default_from_address(),
            from_name: default_from_name(),
            delivery_interval_secs: default_delivery_interval(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Periodic sync configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// HTTP fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Notification mail configuration.
    #[serde(default)]
    pub mail: MailConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedsyncError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedsyncError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDSYNC_DATABASE_PATH`: database file path
    /// - `FEEDSYNC_MAX_RETRIES`: retries before a feed is disabled
    /// - `FEEDSYNC_RETRY_DELAY_SECS`: delay before each retry
    /// - `FEEDSYNC_SMTP_PASSWORD`: SMTP password
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(path) = env_value("FEEDSYNC_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(raw) = env_value("FEEDSYNC_MAX_RETRIES") {
            self.sync.max_retries = raw.parse().map_err(|_| {
                FeedsyncError::Config(format!("FEEDSYNC_MAX_RETRIES is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = env_value("FEEDSYNC_RETRY_DELAY_SECS") {
            self.sync.retry_delay_secs = raw.parse().map_err(|_| {
                FeedsyncError::Config(format!("FEEDSYNC_RETRY_DELAY_SECS is not a number: {raw}"))
            })?;
        }
        if let Some(password) = env_value("FEEDSYNC_SMTP_PASSWORD") {
            self.mail.password = Some(password);
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_secs == 0 {
            return Err(FeedsyncError::Config(
                "sync.interval_secs must be > 0".to_string(),
            ));
        }
        if self.sync.max_concurrency == 0 {
            return Err(FeedsyncError::Config(
                "sync.max_concurrency must be > 0".to_string(),
            ));
        }
        if self.fetch.total_timeout_secs == 0 {
            return Err(FeedsyncError::Config(
                "fetch.total_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.database.path.trim().is_empty() {
            return Err(FeedsyncError::Config(
                "database.path must be non-empty".to_string(),
            ));
        }
        if self.mail.enabled {
            if self.mail.smtp_host.trim().is_empty() {
                return Err(FeedsyncError::Config(
                    "mail.smtp_host must be non-empty".to_string(),
                ));
            }
            if self.mail.delivery_interval_secs == 0 {
                return Err(FeedsyncError::Config(
                    "mail.delivery_interval_secs must be > 0".to_string(),
                ));
            }
            if !self.mail.from_address.contains('@') {
                return Err(FeedsyncError::Config(format!(
                    "mail.from_address is not an address: {}",
                    self.mail.from_address
                )));
            }
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.database.path, "data/feedsync.db");

        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());

        assert!(config.sync.enabled);
        assert_eq!(config.sync.interval_secs, 3600);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.retry_delay_secs, 60);
        assert_eq!(config.sync.max_concurrency, 8);

        assert_eq!(config.fetch.connect_timeout_secs, 10);
        assert_eq!(config.fetch.read_timeout_secs, 20);
        assert_eq!(config.fetch.total_timeout_secs, 30);
        assert_eq!(config.fetch.max_redirects, 5);
        assert_eq!(config.fetch.max_feed_size_bytes, 5 * 1024 * 1024);
        assert!(config.fetch.user_agent.starts_with("feedsync/"));
        assert!(!config.fetch.allow_private_hosts);

        assert!(!config.mail.enabled);
        assert_eq!(config.mail.smtp_port, 587);
        assert!(config.mail.starttls);
        assert!(config.mail.username.is_none());
        assert_eq!(config.mail.delivery_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[database]
path = "custom/feeds.sqlite"

[logging]
level = "debug"
file = "logs/feedsync.log"

[sync]
enabled = false
interval_secs = 900
max_retries = 5
retry_delay_secs = 30
max_concurrency = 2

[fetch]
connect_timeout_secs = 3
read_timeout_secs = 4
total_timeout_secs = 5
max_redirects = 1
max_feed_size_bytes = 1024
user_agent = "test-agent"
allow_private_hosts = true

[mail]
enabled = true
smtp_host = "smtp.example.com"
smtp_port = 465
starttls = false
username = "mailer"
password = "secret"
from_address = "alerts@example.com"
from_name = "Feed alerts"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.database.path, "custom/feeds.sqlite");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file.as_deref(), Some("logs/feedsync.log"));

        assert!(!config.sync.enabled);
        assert_eq!(config.sync.interval(), Duration::from_secs(900));
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.retry_delay(), Duration::from_secs(30));
        assert_eq!(config.sync.max_concurrency, 2);

        assert_eq!(config.fetch.connect_timeout_secs, 3);
        assert_eq!(config.fetch.read_timeout_secs, 4);
        assert_eq!(config.fetch.total_timeout_secs, 5);
        assert_eq!(config.fetch.max_redirects, 1);
        assert_eq!(config.fetch.max_feed_size_bytes, 1024);
        assert_eq!(config.fetch.user_agent, "test-agent");
        assert!(config.fetch.allow_private_hosts);

        assert!(config.mail.enabled);
        assert_eq!(config.mail.smtp_host, "smtp.example.com");
        assert_eq!(config.mail.smtp_port, 465);
        assert!(!config.mail.starttls);
        assert_eq!(config.mail.username.as_deref(), Some("mailer"));
        assert_eq!(config.mail.password.as_deref(), Some("secret"));
        assert_eq!(config.mail.from_address, "alerts@example.com");
        assert_eq!(config.mail.from_name, "Feed alerts");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_mail_sender() {
        let config = Config::parse("[mail]\nenabled = true\nfrom_address = \"nobody\"\n").unwrap();
        assert!(matches!(config.validate(), Err(FeedsyncError::Config(_))));

        // Not checked while mail is off.
        let config = Config::parse("[mail]\nfrom_address = \"nobody\"\n").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[sync]
max_retries = 1
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.sync.max_retries, 1);
        // Defaults
        assert_eq!(config.sync.retry_delay_secs, 60);
        assert_eq!(config.database.path, "data/feedsync.db");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.sync.interval_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");

        assert!(result.is_err());
        if let Err(FeedsyncError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(FeedsyncError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedsync.toml");
        std::fs::write(&path, "[sync]\nmax_concurrency = 3\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync.max_concurrency, 3);
    }

    // Environment variables are process-global, so every override case
    // lives in this single test.
    #[test]
    fn test_apply_env_overrides() {
        let keys = [
            "FEEDSYNC_DATABASE_PATH",
            "FEEDSYNC_MAX_RETRIES",
            "FEEDSYNC_RETRY_DELAY_SECS",
            "FEEDSYNC_SMTP_PASSWORD",
        ];
        let originals: Vec<_> = keys.iter().map(|k| std::env::var(k).ok()).collect();

        std::env::set_var("FEEDSYNC_DATABASE_PATH", "/tmp/env.db");
        std::env::set_var("FEEDSYNC_MAX_RETRIES", "7");
        std::env::set_var("FEEDSYNC_RETRY_DELAY_SECS", "");
        std::env::set_var("FEEDSYNC_SMTP_PASSWORD", "hunter2");

        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.database.path, "/tmp/env.db");
        assert_eq!(config.sync.max_retries, 7);
        // Empty value keeps the default
        assert_eq!(config.sync.retry_delay_secs, 60);
        assert_eq!(config.mail.password.as_deref(), Some("hunter2"));

        std::env::set_var("FEEDSYNC_MAX_RETRIES", "many");
        let mut config = Config::default();
        assert!(matches!(
            config.apply_env_overrides(),
            Err(FeedsyncError::Config(_))
        ));

        for (key, original) in keys.iter().zip(originals) {
            match original {
                Some(val) => std::env::set_var(key, val),
                None => std::env::remove_var(key),
            }
        }
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.sync.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.max_concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));

        let mut config = Config::default();
        config.fetch.total_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
