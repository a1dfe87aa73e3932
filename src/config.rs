//! Configuration types for news-relay

use crate::error::{Error, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Main configuration for [`NewsRelay`](crate::NewsRelay)
///
/// Every section has sensible defaults, so a configuration file only needs the
/// settings that differ (usually just `gateway.bot_token`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Content source (news API) settings
    #[serde(default)]
    pub content_source: ContentSourceConfig,

    /// Messaging gateway (bot API) settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Cycle cadence
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Dispatcher tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Check settings that have no usable default
    pub fn validate(&self) -> Result<()> {
        if self.gateway.bot_token.trim().is_empty() {
            return Err(Error::config(
                "gateway.bot_token",
                "bot token must not be empty",
            ));
        }
        if self.content_source.page_limit == 0 {
            return Err(Error::config(
                "content_source.page_limit",
                "page limit must be at least 1",
            ));
        }
        if self.dispatch.max_concurrent_recipients == 0 {
            return Err(Error::config(
                "dispatch.max_concurrent_recipients",
                "at least one recipient must be processed at a time",
            ));
        }
        if self.schedule.content_interval.is_zero() {
            return Err(Error::config(
                "schedule.content_interval",
                "content interval must be positive",
            ));
        }
        Ok(())
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./news-relay.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Content source configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentSourceConfig {
    /// API base URL (default: "https://api.spaceflightnewsapi.net")
    #[serde(default = "default_content_base_url")]
    pub base_url: String,

    /// Items requested per page; further pages are followed (default: 50)
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_content_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Instant-view template hash; when set, article links open through the
    /// messaging platform's instant view
    #[serde(default)]
    pub instant_view_hash: Option<String>,
}

impl Default for ContentSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_content_base_url(),
            page_limit: default_page_limit(),
            timeout: default_content_timeout(),
            user_agent: default_user_agent(),
            instant_view_hash: None,
        }
    }
}

/// Messaging gateway configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bot API base URL (default: "https://api.telegram.org")
    #[serde(default = "default_gateway_api_base")]
    pub api_base: String,

    /// Bot token (required)
    #[serde(default)]
    pub bot_token: String,

    /// Timeout for a single send (default: 15 seconds)
    #[serde(default = "default_gateway_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: default_gateway_api_base(),
            bot_token: String::new(),
            timeout: default_gateway_timeout(),
        }
    }
}

/// Cycle cadence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval between content cycles, aligned to the UTC epoch (default: 1 hour)
    #[serde(default = "default_content_interval", with = "duration_serde")]
    pub content_interval: Duration,

    /// UTC time of day at which the digest is sent (default: 08:00:05)
    #[serde(default = "default_digest_time")]
    pub digest_time: NaiveTime,

    /// Whether the daily digest runs at all (default: true)
    #[serde(default = "default_true")]
    pub digest_enabled: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            content_interval: default_content_interval(),
            digest_time: default_digest_time(),
            digest_enabled: true,
        }
    }
}

/// Dispatcher tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Recipients served concurrently; a single recipient is always served sequentially (default: 8)
    #[serde(default = "default_max_concurrent_recipients")]
    pub max_concurrent_recipients: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_recipients: default_max_concurrent_recipients(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./news-relay.db")
}

fn default_content_base_url() -> String {
    "https://api.spaceflightnewsapi.net".to_string()
}

fn default_page_limit() -> u32 {
    50
}

fn default_content_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("news-relay/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_gateway_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_gateway_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_content_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_digest_time() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 5).unwrap_or(NaiveTime::MIN)
}

fn default_max_concurrent_recipients() -> usize {
    8
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.gateway.bot_token = "123:abc".to_string();
        config
    }

    #[test]
    fn defaults_match_hourly_and_daily_cadence() {
        let config = Config::default();
        assert_eq!(config.schedule.content_interval, Duration::from_secs(3600));
        assert_eq!(
            config.schedule.digest_time,
            NaiveTime::from_hms_opt(8, 0, 5).unwrap()
        );
        assert!(config.schedule.digest_enabled);
        assert_eq!(config.content_source.page_limit, 50);
        assert_eq!(config.dispatch.max_concurrent_recipients, 8);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "gateway": { "bot_token": "123:abc", "timeout": 5 },
            "schedule": { "digest_time": "07:30:00" }
        }"#;

        let config: Config = serde_json::from_str(json).expect("deserialize failed");

        assert_eq!(config.gateway.bot_token, "123:abc");
        assert_eq!(config.gateway.timeout, Duration::from_secs(5));
        assert_eq!(config.gateway.api_base, "https://api.telegram.org");
        assert_eq!(
            config.schedule.digest_time,
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
        assert_eq!(config.schedule.content_interval, Duration::from_secs(3600));
        assert_eq!(
            config.persistence.database_path,
            PathBuf::from("./news-relay.db")
        );
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = valid_config();
        let json = serde_json::to_value(&config).expect("serialize failed");
        assert_eq!(json["content_source"]["timeout"], 30);
        assert_eq!(json["schedule"]["content_interval"], 3600);
    }

    #[test]
    fn validate_rejects_missing_token() {
        let err = Config::default().validate().unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("gateway.bot_token")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_concurrency_and_interval() {
        let mut config = valid_config();
        config.dispatch.max_concurrent_recipients = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.schedule.content_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.content_source.page_limit = 0;
        assert!(config.validate().is_err());

        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn from_json_file_reads_and_reports_missing_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"gateway": {{"bot_token": "t"}}}}"#).unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.gateway.bot_token, "t");

        let missing = Config::from_json_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(Error::Config { .. })));
    }
}
