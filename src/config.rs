//! Configuration for rivulex.
//!
//! Publishers, subscribers and the trimmer are configured by value; the
//! sections can also be loaded from a TOML file with `${ENV_VAR}`
//! substitution. All timing and sizing knobs have defaults and are clamped
//! to their minimum bounds at construction time, so a subscriber can never
//! start with, say, a zero fetch batch or a sub-second block time.
//!
//! # Example
//!
//! ```toml
//! [redis]
//! url = "${REDIS_URL}"
//!
//! [subscriber]
//! group = "billing"
//! streams = ["users", "orders"]
//! retries = 5
//!
//! [subscriber.trimmer]
//! interval_ms = 3600000
//! retention_ms = 86400000
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Dead-letter stream used when the subscriber does not override it.
pub const DEFAULT_DEAD_LETTER: &str = "dead_letter";

const MIN_ACK_TIMEOUT_MS: u64 = 1_000;
const MIN_PROCESS_TIMEOUT_MS: u64 = 20;
const MIN_BLOCK_TIME_MS: u64 = 1_000;
const MIN_TRIMMER_MS: u64 = 10_000;

/// Configuration errors. These are the only fatal errors in the crate: a
/// component that fails validation refuses to construct.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Root configuration file structure.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RivulexConfig {
    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub publisher: Option<PublisherConfig>,

    #[serde(default)]
    pub subscriber: Option<SubscriberConfig>,
}

impl RivulexConfig {
    /// Load from `RIVULEX_CONFIG` or the default path.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("RIVULEX_CONFIG").unwrap_or_else(|_| "config/rivulex.toml".to_string());
        Self::load_from(path)
    }

    /// Load from a specific path; a missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);
        let config: RivulexConfig = toml::from_str(&content)?;
        config.validate()?;

        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(publisher) = &self.publisher {
            publisher.validate()?;
        }
        if let Some(subscriber) = &self.subscriber {
            subscriber.validate()?;
        }
        Ok(())
    }
}

/// Redis connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Publisher settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PublisherConfig {
    /// Group label stamped into every published record's headers.
    #[serde(default)]
    pub group: String,

    /// Stream used when a publish call names none.
    #[serde(default)]
    pub default_stream: String,
}

impl PublisherConfig {
    pub fn new(group: impl Into<String>, default_stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            default_stream: default_stream.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.group.is_empty() {
            return Err(ConfigError::MissingField("publisher.group"));
        }
        if self.default_stream.is_empty() {
            return Err(ConfigError::MissingField("publisher.default_stream"));
        }
        Ok(())
    }
}

/// Subscriber settings.
#[derive(Debug, Deserialize, Clone)]
pub struct SubscriberConfig {
    /// Consumer group name.
    #[serde(default)]
    pub group: String,

    /// Streams to consume.
    #[serde(default)]
    pub streams: Vec<String>,

    /// Stream receiving rejected events.
    #[serde(default = "default_dead_letter")]
    pub dead_letter: String,

    /// Consumer identity; generated from the group and the current time
    /// when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Idle time after which a pending record may be reclaimed.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Wall-clock budget per handler invocation.
    #[serde(default = "default_process_timeout_ms")]
    pub process_timeout_ms: u64,

    /// Events in flight per consumer loop.
    #[serde(default = "default_process_concurrency")]
    pub process_concurrency: usize,

    /// Records per read or claim.
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,

    /// Block time of the live group read.
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,

    /// Handler invocations before an event is rejected.
    #[serde(default = "default_retries")]
    pub retries: u64,

    /// Retention trimming; disabled when absent.
    #[serde(default)]
    pub trimmer: Option<TrimmerConfig>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            group: String::new(),
            streams: Vec::new(),
            dead_letter: default_dead_letter(),
            client_id: None,
            ack_timeout_ms: default_ack_timeout_ms(),
            process_timeout_ms: default_process_timeout_ms(),
            process_concurrency: default_process_concurrency(),
            fetch_batch_size: default_fetch_batch_size(),
            block_time_ms: default_block_time_ms(),
            retries: default_retries(),
            trimmer: None,
        }
    }
}

fn default_dead_letter() -> String {
    DEFAULT_DEAD_LETTER.to_string()
}

fn default_ack_timeout_ms() -> u64 {
    30_000
}

fn default_process_timeout_ms() -> u64 {
    200
}

fn default_process_concurrency() -> usize {
    100
}

fn default_fetch_batch_size() -> usize {
    100
}

fn default_block_time_ms() -> u64 {
    30_000
}

fn default_retries() -> u64 {
    3
}

impl SubscriberConfig {
    pub fn new(group: impl Into<String>, streams: Vec<String>) -> Self {
        Self {
            group: group.into(),
            streams,
            ..Default::default()
        }
    }

    pub fn with_trimmer(mut self, trimmer: TrimmerConfig) -> Self {
        self.trimmer = Some(trimmer);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.group.is_empty() {
            return Err(ConfigError::MissingField("subscriber.group"));
        }
        if self.streams.is_empty() {
            return Err(ConfigError::MissingField("subscriber.streams"));
        }
        Ok(())
    }

    /// Raise every knob to its minimum bound.
    pub(crate) fn clamped(mut self) -> Self {
        let before = self.clone();
        self.ack_timeout_ms = self.ack_timeout_ms.max(MIN_ACK_TIMEOUT_MS);
        self.process_timeout_ms = self.process_timeout_ms.max(MIN_PROCESS_TIMEOUT_MS);
        self.process_concurrency = self.process_concurrency.max(1);
        self.fetch_batch_size = self.fetch_batch_size.max(1);
        self.block_time_ms = self.block_time_ms.max(MIN_BLOCK_TIME_MS);
        self.retries = self.retries.max(1);
        self.trimmer = self.trimmer.map(TrimmerConfig::clamped);

        if self.ack_timeout_ms != before.ack_timeout_ms
            || self.process_timeout_ms != before.process_timeout_ms
            || self.block_time_ms != before.block_time_ms
        {
            debug!("subscriber timing knobs raised to their minimum bounds");
        }
        self
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time_ms)
    }

    /// Consumer identity, `rivulex:<group>:sub:<unix-ms>` when not set.
    pub(crate) fn resolved_client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            format!(
                "rivulex:{}:sub:{}",
                self.group,
                chrono::Utc::now().timestamp_millis()
            )
        })
    }
}

/// Trimmer settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TrimmerConfig {
    /// Time between trim cycles.
    #[serde(default = "default_trimmer_ms")]
    pub interval_ms: u64,

    /// Age beyond which records are dropped.
    #[serde(default = "default_trimmer_ms")]
    pub retention_ms: u64,
}

impl Default for TrimmerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_trimmer_ms(),
            retention_ms: default_trimmer_ms(),
        }
    }
}

fn default_trimmer_ms() -> u64 {
    48 * 60 * 60 * 1_000
}

impl TrimmerConfig {
    pub fn new(interval: Duration, retention: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            retention_ms: retention.as_millis() as u64,
        }
    }

    pub(crate) fn clamped(mut self) -> Self {
        self.interval_ms = self.interval_ms.max(MIN_TRIMMER_MS);
        self.retention_ms = self.retention_ms.max(MIN_TRIMMER_MS);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// Substitute `${VAR_NAME}` with the environment value; unset variables
/// keep the placeholder.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_defaults_match_documented_values() {
        let config = SubscriberConfig::new("g", vec!["s".to_string()]);
        assert_eq!(config.ack_timeout(), Duration::from_secs(30));
        assert_eq!(config.process_timeout(), Duration::from_millis(200));
        assert_eq!(config.process_concurrency, 100);
        assert_eq!(config.fetch_batch_size, 100);
        assert_eq!(config.block_time(), Duration::from_secs(30));
        assert_eq!(config.retries, 3);
        assert_eq!(config.dead_letter, "dead_letter");
    }

    #[test]
    fn clamping_raises_to_minimum_bounds() {
        let mut config = SubscriberConfig::new("g", vec!["s".to_string()]);
        config.ack_timeout_ms = 10;
        config.process_timeout_ms = 1;
        config.process_concurrency = 0;
        config.fetch_batch_size = 0;
        config.block_time_ms = 0;
        config.retries = 0;
        config.trimmer = Some(TrimmerConfig {
            interval_ms: 1,
            retention_ms: 1,
        });

        let clamped = config.clamped();
        assert_eq!(clamped.ack_timeout(), Duration::from_secs(1));
        assert_eq!(clamped.process_timeout(), Duration::from_millis(20));
        assert_eq!(clamped.process_concurrency, 1);
        assert_eq!(clamped.fetch_batch_size, 1);
        assert_eq!(clamped.block_time(), Duration::from_secs(1));
        assert_eq!(clamped.retries, 1);

        let trimmer = clamped.trimmer.unwrap();
        assert_eq!(trimmer.interval(), Duration::from_secs(10));
        assert_eq!(trimmer.retention(), Duration::from_secs(10));
    }

    #[test]
    fn validation_requires_group_and_streams() {
        let config = SubscriberConfig::new("", vec!["s".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("subscriber.group"))
        ));

        let config = SubscriberConfig::new("g", Vec::new());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("subscriber.streams"))
        ));
    }

    #[test]
    fn publisher_validation_requires_default_stream() {
        let config = PublisherConfig::new("g", "");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("publisher.default_stream"))
        ));
        assert!(PublisherConfig::new("g", "main").validate().is_ok());
    }

    #[test]
    fn default_client_id_embeds_the_group() {
        let config = SubscriberConfig::new("billing", vec!["s".to_string()]);
        let id = config.resolved_client_id();
        assert!(id.starts_with("rivulex:billing:sub:"));

        let mut config = config;
        config.client_id = Some("custom".to_string());
        assert_eq!(config.resolved_client_id(), "custom");
    }

    #[test]
    fn toml_parses_all_sections() {
        let toml = r#"
            [redis]
            url = "redis://example:6379"

            [publisher]
            group = "billing"
            default_stream = "main"

            [subscriber]
            group = "billing"
            streams = ["users", "orders"]
            retries = 5

            [subscriber.trimmer]
            interval_ms = 3600000
            retention_ms = 86400000
        "#;

        let config: RivulexConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.redis.url, "redis://example:6379");
        assert_eq!(config.publisher.unwrap().default_stream, "main");

        let subscriber = config.subscriber.unwrap();
        assert_eq!(subscriber.streams.len(), 2);
        assert_eq!(subscriber.retries, 5);
        assert_eq!(
            subscriber.trimmer.unwrap().interval(),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn env_var_substitution() {
        env::set_var("RIVULEX_TEST_URL", "redis://from-env:6379");
        let input = "url = \"${RIVULEX_TEST_URL}\"";
        assert_eq!(
            substitute_env_vars(input),
            "url = \"redis://from-env:6379\""
        );
        env::remove_var("RIVULEX_TEST_URL");

        let unset = "url = \"${RIVULEX_UNSET_VAR}\"";
        assert_eq!(substitute_env_vars(unset), unset);
    }
}
