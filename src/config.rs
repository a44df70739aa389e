// Service Configuration
//
// Defines configuration for the collection pipeline, the scorer and the HTTP
// surface. Every field has a default so a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main readerpulse configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PulseConfig {
    pub server: ServerConfig,
    pub collector: CollectorConfig,
    pub session: SessionConfig,
    pub hooks: HooksConfig,
    pub recommender: RecommenderConfig,
    pub feedback: FeedbackConfig,
    pub privacy: PrivacyConfig,
    pub store: StoreConfig,
}

/// HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,

    /// Largest accepted `POST /events` batch
    pub max_batch: usize,

    /// How far ahead of the server clock an event timestamp may be (seconds)
    #[serde(with = "serde_duration")]
    pub max_clock_skew: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 3400).into(),
            max_batch: 500,
            max_clock_skew: Duration::from_secs(300),
        }
    }
}

/// Client-side event queue and tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Where batches are POSTed
    pub endpoint: String,

    /// Buffer size that triggers a flush
    pub batch_size: usize,

    /// Time between timer-driven flushes (milliseconds)
    #[serde(with = "serde_duration_millis")]
    pub flush_interval: Duration,

    /// Bound on a single delivery attempt (milliseconds)
    #[serde(with = "serde_duration_millis")]
    pub request_timeout: Duration,

    /// Attempts per event before it is dropped and counted as lost
    pub max_retries: u32,

    /// Honor Do-Not-Track / withheld consent
    pub respect_dnt: bool,

    /// Non-critical events accepted per event type per minute
    pub rate_limit_per_minute: u32,

    /// Serialized payload budget before truncation
    pub max_payload_bytes: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3400/events".to_string(),
            batch_size: 10,
            flush_interval: Duration::from_millis(5000),
            request_timeout: Duration::from_millis(10_000),
            max_retries: 3,
            respect_dnt: true,
            rate_limit_per_minute: 60,
            max_payload_bytes: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which a new session starts (seconds)
    #[serde(with = "serde_duration")]
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Foreground time between READING_TIME events (seconds)
    #[serde(with = "serde_duration")]
    pub reading_interval: Duration,

    /// Identical errors inside this window are suppressed (seconds)
    #[serde(with = "serde_duration")]
    pub error_dedupe_window: Duration,

    pub max_errors_per_minute: u32,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            reading_interval: Duration::from_secs(30),
            error_dedupe_window: Duration::from_secs(10),
            max_errors_per_minute: 20,
        }
    }
}

/// Per-strategy multipliers applied before merging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyWeights {
    pub personal: f32,
    pub trending: f32,
    pub similar: f32,
    pub category: f32,
    pub collaborative: f32,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            personal: 1.0,
            trending: 0.8,
            similar: 0.9,
            category: 0.7,
            collaborative: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommenderConfig {
    /// Budget for one strategy (milliseconds)
    #[serde(with = "serde_duration_millis")]
    pub strategy_timeout: Duration,

    /// Budget for the whole request; partial merges are returned after it (milliseconds)
    #[serde(with = "serde_duration_millis")]
    pub request_deadline: Duration,

    /// Interactions considered when building personal affinities
    pub history_limit: usize,

    /// Trending activity window (seconds)
    #[serde(with = "serde_duration")]
    pub trending_window: Duration,

    /// Decay half-life for trending activity (seconds)
    #[serde(with = "serde_duration")]
    pub trending_half_life: Duration,

    /// JSON catalog file; an empty catalog is served when unset
    pub catalog_path: Option<PathBuf>,

    /// Catalog reload interval (seconds)
    #[serde(with = "serde_duration")]
    pub catalog_refresh: Duration,

    pub default_limit: usize,
    pub max_limit: usize,
    pub default_diversity: f32,
    pub default_freshness: f32,

    /// Served recommendations remembered for feedback resolution
    pub served_capacity: usize,

    /// How long a served recommendation id stays resolvable (seconds)
    #[serde(with = "serde_duration")]
    pub served_ttl: Duration,

    pub weights: StrategyWeights,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            strategy_timeout: Duration::from_millis(250),
            request_deadline: Duration::from_millis(800),
            history_limit: 50,
            trending_window: Duration::from_secs(7 * 86400),
            trending_half_life: Duration::from_secs(86400),
            catalog_path: None,
            catalog_refresh: Duration::from_secs(60),
            default_limit: 5,
            max_limit: 20,
            default_diversity: 0.3,
            default_freshness: 0.2,
            served_capacity: 10_000,
            served_ttl: Duration::from_secs(7 * 86400),
            weights: StrategyWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Half-life of a feedback weight delta (seconds)
    #[serde(with = "serde_duration")]
    pub half_life: Duration,
    pub min_multiplier: f32,
    pub max_multiplier: f32,

    /// Subjects whose weight deltas are kept; the least recently used go first
    pub max_subjects: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            half_life: Duration::from_secs(14 * 86400),
            min_multiplier: 0.1,
            max_multiplier: 2.0,
            max_subjects: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Replace subject ids with salted hashes before storage
    pub pseudonymize_subjects: bool,
    pub salt: String,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            pseudonymize_subjects: true,
            salt: "readerpulse".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Events older than this are evicted (seconds)
    #[serde(with = "serde_duration")]
    pub retention: Duration,

    /// Per-subject interaction history cap
    pub max_history_per_subject: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 86400),
            max_history_per_subject: 500,
        }
    }
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
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

// Same, as milliseconds
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl PulseConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: PulseConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let collector = &self.collector;
        if collector.batch_size == 0 || collector.batch_size > 1000 {
            return Err(ConfigError::ValidationError(
                "collector: batch_size must be between 1 and 1000".to_string(),
            ));
        }
        if collector.flush_interval < Duration::from_millis(100) {
            return Err(ConfigError::ValidationError(
                "collector: flush_interval must be at least 100ms".to_string(),
            ));
        }
        if collector.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "collector: request_timeout must be positive".to_string(),
            ));
        }
        if collector.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "collector: max_retries must be at least 1".to_string(),
            ));
        }

        if self.session.ttl < Duration::from_secs(60) {
            return Err(ConfigError::ValidationError(
                "session: ttl must be at least 1 minute".to_string(),
            ));
        }
        if self.hooks.reading_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "hooks: reading_interval must be positive".to_string(),
            ));
        }

        let rec = &self.recommender;
        if rec.strategy_timeout.is_zero() || rec.request_deadline < rec.strategy_timeout {
            return Err(ConfigError::ValidationError(
                "recommender: request_deadline must be at least strategy_timeout".to_string(),
            ));
        }
        if rec.default_limit == 0 || rec.default_limit > rec.max_limit {
            return Err(ConfigError::ValidationError(
                "recommender: default_limit must be between 1 and max_limit".to_string(),
            ));
        }
        for (name, factor) in [
            ("default_diversity", rec.default_diversity),
            ("default_freshness", rec.default_freshness),
        ] {
            if !(0.0..=1.0).contains(&factor) {
                return Err(ConfigError::ValidationError(format!(
                    "recommender: {} must be within [0, 1]",
                    name
                )));
            }
        }
        let w = &rec.weights;
        if [w.personal, w.trending, w.similar, w.category, w.collaborative]
            .iter()
            .any(|weight| !(0.0..=1.0).contains(weight))
        {
            return Err(ConfigError::ValidationError(
                "recommender: strategy weights must be within [0, 1]".to_string(),
            ));
        }

        let fb = &self.feedback;
        if fb.half_life < Duration::from_secs(60) {
            return Err(ConfigError::ValidationError(
                "feedback: half_life must be at least 1 minute".to_string(),
            ));
        }
        if fb.min_multiplier <= 0.0 || fb.min_multiplier >= 1.0 || fb.max_multiplier <= 1.0 {
            return Err(ConfigError::ValidationError(
                "feedback: multipliers must satisfy 0 < min < 1 < max".to_string(),
            ));
        }
        if fb.max_subjects == 0 {
            return Err(ConfigError::ValidationError(
                "feedback: max_subjects must be greater than 0".to_string(),
            ));
        }

        if self.privacy.pseudonymize_subjects && self.privacy.salt.is_empty() {
            return Err(ConfigError::ValidationError(
                "privacy: salt is required when pseudonymizing".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}
