//! Translator configuration.
//! Defaults match the service's documented behavior; a JSON file and `TOLK_*`
//! environment variables can override them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::translate::dispatch::DispatchMode;
use crate::translate::limiter::RateLimitMode;
use crate::translate::retry::RetryPolicy;
use crate::translate::{validate_language_tag, TranslateError};

/// Provider limit on texts per remote call.
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub source_lang: String,
    pub target_lang: String,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub batch_size: usize,
    pub dispatch: DispatchConfig,
    pub cache: CacheConfig,
    pub api: ApiConfig,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            source_lang: "auto".into(),
            target_lang: "en".into(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            batch_size: MAX_BATCH_SIZE,
            dispatch: DispatchConfig::default(),
            cache: CacheConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub mode: RateLimitMode,
    pub capacity: f64,
    pub refill_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            mode: RateLimitMode::Wait,
            capacity: 10.0,
            refill_interval_ms: 1000,
        }
    }
}

impl RateLimitConfig {
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Worker,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite file; `None` keeps the cache in memory.
    pub path: Option<PathBuf>,
    /// LRU entries kept in front of SQLite.
    pub hot_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            hot_capacity: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub project_id: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://translation.googleapis.com/v3/projects".into(),
            project_id: String::new(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<TranslateError> for ConfigError {
    fn from(e: TranslateError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

impl TranslatorConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Apply `TOLK_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(key) = get("TOLK_API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(project) = get("TOLK_PROJECT_ID") {
            self.api.project_id = project;
        }
        if let Some(lang) = get("TOLK_SOURCE_LANG") {
            self.source_lang = lang;
        }
        if let Some(lang) = get("TOLK_TARGET_LANG") {
            self.target_lang = lang;
        }
        if let Some(path) = get("TOLK_CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(path));
        }
        if let Some(mode) = get("TOLK_RATE_LIMIT_MODE") {
            self.rate_limit.mode = serde_json::from_value(serde_json::Value::String(mode.to_lowercase()))
                .map_err(|_| ConfigError::Invalid(format!("unknown rate limit mode: {mode}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_language_tag(&self.source_lang, true)?;
        validate_language_tag(&self.target_lang, false)?;

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be 1..={MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !(self.rate_limit.capacity >= 1.0) {
            return Err(ConfigError::Invalid("rate_limit.capacity must be at least 1".into()));
        }
        if self.rate_limit.refill_interval_ms == 0 {
            return Err(ConfigError::Invalid("rate_limit.refill_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = TranslatorConfig::default();
        assert_eq!(config.source_lang, "auto");
        assert_eq!(config.target_lang, "en");
        assert_eq!(config.rate_limit.mode, RateLimitMode::Wait);
        assert_eq!(config.rate_limit.capacity, 10.0);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.dispatch.mode, DispatchMode::Worker);
        assert!(config.cache.path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"target_lang": "fr", "rate_limit": {{"mode": "strict"}}, "retry": {{"base_delay_ms": 0}}}}"#
        )
        .unwrap();

        let config = TranslatorConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.target_lang, "fr");
        assert_eq!(config.rate_limit.mode, RateLimitMode::Strict);
        assert_eq!(config.rate_limit.refill_interval_ms, 1000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 0);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TOLK_API_KEY", "secret"),
            ("TOLK_TARGET_LANG", "es"),
            ("TOLK_CACHE_PATH", "/tmp/tolk.db"),
            ("TOLK_RATE_LIMIT_MODE", "Disabled"),
        ]
        .into_iter()
        .collect();

        let mut config = TranslatorConfig::default();
        config.apply_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.api.api_key.as_deref(), Some("secret"));
        assert_eq!(config.target_lang, "es");
        assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/tolk.db")));
        assert_eq!(config.rate_limit.mode, RateLimitMode::Disabled);

        let bad = config.apply_vars(|k| (k == "TOLK_RATE_LIMIT_MODE").then(|| "sometimes".to_string()));
        assert!(matches!(bad, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let mut config = TranslatorConfig::default();
        config.batch_size = 101;
        assert!(config.validate().is_err());

        let mut config = TranslatorConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = TranslatorConfig::default();
        config.target_lang = "auto".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_is_never_serialized() {
        let mut config = TranslatorConfig::default();
        config.api.api_key = Some("secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
