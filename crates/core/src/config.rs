use crate::util::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30 * 60;
pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.1;
pub const DEFAULT_GLOSS_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_DAILY_LIMIT: u32 = 100;
pub const DEFAULT_ENDPOINT: &str = "https://libretranslate.com/translate";
pub const ENV_API_KEY: &str = "POLYGLOT_API_KEY";
pub const ENV_ENDPOINT: &str = "POLYGLOT_ENDPOINT";
pub const ENV_GLOSS_ENDPOINT: &str = "POLYGLOT_GLOSS_ENDPOINT";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        let trimmed = v.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyLanguage);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Language tags compare case-insensitively (`pt-BR` == `pt-br`).
    pub fn same_as(&self, other: &LanguageCode) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

/// Tunables for the translation engine. Defaults match the mobile app:
/// 10 s per attempt, 30 min cache lifetime, two retries per unit.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub unit_timeout: Duration,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    /// Chance that a batch start sweeps expired cache entries.
    pub sweep_probability: f64,
    pub gloss_timeout: Duration,
    pub history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_timeout: Duration::from_secs(DEFAULT_UNIT_TIMEOUT_SECS),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            retry: RetryPolicy::default(),
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
            gloss_timeout: Duration::from_millis(DEFAULT_GLOSS_TIMEOUT_MS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        self.unit_timeout = timeout;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sweep_probability(mut self, p: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::InvalidProbability(p));
        }
        self.sweep_probability = p;
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub gloss_endpoint: Option<String>,
    pub api_key: Option<ApiKey>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            gloss_endpoint: None,
            api_key: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub text: String,
    pub source: LanguageCode,
    pub targets: Vec<LanguageCode>,
    pub provider: ProviderConfig,
    pub engine: EngineConfig,
    pub daily_limit: Option<u32>,
    pub offline: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("language code must not be empty")]
    EmptyLanguage,
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("unit timeout must be > 0")]
    ZeroTimeout,
    #[error("sweep probability must be within 0..=1, got {0}")]
    InvalidProbability(f64),
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(ApiKey::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(ApiKey::new(v)?)),
            None => Ok(None),
        },
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}
