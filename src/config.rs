//! Runtime configuration, read from the environment.
//! Every key has a default except the model API key, which is only required
//! once an LLM client is actually built.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_GLOSSARY_TABLE: &str = "glossary_terms";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Model endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
    /// Minimum spacing between requests (e.g. 100ms = 10 req/s).
    pub min_interval: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: 1024,
            temperature: 0.2,
            request_timeout: Duration::from_secs(60),
            min_interval: Duration::from_millis(100),
        }
    }
}

impl LlmConfig {
    /// Model settings alone; see `Config::from_env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::from_env().map(|c| c.llm)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub glossary_table: String,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub max_document_chars: usize,
    /// Persistent analysis cache; disabled when unset.
    pub cache_db: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            supabase_url: None,
            supabase_anon_key: None,
            glossary_table: DEFAULT_GLOSSARY_TABLE.into(),
            cache_capacity: 512,
            cache_ttl: Duration::from_secs(600),
            max_document_chars: 24_000,
            cache_db: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let llm = LlmConfig {
            api_key: get("OPENROUTER_API_KEY").unwrap_or_default(),
            base_url: get("OPENROUTER_BASE_URL").unwrap_or(defaults.llm.base_url),
            model: get("CLAUSEWISE_MODEL").unwrap_or(defaults.llm.model),
            max_tokens: parse_or(
                "CLAUSEWISE_MAX_TOKENS",
                get("CLAUSEWISE_MAX_TOKENS"),
                defaults.llm.max_tokens,
            )?,
            ..defaults.llm
        };

        Ok(Self {
            llm,
            supabase_url: get("SUPABASE_URL"),
            supabase_anon_key: get("SUPABASE_ANON_KEY"),
            glossary_table: get("CLAUSEWISE_GLOSSARY_TABLE").unwrap_or(defaults.glossary_table),
            cache_capacity: parse_or(
                "CLAUSEWISE_CACHE_CAPACITY",
                get("CLAUSEWISE_CACHE_CAPACITY"),
                defaults.cache_capacity,
            )?,
            cache_ttl: Duration::from_secs(parse_or(
                "CLAUSEWISE_CACHE_TTL_SECS",
                get("CLAUSEWISE_CACHE_TTL_SECS"),
                defaults.cache_ttl.as_secs(),
            )?),
            max_document_chars: parse_or(
                "CLAUSEWISE_MAX_DOCUMENT_CHARS",
                get("CLAUSEWISE_MAX_DOCUMENT_CHARS"),
                defaults.max_document_chars,
            )?,
            cache_db: get("CLAUSEWISE_CACHE_DB").map(PathBuf::from),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
