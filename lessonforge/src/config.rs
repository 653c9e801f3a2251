//! Application configuration.
//!
//! Every section deserializes with defaults; [`AppConfig::from_env`] layers
//! `LESSONFORGE_*` environment variables on top.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::logging::LoggingSettings;
use crate::pipeline::{QuizPipelineConfig, VideoPipelineConfig};
use crate::quota::QuotaConfig;
use crate::upstream::{ChatCompletionsConfig, TranscriberConfig, UpstreamConfig, YouTubeSearchConfig};
use crate::{Error, Result};

const ENV_PREFIX: &str = "LESSONFORGE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite:lessonforge.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    8
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Interval of the background sweep over every cache.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub video: VideoPipelineConfig,
    #[serde(default)]
    pub quiz: QuizPipelineConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub youtube: YouTubeSearchConfig,
    #[serde(default)]
    pub transcriber: TranscriberConfig,
    #[serde(default)]
    pub llm: ChatCompletionsConfig,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingSettings::default(),
            quota: QuotaConfig::default(),
            cache: CacheConfig::default(),
            video: VideoPipelineConfig::default(),
            quiz: QuizPipelineConfig::default(),
            upstream: UpstreamConfig::default(),
            youtube: YouTubeSearchConfig::default(),
            transcriber: TranscriberConfig::default(),
            llm: ChatCompletionsConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` for variable values. Unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        env.set_string("DATABASE_URL", &mut config.database.url);
        env.parse("DB_MAX_CONNECTIONS", &mut config.database.max_connections)?;

        if let Some(filter) = env.get("LOG_FILTER") {
            config.logging.filter = Some(filter);
        }
        if let Some(dir) = env.get("LOG_DIR") {
            config.logging.log_dir = Some(PathBuf::from(dir));
        }
        env.parse("LOG_JSON", &mut config.logging.json)?;

        env.parse("VIDEO_DAILY_LIMIT", &mut config.quota.daily_limit)?;
        env.parse("VIDEO_SOFT_LIMIT_RATIO", &mut config.quota.soft_limit_ratio)?;
        env.parse("VIDEO_COOLDOWN_MS", &mut config.quota.cooldown_ms)?;
        env.parse("VIDEO_QUERY_CACHE_TTL_SECS", &mut config.quota.cache_ttl_secs)?;
        env.parse("QUOTA_RESET_HOUR_UTC", &mut config.quota.reset_hour_utc)?;

        env.parse("CACHE_SWEEP_INTERVAL_SECS", &mut config.cache.sweep_interval_secs)?;

        if let Some(ids) = env.get("FALLBACK_VIDEO_IDS") {
            config.video.fallback_video_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect();
        }
        env.parse("VIDEO_BACKGROUND_REFRESH", &mut config.video.background_refresh)?;
        env.parse("VIDEO_CACHE_TTL_SECS", &mut config.video.cache_ttl_secs)?;
        env.parse("VIDEO_SEARCH_TIMEOUT_MS", &mut config.video.search_timeout_ms)?;

        env.parse("QUIZ_STALE_AFTER_SECS", &mut config.quiz.stale_after_secs)?;
        env.parse("QUIZ_MAX_QUESTIONS", &mut config.quiz.max_questions)?;
        env.parse("QUIZ_BATCH_SIZE", &mut config.quiz.batch_size)?;
        env.parse("QUIZ_MAX_INPUT_WORDS", &mut config.quiz.max_input_words)?;
        env.parse("QUIZ_CACHE_TTL_SECS", &mut config.quiz.cache_ttl_secs)?;

        env.parse("UPSTREAM_TIMEOUT_MS", &mut config.upstream.request_timeout_ms)?;
        env.parse("UPSTREAM_GENERATION_TIMEOUT_MS", &mut config.upstream.generation_timeout_ms)?;
        env.parse("UPSTREAM_MAX_RETRIES", &mut config.upstream.retry.max_retries)?;

        env.set_string("YOUTUBE_BASE_URL", &mut config.youtube.base_url);
        env.set_string("YOUTUBE_API_KEY", &mut config.youtube.api_key);
        config.youtube.service = config.quota.service.clone();

        env.set_string("TRANSCRIPT_BASE_URL", &mut config.transcriber.base_url);
        if let Some(key) = env.get("TRANSCRIPT_API_KEY") {
            config.transcriber.api_key = Some(key);
        }

        env.set_string("LLM_BASE_URL", &mut config.llm.base_url);
        env.set_string("LLM_API_KEY", &mut config.llm.api_key);
        env.set_string("LLM_MODEL", &mut config.llm.model);
        config.llm.questions_per_quiz = config.quiz.max_questions;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(Error::config("database max_connections must be positive"));
        }
        self.quota.validate()?;
        self.video.validate()?;
        self.quiz.validate()?;
        if self.cache.sweep_interval_secs == 0 {
            return Err(Error::config("cache sweep_interval_secs must be positive"));
        }
        if self.upstream.request_timeout_ms == 0 || self.upstream.generation_timeout_ms == 0 {
            return Err(Error::config("upstream timeouts must be positive"));
        }
        validate_url("youtube base_url", &self.youtube.base_url)?;
        validate_url("llm base_url", &self.llm.base_url)?;
        if self.transcriber.base_url.trim().is_empty() {
            return Err(Error::config("transcriber base_url is required"));
        }
        validate_url("transcriber base_url", &self.transcriber.base_url)?;
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn validate_url(name: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| Error::config(format!("{name} is invalid: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(format!("{name} must be http(s), got {}", url.scheme())));
    }
    Ok(())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn set_string(&self, name: &str, target: &mut String) {
        if let Some(value) = self.get(name) {
            *target = value;
        }
    }

    fn parse<T>(&self, name: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.get(name) {
            *target = raw.parse().map_err(|e| {
                Error::config(format!("invalid value for {ENV_PREFIX}{name} ({raw}): {e}"))
            })?;
        }
        Ok(())
    }
}
