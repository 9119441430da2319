use crate::ingest::PipelineConfig;
use crate::zones::cache::DEFAULT_MAX_COST;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("unknown environment {0:?}")]
    UnknownEnvironment(String),
}

/// Deployment environment; only affects log formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "devel" | "development" => Ok(Environment::Development),
            "stag" | "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::UnknownEnvironment(value.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

/// Process configuration read from the environment at ignition.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub database_url: String,
    pub redis_host: String,
    pub redis_db: i64,
    pub log_level: String,
    pub environment: Environment,
    pub pipeline: PipelineConfig,
    pub zone_refresh_interval: Duration,
    pub zone_cache_max_cost: usize,
}

impl ProcessorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DB_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DB_URL"))?;

        let raw_db = env_string("REDIS_PM_DB", "6");
        let redis_db = raw_db.trim().parse::<i64>().map_err(|_| ConfigError::Invalid {
            key: "REDIS_PM_DB",
            value: raw_db.clone(),
        })?;

        let environment = Environment::from_str(&env_string("ENVIRONMENT", "development"))?;
        let defaults = PipelineConfig::default();

        Ok(Self {
            database_url,
            redis_host: env_string("REDIS_PM_HOST", "redis"),
            redis_db,
            log_level: env_string("LOG_LEVEL", "info"),
            environment,
            pipeline: PipelineConfig {
                parser_workers: env_usize("PARSER_WORKERS", defaults.parser_workers).max(1),
                loader_workers: env_usize("LOADER_WORKERS", defaults.loader_workers).max(1),
                queue_capacity: env_usize("QUEUE_CAPACITY", defaults.queue_capacity).max(1),
                batch_size: env_usize("BATCH_SIZE", defaults.batch_size).max(1),
            },
            zone_refresh_interval: env_duration_secs("ZONE_REFRESH_SECS", 6 * 60 * 60),
            zone_cache_max_cost: env_usize("ZONE_CACHE_MAX_COST", DEFAULT_MAX_COST),
        })
    }
}
