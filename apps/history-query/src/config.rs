use crate::request::{parse_channel_list, QueryDefaults};
use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "/database/data_storage.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub http_bind: String,
    pub query_timeout: Duration,
    pub max_concurrent: usize,
    pub defaults: QueryDefaults,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let db_path = PathBuf::from(env_string("HISTORY_DB_PATH", Some(DEFAULT_DB_PATH.to_string()))?);
        let http_bind = env_string("HISTORY_HTTP_BIND", Some("127.0.0.1:9102".to_string()))?;

        let query_timeout = Duration::from_millis(env_u64("HISTORY_QUERY_TIMEOUT_MS", Some(30_000))?);
        if query_timeout.is_zero() {
            return Err(anyhow!("HISTORY_QUERY_TIMEOUT_MS must be greater than zero"));
        }
        let max_concurrent = env_u64("HISTORY_MAX_CONCURRENT", Some(4))?.max(1) as usize;

        let fallback = QueryDefaults::default();
        let defaults = QueryDefaults {
            channels: env_optional("HISTORY_DEFAULT_CHANNELS")
                .map(|raw| parse_channel_list(&raw))
                .unwrap_or_default(),
            time_range: env_optional("HISTORY_DEFAULT_TIME_RANGE").unwrap_or(fallback.time_range),
            agg_func: env_optional("HISTORY_DEFAULT_AGG_FUNC").unwrap_or(fallback.agg_func),
            agg_interval: env_optional("HISTORY_DEFAULT_AGG_INTERVAL")
                .unwrap_or(fallback.agg_interval),
            category: env_optional("HISTORY_DEFAULT_CATEGORY").unwrap_or(fallback.category),
        };

        Ok(Self {
            db_path,
            http_bind,
            query_timeout,
            max_concurrent,
            defaults,
        })
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
