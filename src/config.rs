// src/config.rs
// Process configuration, read once at startup from the environment
// (a local .env is honored in development via dotenvy).

use std::time::Duration;

use anyhow::{Context, Result};

pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_UPSTREAM_BASE_URL: &str = "UPSTREAM_BASE_URL";
pub const ENV_UPSTREAM_TIMEOUT_SECS: &str = "UPSTREAM_TIMEOUT_SECS";
pub const ENV_REDIS_HOST: &str = "REDIS_HOST";
pub const ENV_REDIS_PORT: &str = "REDIS_PORT";
pub const ENV_REDIS_PASSWORD: &str = "REDIS_PASSWORD";
pub const ENV_CACHE_DISABLED: &str = "CACHE_DISABLED";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 15;
const DEFAULT_REDIS_PORT: u16 = 6379;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub cache: CacheConfig,
}

/// Cache wiring. A missing/unreachable Redis is fatal at startup unless
/// caching was explicitly disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheConfig {
    Redis { url: String },
    Disabled,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or(ENV_BIND_ADDR, DEFAULT_BIND_ADDR);

        let upstream_base_url = std::env::var(ENV_UPSTREAM_BASE_URL)
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .with_context(|| {
                format!("{ENV_UPSTREAM_BASE_URL} must be set to the scraper API base URL")
            })?;

        let upstream_timeout = match std::env::var(ENV_UPSTREAM_TIMEOUT_SECS) {
            Ok(raw) => {
                let secs: u64 = raw.trim().parse().with_context(|| {
                    format!("{ENV_UPSTREAM_TIMEOUT_SECS} must be a number of seconds, got {raw:?}")
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        };

        let cache = if flag_set(ENV_CACHE_DISABLED) {
            CacheConfig::Disabled
        } else {
            CacheConfig::Redis {
                url: redis_url_from_env()?,
            }
        };

        Ok(Self {
            bind_addr,
            upstream_base_url,
            upstream_timeout,
            cache,
        })
    }
}

fn redis_url_from_env() -> Result<String> {
    let host = std::env::var(ENV_REDIS_HOST)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .with_context(|| {
            format!("{ENV_REDIS_HOST} must be set (or {ENV_CACHE_DISABLED}=1 to run uncached)")
        })?;

    let port = match std::env::var(ENV_REDIS_PORT) {
        Ok(raw) => raw
            .trim()
            .parse::<u16>()
            .with_context(|| format!("{ENV_REDIS_PORT} must be a port number, got {raw:?}"))?,
        Err(_) => DEFAULT_REDIS_PORT,
    };

    let password = std::env::var(ENV_REDIS_PASSWORD).unwrap_or_default();
    Ok(if password.is_empty() {
        format!("redis://{host}:{port}/")
    } else {
        format!("redis://:{password}@{host}:{port}/")
    })
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn flag_set(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
