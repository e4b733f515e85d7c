//! Look-aside cache with per-resource TTL tiers.
//!
//! Every cache-fronted endpoint goes through [`fetch_cached`]: try the
//! store, fall back to the compute closure, then populate. A failing store
//! is logged, counted and treated as a miss, so the cache can degrade but
//! never fail a request. Values are JSON strings; keys are resource-prefixed
//! and parameter-qualified so resources and parameter sets cannot collide.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// TTL tiers, balancing freshness against load on a scraping upstream that
/// is expensive and rate-limit-sensitive.
pub mod ttl {
    use std::time::Duration;

    /// Homepage catalog: changes often but is expensive to recompute.
    pub const EXPLORE: Duration = Duration::from_secs(3 * 60 * 60);
    /// Search results: query-specific long tail.
    pub const SEARCH: Duration = Duration::from_secs(12 * 60 * 60);
    /// Anime metadata and seasons: rarely change once published.
    pub const ANIME_INFO: Duration = Duration::from_secs(3 * 24 * 60 * 60);
    /// Episode index: stable once an anime has aired.
    pub const EPISODES: Duration = Duration::from_secs(7 * 24 * 60 * 60);
    /// Per-episode server-name lists: structural, almost never change.
    /// Only the names live this long; resolved stream URLs are signed and
    /// short-lived and are never cached at all.
    pub const SERVER_NAMES: Duration = Duration::from_secs(30 * 24 * 60 * 60);
}

/// Cache key builders.
pub mod keys {
    use crate::episode::EpisodeRef;

    pub fn explore() -> String {
        "explore".to_string()
    }

    pub fn search(query: &str) -> String {
        format!("search:{query}")
    }

    pub fn anime_info(anime_id: &str) -> String {
        format!("anime-info:{anime_id}")
    }

    pub fn basic_info(anime_id: &str) -> String {
        format!("basic-info:{anime_id}")
    }

    pub fn episodes(anime_id: &str) -> String {
        format!("episodes-list:{anime_id}")
    }

    pub fn server_names(ep: &EpisodeRef) -> String {
        format!("episode-server-sources:{}:{}", ep.anime_id, ep.episode)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Key/value store with per-key expiry. `None` from `get` means absent or
/// expired; callers cannot tell the two apart.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

/// Shared Redis-backed store used in production.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Open a connection manager and PING once, so a dead cache surfaces at
    /// startup instead of on the first request.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let mut conn = redis::aio::ConnectionManager::new(client).await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }
}

/// In-process store for tests and single-instance runs without Redis.
/// Expired entries linger until overwritten; reads treat them as absent.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().expect("rwlock poisoned");
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().expect("rwlock poisoned");
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

/// Store used when caching is explicitly disabled; every get is a miss and
/// every set is discarded.
pub struct NoopStore;

#[async_trait]
impl CacheStore for NoopStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
}

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cache_hits_total", "Look-aside reads served from the cache.");
        describe_counter!("cache_misses_total", "Look-aside reads that went upstream.");
        describe_counter!(
            "cache_errors_total",
            "Cache reads/writes that failed and were degraded to misses."
        );
    });
}

/// Look-aside wrapper shared by every cache-fronted endpoint.
///
/// The compute closure runs only on a miss; its error is the only error this
/// function can return. Unreadable payloads and store failures are downgraded
/// to misses so a broken cache degrades service to direct upstream calls.
pub async fn fetch_cached<T, E, F, Fut>(
    store: &dyn CacheStore,
    key: &str,
    ttl: Duration,
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    ensure_metrics_described();

    match store.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                counter!("cache_hits_total").increment(1);
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(error = ?e, key, "cache payload unreadable; recomputing");
                counter!("cache_errors_total").increment(1);
            }
        },
        Ok(None) => {
            counter!("cache_misses_total").increment(1);
        }
        Err(e) => {
            tracing::warn!(error = ?e, key, "cache read failed");
            counter!("cache_errors_total").increment(1);
        }
    }

    let fresh = compute().await?;

    match serde_json::to_string(&fresh) {
        Ok(raw) => {
            if let Err(e) = store.set(key, raw, ttl).await {
                tracing::warn!(error = ?e, key, "cache write failed");
                counter!("cache_errors_total").increment(1);
            }
        }
        Err(e) => {
            tracing::warn!(error = ?e, key, "cache payload unserializable");
            counter!("cache_errors_total").increment(1);
        }
    }

    Ok(fresh)
}
