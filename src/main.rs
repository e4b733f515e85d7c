//! ani-gateway — Binary Entrypoint
//! Boots the Axum HTTP server, wiring the upstream client, the cache store,
//! routes and middleware.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use ani_gateway::api::{create_router, AppState};
use ani_gateway::cache::{CacheStore, NoopStore, RedisStore};
use ani_gateway::config::{CacheConfig, Config};
use ani_gateway::metrics::Metrics;
use ani_gateway::upstream::HttpSourceClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ani_gateway=info,warn"));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .init();

    let config = Config::from_env()?;

    // A configured-but-unreachable cache is a deployment fault; refuse to
    // start rather than hammer the upstream uncached.
    let cache: Arc<dyn CacheStore> = match &config.cache {
        CacheConfig::Redis { url } => {
            let store = RedisStore::connect(url)
                .await
                .context("connecting to redis")?;
            tracing::info!("cache: redis connected");
            Arc::new(store)
        }
        CacheConfig::Disabled => {
            tracing::warn!("cache disabled; every request goes upstream");
            Arc::new(NoopStore)
        }
    };

    let upstream = HttpSourceClient::new(&config.upstream_base_url, config.upstream_timeout)
        .context("building upstream client")?;

    let metrics = Metrics::init();
    let state = AppState {
        upstream: Arc::new(upstream),
        cache,
    };
    let app = create_router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(
        addr = %config.bind_addr,
        upstream = %config.upstream_base_url,
        "ani-gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
