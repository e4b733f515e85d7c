//! Client for the scraper API this gateway fronts.
//!
//! The upstream is a black box with unpredictable per-call latency and
//! failure rate; every call carries its own timeout and failures surface as
//! explicit [`UpstreamError`] values so callers can decide what is fatal.
//! Payloads arrive wrapped in a `{ "data": ... }` envelope.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::episode::EpisodeRef;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned {status} for {path}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
    },
    #[error("upstream payload for {path} did not decode: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Audio track variant offered by the upstream servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Sub,
    Dub,
}

impl TrackKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "sub" => Some(TrackKind::Sub),
            "dub" => Some(TrackKind::Dub),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Sub => "sub",
            TrackKind::Dub => "dub",
        }
    }
}

/// One playable stream variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Subtitle (or thumbnail) track reference as published by the upstream.
/// Only `kind == "captions"` entries survive into responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionTrack {
    pub file: String,
    #[serde(default)]
    pub label: String,
    pub kind: String,
}

/// Skip marker, in seconds from episode start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSearchPage {
    #[serde(default)]
    pub animes: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEpisodeList {
    #[serde(default)]
    pub total_episodes: u32,
    #[serde(default)]
    pub episodes: Vec<RawEpisode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEpisode {
    #[serde(default)]
    pub title: Option<String>,
    pub episode_id: String,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub is_filler: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEpisodeServers {
    #[serde(default)]
    pub sub: Vec<RawServerEntry>,
    #[serde(default)]
    pub dub: Vec<RawServerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServerEntry {
    pub server_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEpisodeSources {
    #[serde(default)]
    pub sources: Vec<MediaSource>,
    #[serde(default)]
    pub tracks: Vec<CaptionTrack>,
    #[serde(default)]
    pub intro: Option<TimeSpan>,
    #[serde(default)]
    pub outro: Option<TimeSpan>,
}

/// The upstream surface the gateway depends on. Implemented by
/// [`HttpSourceClient`] in production and by scripted doubles in tests.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Homepage sections keyed by category name, in upstream order.
    async fn home(&self) -> Result<IndexMap<String, Value>, UpstreamError>;
    /// Full-text title search.
    async fn search(&self, query: &str) -> Result<RawSearchPage, UpstreamError>;
    /// Full metadata document for one anime (info, seasons, relations).
    async fn anime_about(&self, anime_id: &str) -> Result<Value, UpstreamError>;
    /// Episode index for one anime.
    async fn episodes(&self, anime_id: &str) -> Result<RawEpisodeList, UpstreamError>;
    /// Which named servers can stream an episode, per track type.
    async fn episode_servers(&self, ep: &EpisodeRef) -> Result<RawEpisodeServers, UpstreamError>;
    /// Stream bundle for one (episode, server, track type) combination.
    async fn episode_sources(
        &self,
        ep: &EpisodeRef,
        server: &str,
        track: TrackKind,
    ) -> Result<RawEpisodeSources, UpstreamError>;
    /// Uncached genre listing passthrough.
    async fn genre(&self, genre: &str) -> Result<Value, UpstreamError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Reqwest-backed production client.
pub struct HttpSourceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSourceClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("ani-gateway/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, UpstreamError> {
        ensure_metrics_described();

        let started = Instant::now();
        let out = self.get_json_inner(path, query).await;
        histogram!("upstream_request_ms").record(started.elapsed().as_millis() as f64);
        if out.is_err() {
            counter!("upstream_errors_total").increment(1);
        }
        out
    }

    async fn get_json_inner<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "upstream request");

        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                path: path.to_string(),
                status,
            });
        }

        let body = resp.text().await?;
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|source| UpstreamError::Decode {
                path: path.to_string(),
                source,
            })?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn home(&self) -> Result<IndexMap<String, Value>, UpstreamError> {
        self.get_json("/home", &[]).await
    }

    async fn search(&self, query: &str) -> Result<RawSearchPage, UpstreamError> {
        self.get_json("/search", &[("q", query)]).await
    }

    async fn anime_about(&self, anime_id: &str) -> Result<Value, UpstreamError> {
        self.get_json(&format!("/anime/{anime_id}"), &[]).await
    }

    async fn episodes(&self, anime_id: &str) -> Result<RawEpisodeList, UpstreamError> {
        self.get_json(&format!("/anime/{anime_id}/episodes"), &[])
            .await
    }

    async fn episode_servers(&self, ep: &EpisodeRef) -> Result<RawEpisodeServers, UpstreamError> {
        self.get_json(
            "/episode/servers",
            &[("animeEpisodeId", ep.upstream_param().as_str())],
        )
        .await
    }

    async fn episode_sources(
        &self,
        ep: &EpisodeRef,
        server: &str,
        track: TrackKind,
    ) -> Result<RawEpisodeSources, UpstreamError> {
        self.get_json(
            "/episode/sources",
            &[
                ("animeEpisodeId", ep.upstream_param().as_str()),
                ("server", server),
                ("category", track.as_str()),
            ],
        )
        .await
    }

    async fn genre(&self, genre: &str) -> Result<Value, UpstreamError> {
        self.get_json(&format!("/genre/{genre}"), &[]).await
    }
}

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("upstream_errors_total", "Upstream calls that failed.");
        describe_histogram!("upstream_request_ms", "Upstream request time in milliseconds.");
    });
}
