use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::cache::{self, keys, ttl, CacheStore};
use crate::catalog::{self, AnimeSummary, CatalogPage};
use crate::episode::{self, EpisodeRef};
use crate::error::{require_param, ApiError};
use crate::sources::{self, EpisodeSourceResponse, ServerNames, ServerSourceSet};
use crate::upstream::{SourceClient, TrackKind};

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn SourceClient>,
    pub cache: Arc<dyn CacheStore>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/explore", get(explore))
        .route("/search", get(search))
        .route("/anime-info", get(anime_info))
        .route("/basic-info", get(basic_info))
        .route("/episodes-list", get(episodes_list))
        .route("/episode-servers", get(episode_servers))
        .route("/episode-server-sources", get(episode_server_sources))
        .route("/episode-sources-from-server", get(episode_sources_from_server))
        .route("/by-genres", get(by_genres))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "Working"
}

async fn explore(State(state): State<AppState>) -> Result<Json<CatalogPage>, ApiError> {
    let page = cache::fetch_cached(state.cache.as_ref(), &keys::explore(), ttl::EXPLORE, || async {
        let raw = state.upstream.home().await?;
        Ok::<_, ApiError>(catalog::dedup_catalog(raw))
    })
    .await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
struct SearchQuery {
    query: String,
}

async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<AnimeSummary>>, ApiError> {
    let query = require_param("query", &q.query)?.to_string();
    let results = cache::fetch_cached(
        state.cache.as_ref(),
        &keys::search(&query),
        ttl::SEARCH,
        || async {
            let raw = state.upstream.search(&query).await?;
            Ok::<_, ApiError>(catalog::strip_summaries(&raw.animes))
        },
    )
    .await?;
    Ok(Json(results))
}

#[derive(Deserialize)]
struct AnimeQuery {
    #[serde(rename = "animeId")]
    anime_id: String,
}

async fn anime_info(
    State(state): State<AppState>,
    Query(q): Query<AnimeQuery>,
) -> Result<Json<Value>, ApiError> {
    let anime_id = require_param("animeId", &q.anime_id)?.to_string();
    let info = cache::fetch_cached(
        state.cache.as_ref(),
        &keys::anime_info(&anime_id),
        ttl::ANIME_INFO,
        || async {
            let mut data = state.upstream.anime_about(&anime_id).await?;
            // Tracker cross-reference ids are upstream-internal; clients
            // never see them.
            if let Some(info) = data.pointer_mut("/anime/info").and_then(Value::as_object_mut) {
                info.remove("anilistId");
                info.remove("malId");
            }
            Ok::<_, ApiError>(json!({
                "anime": data.get_mut("anime").map(Value::take).unwrap_or(Value::Null),
                "seasons": data.get_mut("seasons").map(Value::take).unwrap_or(Value::Null),
            }))
        },
    )
    .await?;
    Ok(Json(info))
}

async fn basic_info(
    State(state): State<AppState>,
    Query(q): Query<AnimeQuery>,
) -> Result<Json<AnimeSummary>, ApiError> {
    let anime_id = require_param("animeId", &q.anime_id)?.to_string();
    let summary = cache::fetch_cached(
        state.cache.as_ref(),
        &keys::basic_info(&anime_id),
        ttl::ANIME_INFO,
        || async {
            let data = state.upstream.anime_about(&anime_id).await?;
            let field = |name: &str| {
                data.pointer(&format!("/anime/info/{name}"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            Ok::<_, ApiError>(AnimeSummary {
                id: field("id"),
                name: field("name"),
                poster: field("poster"),
            })
        },
    )
    .await?;
    Ok(Json(summary))
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeListing {
    total_episodes: u32,
    episodes: Vec<EpisodeEntry>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeEntry {
    title: Option<String>,
    episode_id: u32,
    number: Option<u32>,
    is_filler: bool,
}

async fn episodes_list(
    State(state): State<AppState>,
    Query(q): Query<AnimeQuery>,
) -> Result<Json<EpisodeListing>, ApiError> {
    let anime_id = require_param("animeId", &q.anime_id)?.to_string();
    let listing = cache::fetch_cached(
        state.cache.as_ref(),
        &keys::episodes(&anime_id),
        ttl::EPISODES,
        || async {
            let raw = state.upstream.episodes(&anime_id).await?;
            let mut episodes = Vec::with_capacity(raw.episodes.len());
            for ep in raw.episodes {
                match episode::parse_episode_number(&ep.episode_id) {
                    Ok(n) => episodes.push(EpisodeEntry {
                        title: ep.title,
                        episode_id: n,
                        number: ep.number,
                        is_filler: ep.is_filler,
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, anime_id = %anime_id, "skipping episode with unusable id");
                    }
                }
            }
            Ok::<_, ApiError>(EpisodeListing {
                total_episodes: raw.total_episodes,
                episodes,
            })
        },
    )
    .await?;
    Ok(Json(listing))
}

#[derive(Deserialize)]
struct EpisodeQuery {
    #[serde(rename = "animeId")]
    anime_id: String,
    #[serde(rename = "episodeId")]
    episode_id: String,
}

async fn episode_servers(
    State(state): State<AppState>,
    Query(q): Query<EpisodeQuery>,
) -> Result<Json<ServerNames>, ApiError> {
    let anime_id = require_param("animeId", &q.anime_id)?;
    let ep = EpisodeRef::parse(anime_id, &q.episode_id)?;
    let names =
        sources::resolve_server_names(state.upstream.as_ref(), state.cache.as_ref(), &ep).await?;
    Ok(Json(sources::strip_blocked(names)))
}

async fn episode_server_sources(
    State(state): State<AppState>,
    Query(q): Query<EpisodeQuery>,
) -> Result<Json<EpisodeSourceResponse>, ApiError> {
    let anime_id = require_param("animeId", &q.anime_id)?;
    let ep = EpisodeRef::parse(anime_id, &q.episode_id)?;
    let response =
        sources::resolve_episode_sources(state.upstream.as_ref(), state.cache.as_ref(), &ep)
            .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct ServerQuery {
    #[serde(rename = "animeId")]
    anime_id: String,
    #[serde(rename = "episodeId")]
    episode_id: String,
    #[serde(rename = "serverName")]
    server_name: String,
    #[serde(rename = "type")]
    track: String,
}

async fn episode_sources_from_server(
    State(state): State<AppState>,
    Query(q): Query<ServerQuery>,
) -> Result<Json<ServerSourceSet>, ApiError> {
    let anime_id = require_param("animeId", &q.anime_id)?;
    let server_name = require_param("serverName", &q.server_name)?;
    let ep = EpisodeRef::parse(anime_id, &q.episode_id)?;
    let track =
        TrackKind::parse(&q.track).ok_or_else(|| ApiError::InvalidTrack(q.track.clone()))?;
    if sources::is_blocked_server(server_name) {
        return Err(ApiError::UnknownServer(server_name.to_string()));
    }
    let set =
        sources::resolve_single_server(state.upstream.as_ref(), &ep, server_name, track).await?;
    Ok(Json(set))
}

#[derive(Deserialize)]
struct GenreQuery {
    genre: String,
}

async fn by_genres(
    State(state): State<AppState>,
    Query(q): Query<GenreQuery>,
) -> Result<Json<Value>, ApiError> {
    let genre = require_param("genre", &q.genre)?;
    let raw = state.upstream.genre(genre).await?;
    Ok(Json(raw))
}
