// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /            liveness body
// - GET /explore     dedup + exclusion + cache reuse
// - GET /search      param validation + field shedding
// - GET /anime-info  tracker id stripping
// - GET /episodes-list episode id normalization
// - GET /episode-servers blocklist filtering
// - error mapping    400 / 404 / 502 bodies

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tower::ServiceExt as _; // for `oneshot`

use ani_gateway::api::{create_router, AppState};
use ani_gateway::cache::MemoryStore;
use ani_gateway::episode::EpisodeRef;
use ani_gateway::upstream::{
    CaptionTrack, MediaSource, RawEpisodeList, RawEpisodeServers, RawEpisodeSources,
    RawSearchPage, SourceClient, TrackKind, UpstreamError,
};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn upstream_down(path: &str) -> UpstreamError {
    UpstreamError::Status {
        path: path.to_string(),
        status: reqwest::StatusCode::BAD_GATEWAY,
    }
}

/// Upstream double returning canned documents and counting calls.
#[derive(Default)]
struct CannedUpstream {
    home: Option<IndexMap<String, Value>>,
    about: Option<Value>,
    search_animes: Vec<Value>,
    episodes: Option<RawEpisodeList>,
    servers: Option<RawEpisodeServers>,
    genre: Option<Value>,
    home_calls: AtomicUsize,
    about_calls: AtomicUsize,
    discovery_calls: AtomicUsize,
}

#[async_trait]
impl SourceClient for CannedUpstream {
    async fn home(&self) -> Result<IndexMap<String, Value>, UpstreamError> {
        self.home_calls.fetch_add(1, Ordering::SeqCst);
        self.home.clone().ok_or_else(|| upstream_down("/home"))
    }

    async fn search(&self, _query: &str) -> Result<RawSearchPage, UpstreamError> {
        Ok(RawSearchPage {
            animes: self.search_animes.clone(),
        })
    }

    async fn anime_about(&self, _anime_id: &str) -> Result<Value, UpstreamError> {
        self.about_calls.fetch_add(1, Ordering::SeqCst);
        self.about.clone().ok_or_else(|| upstream_down("/anime"))
    }

    async fn episodes(&self, _anime_id: &str) -> Result<RawEpisodeList, UpstreamError> {
        self.episodes
            .clone()
            .ok_or_else(|| upstream_down("/anime/episodes"))
    }

    async fn episode_servers(&self, _ep: &EpisodeRef) -> Result<RawEpisodeServers, UpstreamError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        self.servers
            .clone()
            .ok_or_else(|| upstream_down("/episode/servers"))
    }

    async fn episode_sources(
        &self,
        _ep: &EpisodeRef,
        server: &str,
        track: TrackKind,
    ) -> Result<RawEpisodeSources, UpstreamError> {
        Ok(RawEpisodeSources {
            sources: vec![MediaSource {
                url: format!("https://cdn.test/{server}-{}.m3u8", track.as_str()),
                kind: Some("hls".to_string()),
            }],
            tracks: vec![CaptionTrack {
                file: "https://cdn.test/en.vtt".to_string(),
                label: "English".to_string(),
                kind: "captions".to_string(),
            }],
            intro: None,
            outro: None,
        })
    }

    async fn genre(&self, _genre: &str) -> Result<Value, UpstreamError> {
        self.genre.clone().ok_or_else(|| upstream_down("/genre"))
    }
}

fn router_with(upstream: Arc<CannedUpstream>) -> Router {
    create_router(AppState {
        upstream,
        cache: Arc::new(MemoryStore::new()),
    })
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

fn summary(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Anime {id}"),
        "poster": format!("https://img.test/{id}.jpg"),
        "rank": 3,
        "episodes": { "sub": 12, "dub": 12 }
    })
}

#[tokio::test]
async fn liveness_returns_working() {
    let app = router_with(Arc::new(CannedUpstream::default()));

    let req = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .expect("build GET /");

    let resp = app.oneshot(req).await.expect("oneshot /");
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    assert_eq!(String::from_utf8(bytes).expect("utf8"), "Working");
}

#[tokio::test]
async fn explore_dedups_and_reuses_the_cache() {
    let mut home = IndexMap::new();
    home.insert(
        "trendingAnimes".to_string(),
        json!([summary("a"), summary("b"), summary("a"), summary("c")]),
    );
    home.insert("top10Animes".to_string(), json!({ "today": [summary("x")] }));
    home.insert("genres".to_string(), json!(["Action", "Comedy"]));
    home.insert("mostPopularCount".to_string(), json!(9000));

    let upstream = Arc::new(CannedUpstream {
        home: Some(home),
        ..Default::default()
    });
    let app = router_with(upstream.clone());

    let (status, body) = get_json(app.clone(), "/explore").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["trendingAnimes"]
        .as_array()
        .expect("trendingAnimes array")
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(body.get("top10Animes").is_none());
    assert!(body.get("genres").is_none());
    assert!(body.get("mostPopularCount").is_none());
    // Only the renderable fields survive.
    assert_eq!(
        body["trendingAnimes"][0],
        json!({ "id": "a", "name": "Anime a", "poster": "https://img.test/a.jpg" })
    );

    let (status, _) = get_json(app, "/explore").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(upstream.home_calls.load(Ordering::SeqCst), 1, "second hit must come from cache");
}

#[tokio::test]
async fn search_requires_a_query_and_sheds_fields() {
    let upstream = Arc::new(CannedUpstream {
        search_animes: vec![summary("naruto"), json!({ "name": "broken record" })],
        ..Default::default()
    });
    let app = router_with(upstream);

    let (status, body) = get_json(app.clone(), "/search?query=%20%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "query is required");

    let (status, body) = get_json(app, "/search?query=naruto").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().expect("array of summaries");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0],
        json!({ "id": "naruto", "name": "Anime naruto", "poster": "https://img.test/naruto.jpg" })
    );
}

#[tokio::test]
async fn anime_info_strips_tracker_ids() {
    let upstream = Arc::new(CannedUpstream {
        about: Some(json!({
            "anime": {
                "info": {
                    "id": "one-piece-100",
                    "name": "One Piece",
                    "poster": "https://img.test/op.jpg",
                    "anilistId": 21,
                    "malId": 21
                },
                "moreInfo": { "genres": ["Action"] }
            },
            "seasons": [ { "id": "one-piece-100", "title": "One Piece" } ],
            "relatedAnimes": [ summary("related") ]
        })),
        ..Default::default()
    });
    let app = router_with(upstream);

    let (status, body) = get_json(app, "/anime-info?animeId=one-piece-100").await;
    assert_eq!(status, StatusCode::OK);

    let info = &body["anime"]["info"];
    assert_eq!(info["id"], "one-piece-100");
    assert!(info.get("anilistId").is_none());
    assert!(info.get("malId").is_none());
    assert!(body["seasons"].is_array());
    // Only the anime + seasons halves are forwarded.
    assert!(body.get("relatedAnimes").is_none());
}

#[tokio::test]
async fn basic_info_reduces_to_a_summary() {
    let upstream = Arc::new(CannedUpstream {
        about: Some(json!({
            "anime": {
                "info": {
                    "id": "frieren",
                    "name": "Frieren",
                    "poster": "https://img.test/frieren.jpg",
                    "description": "very long"
                }
            },
            "seasons": []
        })),
        ..Default::default()
    });
    let app = router_with(upstream.clone());

    let (status, body) = get_json(app.clone(), "/basic-info?animeId=frieren").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "id": "frieren", "name": "Frieren", "poster": "https://img.test/frieren.jpg" })
    );

    let _ = get_json(app, "/basic-info?animeId=frieren").await;
    assert_eq!(upstream.about_calls.load(Ordering::SeqCst), 1, "second hit must come from cache");
}

#[tokio::test]
async fn episodes_list_normalizes_ids_and_skips_unusable_ones() {
    use ani_gateway::upstream::RawEpisode;

    let upstream = Arc::new(CannedUpstream {
        episodes: Some(RawEpisodeList {
            total_episodes: 3,
            episodes: vec![
                RawEpisode {
                    title: Some("Romance Dawn".to_string()),
                    episode_id: "one-piece-100?ep=2142".to_string(),
                    number: Some(1),
                    is_filler: false,
                },
                RawEpisode {
                    title: Some("Broken".to_string()),
                    episode_id: "no-digits-here".to_string(),
                    number: Some(2),
                    is_filler: false,
                },
                RawEpisode {
                    title: None,
                    episode_id: "one-piece-100?ep=2143".to_string(),
                    number: Some(3),
                    is_filler: true,
                },
            ],
        }),
        ..Default::default()
    });
    let app = router_with(upstream);

    let (status, body) = get_json(app, "/episodes-list?animeId=one-piece-100").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalEpisodes"], 3);

    let episodes = body["episodes"].as_array().expect("episodes array");
    assert_eq!(episodes.len(), 2, "the unusable id is skipped");
    assert_eq!(episodes[0]["episodeId"], 2142);
    assert_eq!(episodes[0]["title"], "Romance Dawn");
    assert_eq!(episodes[1]["episodeId"], 2143);
    assert_eq!(episodes[1]["isFiller"], true);
}

#[tokio::test]
async fn episode_servers_filters_the_blocklist() {
    use ani_gateway::upstream::RawServerEntry;

    let entry = |name: &str| RawServerEntry {
        server_name: name.to_string(),
    };
    let upstream = Arc::new(CannedUpstream {
        servers: Some(RawEpisodeServers {
            sub: vec![entry("hd-1"), entry("streamsb"), entry("megacloud")],
            dub: vec![entry("streamtape"), entry("hd-2")],
        }),
        ..Default::default()
    });
    let app = router_with(upstream);

    let (status, body) = get_json(app, "/episode-servers?animeId=one-piece-100&episodeId=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "sub": ["hd-1", "megacloud"], "dub": ["hd-2"] }));
}

#[tokio::test]
async fn invalid_episode_id_is_rejected_before_any_upstream_call() {
    let upstream = Arc::new(CannedUpstream::default());
    let app = router_with(upstream.clone());

    let (status, body) =
        get_json(app, "/episode-server-sources?animeId=one-piece-100&episodeId=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("episodeId"));
    assert_eq!(upstream.discovery_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn discovery_failure_maps_to_bad_gateway() {
    let upstream = Arc::new(CannedUpstream::default()); // servers: None -> discovery fails
    let app = router_with(upstream);

    let (status, body) =
        get_json(app, "/episode-server-sources?animeId=one-piece-100&episodeId=5").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("upstream unavailable"));
}

#[tokio::test]
async fn blocklisted_server_is_reported_unknown() {
    let app = router_with(Arc::new(CannedUpstream::default()));

    let (status, body) = get_json(
        app,
        "/episode-sources-from-server?animeId=x&episodeId=5&serverName=streamsb&type=sub",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown server \"streamsb\"");
}

#[tokio::test]
async fn single_server_endpoint_validates_the_track_type() {
    let app = router_with(Arc::new(CannedUpstream::default()));

    let (status, _) = get_json(
        app.clone(),
        "/episode-sources-from-server?animeId=x&episodeId=5&serverName=hd-1&type=raw",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get_json(
        app,
        "/episode-sources-from-server?animeId=x&episodeId=5&serverName=hd-1&type=sub",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["serverName"], "hd-1");
    assert_eq!(body["captions"][0]["label"], "English");
}

#[tokio::test]
async fn by_genres_passes_the_upstream_payload_through() {
    let upstream = Arc::new(CannedUpstream {
        genre: Some(json!({ "genreName": "Action", "animes": [summary("a")] })),
        ..Default::default()
    });
    let app = router_with(upstream);

    let (status, body) = get_json(app, "/by-genres?genre=Action").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["genreName"], "Action");
    assert_eq!(body["animes"][0]["rank"], 3, "passthrough keeps upstream fields");
}

#[tokio::test]
async fn missing_required_params_are_bad_requests() {
    let app = router_with(Arc::new(CannedUpstream::default()));

    let (status, _) = get_json(app.clone(), "/anime-info").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(app, "/episode-servers?animeId=x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
