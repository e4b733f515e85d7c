//! Episode source aggregation.
//!
//! The orchestrator behind `/episode-server-sources`: resolve the episode's
//! server names through the long-lived cache tier, fan out per-server fetches
//! for the sub track, then for the dub track, and patch empty dub caption
//! lists from the same-named sub entry. Sub always runs to completion before
//! dub starts; the fallback depends on it.

use std::collections::HashMap;

use futures::future::join_all;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::cache::{self, keys, ttl, CacheStore};
use crate::episode::EpisodeRef;
use crate::upstream::{CaptionTrack, MediaSource, RawEpisodeSources, SourceClient, TimeSpan,
    TrackKind, UpstreamError};

/// Providers that still show up in discovery but consistently serve dead
/// streams. Names are compared case-insensitively.
const BLOCKED_SERVERS: [&str; 2] = ["streamsb", "streamtape"];

pub fn is_blocked_server(name: &str) -> bool {
    BLOCKED_SERVERS.iter().any(|b| b.eq_ignore_ascii_case(name))
}

/// Server names that can stream one episode, as discovered upstream.
/// Cached unfiltered; the blocklist is applied when the lists are read back,
/// so a blocklist change never requires a cache flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerNames {
    pub sub: Vec<String>,
    pub dub: Vec<String>,
}

/// Streams plus captions for one (server, track type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSourceSet {
    pub server_name: String,
    pub sources: Vec<MediaSource>,
    pub captions: Vec<CaptionTrack>,
    pub intro: Option<TimeSpan>,
    pub outro: Option<TimeSpan>,
}

/// Everything a player needs for one episode, per track type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSourceResponse {
    pub sub: Vec<ServerSourceSet>,
    pub dub: Vec<ServerSourceSet>,
}

/// Server-name lists for an episode, through the 30-day cache tier.
/// Discovery failure is fatal for the caller; nothing can be played without
/// the names.
pub async fn resolve_server_names(
    upstream: &dyn SourceClient,
    cache: &dyn CacheStore,
    ep: &EpisodeRef,
) -> Result<ServerNames, UpstreamError> {
    cache::fetch_cached(cache, &keys::server_names(ep), ttl::SERVER_NAMES, || async {
        let raw = upstream.episode_servers(ep).await?;
        Ok(ServerNames {
            sub: raw.sub.into_iter().map(|s| s.server_name).collect(),
            dub: raw.dub.into_iter().map(|s| s.server_name).collect(),
        })
    })
    .await
}

/// Drop blocklisted names from a discovery result.
pub fn strip_blocked(names: ServerNames) -> ServerNames {
    ServerNames {
        sub: names.sub.into_iter().filter(|n| !is_blocked_server(n)).collect(),
        dub: names.dub.into_iter().filter(|n| !is_blocked_server(n)).collect(),
    }
}

/// Produce the full per-server source listing for one episode.
///
/// Only the server-name list is cached. The resolved bundles carry signed,
/// short-lived stream URLs; caching those would serve dead links on every
/// hit until expiry.
pub async fn resolve_episode_sources(
    upstream: &dyn SourceClient,
    cache: &dyn CacheStore,
    ep: &EpisodeRef,
) -> Result<EpisodeSourceResponse, UpstreamError> {
    ensure_metrics_described();

    let names = resolve_server_names(upstream, cache, ep).await?;

    // Sub phase first; its captions feed the dub fallback below.
    let sub = fetch_track(upstream, ep, TrackKind::Sub, &names.sub).await;

    let mut sub_captions: HashMap<&str, &[CaptionTrack]> = HashMap::new();
    for set in &sub {
        if !set.captions.is_empty() {
            sub_captions.insert(set.server_name.as_str(), &set.captions);
        }
    }

    let mut dub = fetch_track(upstream, ep, TrackKind::Dub, &names.dub).await;
    for set in &mut dub {
        // Providers often publish captions only on their sub track and leave
        // the dub call empty; borrow them when that happens. Never the other
        // way around, and never over non-empty dub captions.
        if set.captions.is_empty() {
            if let Some(caps) = sub_captions.get(set.server_name.as_str()) {
                set.captions = caps.to_vec();
                counter!("caption_fallbacks_total").increment(1);
            }
        }
    }

    Ok(EpisodeSourceResponse { sub, dub })
}

/// Resolve a single named server directly, as used by the player once the
/// user has picked a server. Dub requests with no captions get one
/// best-effort sub lookup for the same server before giving up.
pub async fn resolve_single_server(
    upstream: &dyn SourceClient,
    ep: &EpisodeRef,
    server_name: &str,
    track: TrackKind,
) -> Result<ServerSourceSet, UpstreamError> {
    ensure_metrics_described();

    let raw = upstream.episode_sources(ep, server_name, track).await?;
    let mut set = to_source_set(server_name, raw);

    if track == TrackKind::Dub && set.captions.is_empty() {
        match upstream.episode_sources(ep, server_name, TrackKind::Sub).await {
            Ok(sub_raw) => {
                let sub_set = to_source_set(server_name, sub_raw);
                if !sub_set.captions.is_empty() {
                    set.captions = sub_set.captions;
                    counter!("caption_fallbacks_total").increment(1);
                }
            }
            Err(e) => {
                tracing::warn!(error = ?e, server = %server_name, "sub caption lookup failed");
            }
        }
    }

    Ok(set)
}

/// Fan out over one track type's servers, skipping blocklisted names.
/// Calls are concurrent and independent; a failure is logged and that server
/// omitted, never aborting the rest. Results come back in discovery order.
async fn fetch_track(
    upstream: &dyn SourceClient,
    ep: &EpisodeRef,
    track: TrackKind,
    names: &[String],
) -> Vec<ServerSourceSet> {
    let calls = names
        .iter()
        .filter(|name| !is_blocked_server(name))
        .map(|name| async move {
            match upstream.episode_sources(ep, name, track).await {
                Ok(raw) => Some(to_source_set(name, raw)),
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        server = %name,
                        track = track.as_str(),
                        "source fetch failed; omitting server"
                    );
                    counter!("source_fetch_failures_total").increment(1);
                    None
                }
            }
        });

    join_all(calls).await.into_iter().flatten().collect()
}

fn to_source_set(server_name: &str, raw: RawEpisodeSources) -> ServerSourceSet {
    let captions = raw
        .tracks
        .into_iter()
        .filter(|t| t.kind == "captions")
        .collect();
    ServerSourceSet {
        server_name: server_name.to_string(),
        sources: raw.sources,
        captions,
        intro: raw.intro,
        outro: raw.outro,
    }
}

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "source_fetch_failures_total",
            "Per-server source fetches that failed and were omitted."
        );
        describe_counter!(
            "caption_fallbacks_total",
            "Dub entries that borrowed captions from the same-named sub entry."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocklist_is_case_insensitive() {
        assert!(is_blocked_server("streamsb"));
        assert!(is_blocked_server("StreamSB"));
        assert!(is_blocked_server("STREAMTAPE"));
        assert!(!is_blocked_server("hd-1"));
        assert!(!is_blocked_server("megacloud"));
    }

    #[test]
    fn strip_blocked_filters_both_lists() {
        let names = ServerNames {
            sub: vec!["hd-1".into(), "StreamSB".into(), "megacloud".into()],
            dub: vec!["streamtape".into(), "hd-2".into()],
        };
        let out = strip_blocked(names);
        assert_eq!(out.sub, vec!["hd-1".to_string(), "megacloud".to_string()]);
        assert_eq!(out.dub, vec!["hd-2".to_string()]);
    }

    #[test]
    fn source_sets_keep_only_caption_tracks() {
        let raw = RawEpisodeSources {
            sources: vec![MediaSource {
                url: "https://cdn.test/ep.m3u8".into(),
                kind: Some("hls".into()),
            }],
            tracks: vec![
                CaptionTrack {
                    file: "https://cdn.test/en.vtt".into(),
                    label: "English".into(),
                    kind: "captions".into(),
                },
                CaptionTrack {
                    file: "https://cdn.test/thumbs.vtt".into(),
                    label: String::new(),
                    kind: "thumbnails".into(),
                },
            ],
            intro: Some(TimeSpan { start: 5, end: 90 }),
            outro: None,
        };
        let set = to_source_set("hd-1", raw);
        assert_eq!(set.server_name, "hd-1");
        assert_eq!(set.sources.len(), 1);
        assert_eq!(set.captions.len(), 1);
        assert_eq!(set.captions[0].label, "English");
        assert_eq!(set.intro, Some(TimeSpan { start: 5, end: 90 }));
    }
}
