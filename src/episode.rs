//! Episode identifier normalization.
//!
//! Clients and the upstream disagree about what an "episode id" is: the
//! upstream embeds it as an `ep=` query fragment on the anime id, clients
//! sometimes send the bare number and sometimes the full embedded form, and
//! scraped pages occasionally leak extra noise around the digits. Every
//! request-time identifier is normalized to a positive episode number here,
//! before any cache lookup or upstream call.

use once_cell::sync::OnceCell;
use regex::Regex;
use thiserror::Error;

/// Rejection for episode identifiers that cannot be normalized. Raised
/// before any I/O; mapped to a 400 at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("episodeId {0:?} contains no episode number")]
    NoDigits(String),
    #[error("episodeId {0:?} is not a valid episode number")]
    OutOfRange(String),
}

/// Canonical reference to one episode of one anime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRef {
    pub anime_id: String,
    pub episode: u32,
}

impl EpisodeRef {
    /// Build a reference from an anime id and a raw episode identifier in
    /// any of the accepted forms.
    pub fn parse(anime_id: &str, raw_episode: &str) -> Result<Self, IdentifierError> {
        Ok(Self {
            anime_id: anime_id.to_string(),
            episode: parse_episode_number(raw_episode)?,
        })
    }

    /// The upstream's embedded form, e.g. `one-piece-100?ep=5`.
    pub fn upstream_param(&self) -> String {
        format!("{}?ep={}", self.anime_id, self.episode)
    }
}

/// Normalize a raw episode identifier to its episode number.
///
/// Digits following an `ep=` marker win; otherwise all non-digit characters
/// are stripped and the remainder parsed. Idempotent: feeding a canonical
/// number back in yields the same value.
pub fn parse_episode_number(raw: &str) -> Result<u32, IdentifierError> {
    static RE_EP: OnceCell<Regex> = OnceCell::new();
    let re_ep = RE_EP.get_or_init(|| Regex::new(r"(?i)ep=(\d+)").unwrap());

    let digits: String = match re_ep.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.chars().filter(|c| c.is_ascii_digit()).collect(),
    };

    if digits.is_empty() {
        return Err(IdentifierError::NoDigits(raw.to_string()));
    }
    let number: u32 = digits
        .parse()
        .map_err(|_| IdentifierError::OutOfRange(raw.to_string()))?;
    if number == 0 {
        return Err(IdentifierError::OutOfRange(raw.to_string()));
    }
    Ok(number)
}
