/// Spotify Web API response types for deserialization.
///
/// These structures mirror the JSON response format of the endpoints used.
use super::EpisodePage;
use crate::episode::RawEpisode;
use serde::Deserialize;
use serde_json::Value;

/// Response of the client-credentials token endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    /// Lifetime of the token in seconds
    pub expires_in: u64,
}

/// Response of `GET /shows/{id}/episodes`.
///
/// Items are kept as raw JSON so a single odd entry does not reject the
/// whole page.
#[derive(Debug, Deserialize)]
pub(super) struct EpisodesResponse {
    pub items: Option<Vec<Value>>,
}

/// Converts page items into records, mapping unusable entries to `None`.
pub(super) fn into_page(items: Vec<Value>) -> EpisodePage {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(_) => serde_json::from_value::<RawEpisode>(item).ok(),
            _ => None,
        })
        .collect()
}
