//! Episode records
//!
//! This module defines the two shapes an episode takes while moving through
//! the pipeline: the loosely typed [`RawEpisode`] as delivered by the catalog,
//! and the canonical [`Episode`] persisted in the per-series store files.
//! Both sides share one notion of identity, see [`RawEpisode::identity_key`]
//! and [`Episode::identity_key`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised when a persisted episode fails shape validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EpisodeError {
    /// The episode title is empty
    #[error("episode #{episode_number} has an empty title")]
    EmptyTitle { episode_number: u32 },

    /// Episode numbers start at 1
    #[error("episode '{title}' has episode number 0")]
    ZeroEpisodeNumber { title: String },
}

/// A raw episode record as returned by the catalog.
///
/// Only the fields the pipeline consumes are modelled; anything else the
/// catalog sends along is ignored during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEpisode {
    /// Catalog identifier of the episode
    pub id: Option<String>,
    /// Episode title
    pub name: Option<String>,
    /// Plain text or HTML description
    pub description: Option<String>,
    /// Release timestamp, usually `YYYY-MM-DD` or a full ISO-8601 timestamp
    pub release_date: Option<String>,
    /// Duration in milliseconds
    pub duration_ms: Option<u64>,
}

impl RawEpisode {
    /// Returns the identity key of this record, if it has a usable one.
    pub fn identity_key(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| is_valid_key(id))
    }

    /// Title used in log output
    pub fn display_title(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// A canonical episode as persisted in a series store file.
///
/// Field names on disk match the format consumed by the website, so the
/// embed URL, episode number and file path keep their legacy names. Unknown
/// fields found on disk are carried along in `extra` and written back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Episode title, never empty
    pub title: String,
    /// Cleaned description (no HTML, collapsed whitespace, at most 1000 chars)
    pub description: String,
    /// Release date as `DD-MM-YY`, or the raw value if it could not be parsed
    pub date: String,
    /// Duration as `M:SS` or `H:MM:SS`
    pub length: String,
    /// Player embed URL whose trailing path segment is the catalog identifier
    #[serde(rename = "spotify_embed_url")]
    pub embed_url: String,
    /// Series key from the configuration
    pub series: String,
    /// Sequential number within the series, starting at 1
    pub episode_number: u32,
    /// Legacy display path kept for older consumers of the data files
    pub file_path: String,
    /// Fields not known to this version, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Episode {
    /// Returns the identity key of this episode.
    ///
    /// The key is the trailing path segment of the embed URL, which is the
    /// catalog identifier the URL was built from.
    pub fn identity_key(&self) -> Option<&str> {
        let path = self.embed_url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/').next().filter(|segment| is_valid_key(segment))
    }

    /// Checks the invariants every persisted episode must satisfy.
    pub fn validate(&self) -> Result<(), EpisodeError> {
        if self.title.trim().is_empty() {
            return Err(EpisodeError::EmptyTitle {
                episode_number: self.episode_number,
            });
        }
        if self.episode_number == 0 {
            return Err(EpisodeError::ZeroEpisodeNumber {
                title: self.title.clone(),
            });
        }
        Ok(())
    }
}

/// Builds the embed URL for a catalog identifier.
pub fn embed_url(base_url: &str, id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), id)
}

/// A key must survive the round trip through an embed URL unchanged.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'))
}
