//! Podcast catalog access
//!
//! This module defines the [`CatalogClient`] trait the detector consumes,
//! along with a Spotify Web API implementation and an offline implementation
//! that serves recorded pages from disk.

mod fixture;
mod spotify;
mod spotify_types;

pub use fixture::FixtureCatalog;
pub use spotify::{SpotifyClient, TokenCache};

use crate::episode::RawEpisode;
use thiserror::Error;

/// Prefix of the player embed URL an episode id is appended to
pub const DEFAULT_EMBED_BASE_URL: &str = "https://open.spotify.com/embed/episode";

/// Errors that can occur while talking to the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Token exchange with the authorization service failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Request to the catalog failed
    #[error("Request failed: {0}")]
    RequestError(String),

    /// Failed to parse the catalog's JSON response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// The requested show was not found
    #[error("Show not found: {0}")]
    ShowNotFound(String),

    /// The catalog returned invalid or unexpected data
    #[error("API returned invalid data: {0}")]
    InvalidData(String),
}

/// One page of catalog records.
///
/// Entries are `None` when the catalog sent something that is not a usable
/// episode record (a `null` item or an object of the wrong shape).
pub type EpisodePage = Vec<Option<RawEpisode>>;

/// Trait for catalogs that can list the episodes of a show.
///
/// Implementors own their credential lifecycle; callers only see records or
/// an error.
pub trait CatalogClient {
    /// Fetches up to `limit` of the most recent episodes of a show.
    ///
    /// # Arguments
    ///
    /// * `show_id` - The catalog identifier of the show
    /// * `limit` - Maximum number of records to request
    ///
    /// # Returns
    ///
    /// The page of records in catalog order, or a CatalogError
    fn fetch_episodes(&self, show_id: &str, limit: usize) -> Result<EpisodePage, CatalogError>;
}

impl<C> CatalogClient for &C
where
    C: CatalogClient + ?Sized,
{
    fn fetch_episodes(&self, show_id: &str, limit: usize) -> Result<EpisodePage, CatalogError> {
        (**self).fetch_episodes(show_id, limit)
    }
}

impl<C> CatalogClient for Box<C>
where
    C: CatalogClient + ?Sized,
{
    fn fetch_episodes(&self, show_id: &str, limit: usize) -> Result<EpisodePage, CatalogError> {
        (**self).fetch_episodes(show_id, limit)
    }
}
