//! Offline catalog implementation
//!
//! Serves episode pages recorded on disk, one `<show_id>.json` file per show
//! in the same shape the Spotify episode listing uses. This lets the whole
//! pipeline run without network access or credentials.

use super::spotify_types::{EpisodesResponse, into_page};
use super::{CatalogClient, CatalogError, EpisodePage};
use std::fs;
use std::path::PathBuf;

/// A catalog backed by a directory of recorded episode pages
pub struct FixtureCatalog {
    directory: PathBuf,
}

impl FixtureCatalog {
    /// Creates a catalog reading pages from `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

impl CatalogClient for FixtureCatalog {
    fn fetch_episodes(&self, show_id: &str, limit: usize) -> Result<EpisodePage, CatalogError> {
        let path = self.directory.join(format!("{show_id}.json"));

        if !path.exists() {
            return Err(CatalogError::ShowNotFound(show_id.to_string()));
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| CatalogError::RequestError(format!("{}: {}", path.display(), e)))?;

        let body: EpisodesResponse = serde_json::from_str(content.trim_start_matches('\u{feff}'))
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;

        let mut items = body.items.ok_or_else(|| {
            CatalogError::InvalidData(format!("No items in {}", path.display()))
        })?;
        items.truncate(limit);

        Ok(into_page(items))
    }
}
