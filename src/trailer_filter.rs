//! Trailer detection
//!
//! Promotional items (trailers, previews, "coming soon" teasers) share a
//! show's episode listing with real content and must never reach a store.

use crate::config::Settings;
use crate::episode::RawEpisode;
use tracing::debug;

/// Predicate classifying catalog records as trailers
#[derive(Debug, Clone, Default)]
pub struct TrailerFilter {
    /// Lowercased title keywords, in configuration order
    keywords: Vec<String>,
    /// Records known to be shorter than this are trailers
    min_duration_ms: Option<u64>,
}

impl TrailerFilter {
    /// Creates a keyword-only filter.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            min_duration_ms: None,
        }
    }

    /// Builds the filter described by the settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.trailer_keywords).with_min_duration(settings.min_episode_duration_ms)
    }

    /// Additionally treats records shorter than `min_duration_ms` as trailers.
    pub fn with_min_duration(mut self, min_duration_ms: Option<u64>) -> Self {
        self.min_duration_ms = min_duration_ms;
        self
    }

    /// Returns true if the record must be excluded.
    ///
    /// A missing record is excluded as well.
    pub fn is_trailer(&self, raw: Option<&RawEpisode>) -> bool {
        let Some(raw) = raw else {
            debug!("excluding invalid catalog record");
            return true;
        };

        let title = raw.name.as_deref().unwrap_or_default().to_lowercase();
        if let Some(keyword) = self.keywords.iter().find(|k| title.contains(k.as_str())) {
            debug!(title = raw.display_title(), keyword = %keyword, "filtering trailer");
            return true;
        }

        match (self.min_duration_ms, raw.duration_ms) {
            (Some(min), Some(duration)) if duration < min => {
                debug!(
                    title = raw.display_title(),
                    duration_ms = duration,
                    "filtering short item"
                );
                true
            }
            _ => false,
        }
    }
}
