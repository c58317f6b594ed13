//! New episode detection
//!
//! Fetches the latest episodes of each configured show, drops trailers and
//! compares the remainder against the local store to find what is new.
//! Failures here never abort a run: a show that cannot be fetched or a store
//! that cannot be read simply yields nothing for that series.

use crate::ProgressEvent;
use crate::catalog::CatalogClient;
use crate::config::ShowEntry;
use crate::episode::{Episode, RawEpisode};
use crate::store::EpisodeStore;
use crate::trailer_filter::TrailerFilter;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Length of a catalog show identifier
pub const SHOW_ID_LENGTH: usize = 22;

/// Default number of episodes requested per show
pub const DEFAULT_FETCH_LIMIT: usize = 50;

/// Returns true if `show_id` has the shape of a catalog show identifier.
pub fn is_valid_show_id(show_id: &str) -> bool {
    show_id.len() == SHOW_ID_LENGTH && show_id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// New episodes found for one series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDetection {
    pub series: String,
    pub episodes: Vec<RawEpisode>,
}

/// Detects episodes present in the catalog but not yet in the store
pub struct Detector<C> {
    client: C,
    filter: TrailerFilter,
    store: EpisodeStore,
    fetch_limit: usize,
}

impl<C> Detector<C>
where
    C: CatalogClient,
{
    /// Creates a detector fetching through `client`.
    pub fn new(client: C, filter: TrailerFilter, store: EpisodeStore) -> Self {
        Self {
            client,
            filter,
            store,
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }

    /// Sets the number of episodes requested per show.
    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit;
        self
    }

    /// Fetches a show's episodes and drops trailers.
    ///
    /// Malformed show ids and catalog errors yield an empty list; the error
    /// is logged.
    pub fn fetch_show_episodes(&self, show_id: &str, limit: usize) -> Vec<RawEpisode> {
        if !is_valid_show_id(show_id) {
            warn!(show_id = %show_id, "invalid show id format, skipping fetch");
            return Vec::new();
        }

        debug!(show_id = %show_id, limit, "fetching episodes");

        let page = match self.client.fetch_episodes(show_id, limit) {
            Ok(page) => page,
            Err(e) => {
                warn!(show_id = %show_id, error = %e, "failed to fetch episodes");
                return Vec::new();
            }
        };

        let total = page.len();
        let episodes: Vec<RawEpisode> = page
            .into_iter()
            .filter(|raw| !self.filter.is_trailer(raw.as_ref()))
            .flatten()
            .collect();

        info!(
            show_id = %show_id,
            kept = episodes.len(),
            filtered = total - episodes.len(),
            "fetched episodes"
        );

        episodes
    }

    /// Loads the stored episodes of a series.
    ///
    /// A missing file means the series was never synced and yields an empty
    /// list, as does an unreadable or malformed file (with a warning).
    pub fn load_existing(&self, series: &str) -> Vec<Episode> {
        match self.store.load(series) {
            Ok(Some(document)) => {
                debug!(
                    series = %series,
                    count = document.episodes.len(),
                    "loaded existing episodes"
                );
                document.episodes
            }
            Ok(None) => {
                debug!(series = %series, "no store file yet");
                Vec::new()
            }
            Err(e) => {
                warn!(series = %series, error = %e, "treating unreadable store as empty");
                Vec::new()
            }
        }
    }

    /// Returns the fetched records whose identity key is not yet stored.
    ///
    /// Fetch order is preserved. Records without a usable key are skipped. If
    /// the same key occurs twice in `fetched`, the later record replaces the
    /// earlier one in place.
    pub fn find_new(&self, fetched: &[RawEpisode], existing: &[Episode]) -> Vec<RawEpisode> {
        let existing_keys: HashSet<&str> =
            existing.iter().filter_map(Episode::identity_key).collect();

        let mut new_episodes: Vec<RawEpisode> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();

        for raw in fetched {
            let Some(key) = raw.identity_key() else {
                warn!(title = raw.display_title(), "skipping record without identifier");
                continue;
            };

            if existing_keys.contains(key) {
                continue;
            }

            match positions.get(key) {
                Some(&index) => new_episodes[index] = raw.clone(),
                None => {
                    debug!(title = raw.display_title(), key = %key, "new episode found");
                    positions.insert(key, new_episodes.len());
                    new_episodes.push(raw.clone());
                }
            }
        }

        new_episodes
    }

    /// Runs fetch, load and diff for a single series.
    pub fn check_series(&self, series: &str, show_id: &str) -> Vec<RawEpisode> {
        let fetched = self.fetch_show_episodes(show_id, self.fetch_limit);
        let existing = self.load_existing(series);
        self.find_new(&fetched, &existing)
    }

    /// Checks every configured show, in configuration order.
    ///
    /// Only series with at least one new episode appear in the result.
    pub fn check_all_series<F>(&self, shows: &[ShowEntry], progress: &mut F) -> Vec<SeriesDetection>
    where
        F: FnMut(ProgressEvent),
    {
        let mut detections = Vec::new();

        for (index, show) in shows.iter().enumerate() {
            progress(ProgressEvent::CheckingSeries {
                index,
                total: shows.len(),
                series: show.series.clone(),
            });

            let episodes = self.check_series(&show.series, &show.show_id);

            progress(ProgressEvent::SeriesChecked {
                series: show.series.clone(),
                new_count: episodes.len(),
                titles: episodes
                    .iter()
                    .map(|e| e.display_title().to_string())
                    .collect(),
            });

            if !episodes.is_empty() {
                detections.push(SeriesDetection {
                    series: show.series.clone(),
                    episodes,
                });
            }
        }

        detections
    }
}
