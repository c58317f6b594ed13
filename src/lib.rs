//! episode_sync - Keep podcast episode files in sync with the catalog
//!
//! This library fetches the episode listings of configured shows, filters out
//! trailers, works out which episodes are not yet stored locally, normalizes
//! them into the canonical episode shape and merges them into the per-series
//! JSON files, with backups and a dry-run mode.

mod catalog;
mod config;
mod detector;
mod episode;
mod formatter;
mod staged_write;
mod store;
mod trailer_filter;
mod updater;

use std::path::PathBuf;
use tracing::{error, info};

// Re-export error types
pub use catalog::CatalogError;
pub use config::ConfigError;
pub use episode::EpisodeError;
pub use formatter::{FieldError, FormatError};
pub use store::StoreError;

// Re-export pipeline types
pub use catalog::{
    CatalogClient, DEFAULT_EMBED_BASE_URL, EpisodePage, FixtureCatalog, SpotifyClient, TokenCache,
};
pub use config::{
    CatalogCredentials, Config, CorruptStorePolicy, DEFAULT_CONFIG_FILE, Settings, ShowEntry,
    default_config_path,
};
pub use detector::{Detector, SeriesDetection, is_valid_show_id};
pub use episode::{Episode, RawEpisode};
pub use formatter::{
    Formatter, clean_description, display_path, format_date, format_duration,
    next_episode_number,
};
pub use store::{EpisodeStore, SeriesStore};
pub use trailer_filter::TrailerFilter;
pub use updater::{
    MergeOutcome, UpdateRecord, UpdateSummary, Updater, UpdaterOptions, merge_episodes,
};

/// Progress event emitted during a synchronization run
///
/// These events allow library users to report progress and outcomes while
/// the diagnostics themselves go through `tracing`.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Run started
    Started {
        /// Target series, or `None` for all configured series
        series: Option<String>,
        dry_run: bool,
    },

    /// The requested series is not in the configuration
    UnknownSeries { series: String },

    /// Checking a series for new episodes
    CheckingSeries {
        index: usize,
        total: usize,
        series: String,
    },

    /// Detection for a series finished
    SeriesChecked {
        series: String,
        new_count: usize,
        titles: Vec<String>,
    },

    /// Formatting the new episodes of a series
    FormattingSeries {
        series: String,
        count: usize,
        first_number: u32,
    },

    /// Writing the store files
    UpdatingFiles { series_count: usize, dry_run: bool },

    /// A series store was updated (or would have been, in a dry run)
    SeriesUpdated { record: UpdateRecord },

    /// Updating a series failed
    SeriesFailed { series: String },

    /// Run complete
    Complete {
        new_episodes: usize,
        files_updated: usize,
        files_failed: usize,
    },
}

/// Switches controlling a synchronization run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Simulate the run without writing anything
    pub dry_run: bool,
    /// Back up store files before overwriting them
    pub backup_enabled: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup_enabled: true,
        }
    }
}

/// Outcome of a synchronization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// New episodes detected across all processed series
    pub new_episodes: usize,
    /// File updates performed by the updater
    pub updates: UpdateSummary,
    /// Series that failed, including an unknown requested series
    pub failed_series: Vec<String>,
}

impl SyncReport {
    /// True if no series failed
    pub fn success(&self) -> bool {
        self.failed_series.is_empty()
    }

    /// Paths of the store files that were (or would have been) written
    pub fn written_files(&self) -> Vec<PathBuf> {
        self.updates
            .updated_files
            .iter()
            .map(|record| record.file_path.clone())
            .collect()
    }
}

/// The components of one run, wired from the configuration
struct Pipeline<C> {
    detector: Detector<C>,
    formatter: Formatter,
    updater: Updater,
    dry_run: bool,
}

impl<C> Pipeline<C>
where
    C: CatalogClient,
{
    fn new(config: &Config, client: C, options: SyncOptions) -> Self {
        let settings = &config.settings;
        let store = EpisodeStore::new(settings.data_dir.clone(), settings.backup_dir.clone());

        let detector = Detector::new(
            client,
            TrailerFilter::from_settings(settings),
            store.clone(),
        )
        .with_fetch_limit(settings.fetch_limit);

        let updater = Updater::new(
            store,
            UpdaterOptions {
                backup_enabled: options.backup_enabled,
                dry_run: options.dry_run,
                corrupt_store_policy: settings.corrupt_store_policy,
            },
        );

        Self {
            detector,
            formatter: Formatter::new(settings.embed_base_url.clone()),
            updater,
            dry_run: options.dry_run,
        }
    }

    /// Formats and stores the detected episodes of every series.
    fn apply<F>(mut self, detections: Vec<SeriesDetection>, progress: &mut F) -> SyncReport
    where
        F: FnMut(ProgressEvent),
    {
        let new_episodes = detections.iter().map(|d| d.episodes.len()).sum();

        let mut batches = Vec::with_capacity(detections.len());
        for detection in detections {
            // Numbering continues from what is on disk right now
            let existing = self.detector.load_existing(&detection.series);

            let formatted =
                match self
                    .formatter
                    .format_batch(&detection.episodes, &detection.series, &existing)
                {
                    Ok(formatted) => formatted,
                    Err(e) => {
                        error!(series = %detection.series, error = %e, "cannot number new episodes");
                        self.updater.record_failure(&detection.series);
                        continue;
                    }
                };

            if let Some(first) = formatted.first() {
                progress(ProgressEvent::FormattingSeries {
                    series: detection.series.clone(),
                    count: formatted.len(),
                    first_number: first.episode_number,
                });
            }
            batches.push((detection.series, formatted));
        }

        if !batches.is_empty() {
            progress(ProgressEvent::UpdatingFiles {
                series_count: batches.len(),
                dry_run: self.dry_run,
            });
        }

        self.updater.update_all(batches);

        let updates = self.updater.summary();
        for record in &updates.updated_files {
            progress(ProgressEvent::SeriesUpdated {
                record: record.clone(),
            });
        }
        for series in &updates.failed_series {
            progress(ProgressEvent::SeriesFailed {
                series: series.clone(),
            });
        }

        let report = SyncReport {
            new_episodes,
            failed_series: updates.failed_series.clone(),
            updates,
        };

        info!(
            new_episodes = report.new_episodes,
            files_updated = report.updates.files_updated,
            files_failed = report.failed_series.len(),
            "synchronization finished"
        );

        progress(ProgressEvent::Complete {
            new_episodes: report.new_episodes,
            files_updated: report.updates.files_updated,
            files_failed: report.failed_series.len(),
        });

        report
    }
}

/// Synchronizes every configured series
///
/// Series are processed one at a time in configuration order. A series that
/// cannot be fetched contributes nothing; a series whose store cannot be
/// written is reported in [`SyncReport::failed_series`] while the others
/// continue.
///
/// # Arguments
///
/// * `config` - The loaded configuration
/// * `client` - The catalog to fetch episodes from
/// * `options` - Dry-run and backup switches
/// * `progress_callback` - Closure called with progress events (can be empty for silent operation)
///
/// # Examples
///
/// ```no_run
/// use episode_sync::{Config, FixtureCatalog, SyncOptions, sync_all_series};
/// use std::path::Path;
///
/// let config = Config::load(Path::new("episode_detector_config.json"), false).unwrap();
/// let report = sync_all_series(
///     &config,
///     FixtureCatalog::new("fixtures"),
///     SyncOptions { dry_run: true, ..Default::default() },
///     |_| {}, // Ignore all progress events
/// );
/// println!("{} new episodes", report.new_episodes);
/// ```
pub fn sync_all_series<C, F>(
    config: &Config,
    client: C,
    options: SyncOptions,
    mut progress_callback: F,
) -> SyncReport
where
    C: CatalogClient,
    F: FnMut(ProgressEvent),
{
    progress_callback(ProgressEvent::Started {
        series: None,
        dry_run: options.dry_run,
    });

    let pipeline = Pipeline::new(config, client, options);
    let detections = pipeline
        .detector
        .check_all_series(&config.shows, &mut progress_callback);

    pipeline.apply(detections, &mut progress_callback)
}

/// Synchronizes a single configured series
///
/// An unknown series key fails the run without touching anything.
pub fn sync_single_series<C, F>(
    config: &Config,
    client: C,
    series: &str,
    options: SyncOptions,
    mut progress_callback: F,
) -> SyncReport
where
    C: CatalogClient,
    F: FnMut(ProgressEvent),
{
    progress_callback(ProgressEvent::Started {
        series: Some(series.to_string()),
        dry_run: options.dry_run,
    });

    let Some(show_id) = config.show_id(series) else {
        progress_callback(ProgressEvent::UnknownSeries {
            series: series.to_string(),
        });
        progress_callback(ProgressEvent::Complete {
            new_episodes: 0,
            files_updated: 0,
            files_failed: 1,
        });
        return SyncReport {
            new_episodes: 0,
            updates: UpdateSummary {
                files_processed: 0,
                files_updated: 0,
                failed_series: Vec::new(),
                updated_files: Vec::new(),
                dry_run: options.dry_run,
            },
            failed_series: vec![series.to_string()],
        };
    };

    let pipeline = Pipeline::new(config, client, options);

    progress_callback(ProgressEvent::CheckingSeries {
        index: 0,
        total: 1,
        series: series.to_string(),
    });

    let episodes = pipeline.detector.check_series(series, show_id);

    progress_callback(ProgressEvent::SeriesChecked {
        series: series.to_string(),
        new_count: episodes.len(),
        titles: episodes
            .iter()
            .map(|e| e.display_title().to_string())
            .collect(),
    });

    let detections = if episodes.is_empty() {
        Vec::new()
    } else {
        vec![SeriesDetection {
            series: series.to_string(),
            episodes,
        }]
    };

    pipeline.apply(detections, &mut progress_callback)
}
