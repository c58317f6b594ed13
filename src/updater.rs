//! Store updates
//!
//! Merges freshly formatted episodes into the series store files. Existing
//! files are backed up before they are overwritten, and a dry run performs
//! every step except touching the filesystem.

use crate::config::CorruptStorePolicy;
use crate::episode::Episode;
use crate::store::{EpisodeStore, SeriesStore};
use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Options controlling how the updater touches the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdaterOptions {
    /// Copy existing store files to the backup directory before overwriting
    pub backup_enabled: bool,
    /// Compute and report everything, write nothing
    pub dry_run: bool,
    /// Handling of store files that exist but cannot be parsed
    pub corrupt_store_policy: CorruptStorePolicy,
}

impl Default for UpdaterOptions {
    fn default() -> Self {
        Self {
            backup_enabled: true,
            dry_run: false,
            corrupt_store_policy: CorruptStorePolicy::default(),
        }
    }
}

/// Outcome of a successful series update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    pub series: String,
    pub file_path: PathBuf,
    /// Backup taken (or, in a dry run, the one that would have been taken)
    pub backup_path: Option<PathBuf>,
    /// Episodes handed to the updater
    pub new_episodes: usize,
    /// Episodes actually added after deduplication
    pub added_episodes: usize,
    /// Episodes in the store after the merge
    pub total_episodes: usize,
}

/// Aggregate view over all updates of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub files_processed: usize,
    /// Series whose store was written (or would have been, in a dry run)
    pub files_updated: usize,
    pub failed_series: Vec<String>,
    pub updated_files: Vec<UpdateRecord>,
    pub dry_run: bool,
}

/// Result of merging new episodes into an existing list
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Merged list, sorted by episode number, highest first
    pub episodes: Vec<Episode>,
    pub added: usize,
    pub duplicates: usize,
    pub unkeyed: usize,
}

/// Merges `new_episodes` into `existing`.
///
/// Existing episodes are kept unchanged. New episodes whose identity key is
/// already stored are dropped, as are new episodes without a key. Within
/// `new_episodes` a later entry replaces an earlier one with the same key.
pub fn merge_episodes(existing: Vec<Episode>, new_episodes: Vec<Episode>) -> MergeOutcome {
    let existing_keys: HashSet<String> = existing
        .iter()
        .filter_map(|e| e.identity_key().map(str::to_string))
        .collect();

    let mut unique: Vec<Episode> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut duplicates = 0;
    let mut unkeyed = 0;

    for episode in new_episodes {
        let Some(key) = episode.identity_key().map(str::to_string) else {
            warn!(title = %episode.title, "dropping episode without identifier");
            unkeyed += 1;
            continue;
        };

        if existing_keys.contains(&key) {
            debug!(title = %episode.title, key = %key, "skipping duplicate episode");
            duplicates += 1;
            continue;
        }

        match positions.get(&key) {
            Some(&index) => {
                duplicates += 1;
                unique[index] = episode;
            }
            None => {
                positions.insert(key, unique.len());
                unique.push(episode);
            }
        }
    }

    let added = unique.len();
    let mut episodes = existing;
    episodes.extend(unique);
    episodes.sort_by(|a, b| b.episode_number.cmp(&a.episode_number));

    MergeOutcome {
        episodes,
        added,
        duplicates,
        unkeyed,
    }
}

/// Applies formatted episodes to the series store files
pub struct Updater {
    store: EpisodeStore,
    options: UpdaterOptions,
    sync_time: DateTime<Local>,
    files_processed: usize,
    updated_files: Vec<UpdateRecord>,
    failed_series: Vec<String>,
}

impl Updater {
    /// Creates an updater; backups are stamped with the current time.
    pub fn new(store: EpisodeStore, options: UpdaterOptions) -> Self {
        Self {
            store,
            options,
            sync_time: Local::now(),
            files_processed: 0,
            updated_files: Vec::new(),
            failed_series: Vec::new(),
        }
    }

    /// Overrides the timestamp used in backup file names.
    pub fn with_sync_time(mut self, sync_time: DateTime<Local>) -> Self {
        self.sync_time = sync_time;
        self
    }

    /// Loads the current document, applying the corrupt store policy.
    fn load_current(&self, series: &str) -> Option<SeriesStore> {
        match self.store.load(series) {
            Ok(document) => Some(document.unwrap_or_default()),
            Err(e)
                if e.is_corrupt()
                    && self.options.corrupt_store_policy == CorruptStorePolicy::Reset =>
            {
                warn!(series = %series, error = %e, "resetting corrupt store");
                Some(SeriesStore::default())
            }
            Err(e) => {
                error!(series = %series, error = %e, "refusing to update unreadable store");
                None
            }
        }
    }

    /// Takes the backup for a series, if one is due.
    ///
    /// Failure to back up is logged and does not stop the update.
    fn backup(&self, series: &str) -> Option<PathBuf> {
        if !self.options.backup_enabled || !self.store.exists(series) {
            return None;
        }

        if self.options.dry_run {
            let path = self.store.backup_path_for(series, self.sync_time);
            debug!(series = %series, backup = %path.display(), "dry run, would back up");
            return Some(path);
        }

        match self.store.backup(series, self.sync_time) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(series = %series, error = %e, "backup failed, continuing without");
                None
            }
        }
    }

    /// Merges new episodes into the store of one series.
    ///
    /// # Returns
    ///
    /// `true` on success, including when there was nothing to add. `false`
    /// if the store could not be read or written.
    pub fn update_series(&mut self, series: &str, new_episodes: Vec<Episode>) -> bool {
        self.files_processed += 1;

        if new_episodes.is_empty() {
            debug!(series = %series, "no new episodes to add");
            return true;
        }

        let Some(mut document) = self.load_current(series) else {
            self.failed_series.push(series.to_string());
            return false;
        };

        let backup_path = self.backup(series);
        let new_count = new_episodes.len();
        let existing = std::mem::take(&mut document.episodes);
        let merged = merge_episodes(existing, new_episodes);

        info!(
            series = %series,
            added = merged.added,
            duplicates = merged.duplicates,
            unkeyed = merged.unkeyed,
            total = merged.episodes.len(),
            "merged episodes"
        );

        let added = merged.added;
        document.episodes = merged.episodes;
        let file_path = self.store.path_for(series);

        if self.options.dry_run {
            info!(
                series = %series,
                count = document.episodes.len(),
                path = %file_path.display(),
                "dry run, would save"
            );
        } else if let Err(e) = self.store.save(series, &document) {
            error!(series = %series, error = %e, "failed to save store");
            self.failed_series.push(series.to_string());
            return false;
        }

        self.updated_files.push(UpdateRecord {
            series: series.to_string(),
            file_path,
            backup_path,
            new_episodes: new_count,
            added_episodes: added,
            total_episodes: document.episodes.len(),
        });

        true
    }

    /// Updates every series in `batches`, in order.
    ///
    /// Returns true only if every series succeeded.
    pub fn update_all<I>(&mut self, batches: I) -> bool
    where
        I: IntoIterator<Item = (String, Vec<Episode>)>,
    {
        let mut all_succeeded = true;
        for (series, episodes) in batches {
            if !self.update_series(&series, episodes) {
                all_succeeded = false;
            }
        }
        all_succeeded
    }

    /// Counts a series that failed before reaching the updater.
    pub fn record_failure(&mut self, series: &str) {
        self.files_processed += 1;
        self.failed_series.push(series.to_string());
    }

    /// Records of the successful updates so far
    pub fn updated_files(&self) -> &[UpdateRecord] {
        &self.updated_files
    }

    /// Summary of all updates performed by this updater
    pub fn summary(&self) -> UpdateSummary {
        UpdateSummary {
            files_processed: self.files_processed,
            files_updated: self.updated_files.len(),
            failed_series: self.failed_series.clone(),
            updated_files: self.updated_files.clone(),
            dry_run: self.options.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::tests::episode;
    use chrono::TimeZone;
    use serde_json::Map;
    use std::fs;
    use std::path::Path;

    fn store_in(dir: &Path) -> EpisodeStore {
        EpisodeStore::new(dir.join("data"), dir.join("backups"))
    }

    fn seed(store: &EpisodeStore, series: &str, episodes: Vec<Episode>) {
        store
            .save(
                series,
                &SeriesStore {
                    episodes,
                    extra: Map::new(),
                },
            )
            .unwrap();
    }

    fn sync_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 9, 22, 6, 0, 0).unwrap()
    }

    fn keys(episodes: &[Episode]) -> Vec<(&str, u32)> {
        episodes
            .iter()
            .map(|e| (e.identity_key().unwrap(), e.episode_number))
            .collect()
    }

    #[test]
    fn test_merge_dedups_and_sorts() {
        let existing = vec![episode("A", 5), episode("D", 2)];
        let new_episodes = vec![episode("B", 6), episode("A", 7), episode("C", 8)];

        let merged = merge_episodes(existing, new_episodes);
        assert_eq!(
            keys(&merged.episodes),
            vec![("C", 8), ("B", 6), ("A", 5), ("D", 2)]
        );
        assert_eq!(merged.added, 2);
        assert_eq!(merged.duplicates, 1);
    }

    #[test]
    fn test_merge_drops_unkeyed_and_repeated_new() {
        let mut unkeyed = episode("X", 9);
        unkeyed.embed_url = "https://open.spotify.com/embed/episode/".to_string();
        let mut later = episode("B", 7);
        later.title = "Later".to_string();

        let merged = merge_episodes(vec![], vec![episode("B", 6), unkeyed, later]);
        assert_eq!(merged.episodes.len(), 1);
        assert_eq!(merged.episodes[0].title, "Later");
        assert_eq!(merged.unkeyed, 1);
        assert_eq!(merged.duplicates, 1);
    }

    #[test]
    fn test_update_creates_file_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut updater = Updater::new(store.clone(), UpdaterOptions::default());

        assert!(updater.update_series("dating", vec![episode("A", 1)]));

        let saved = store.load("dating").unwrap().unwrap();
        assert_eq!(keys(&saved.episodes), vec![("A", 1)]);
        assert!(!dir.path().join("backups").exists());

        let record = &updater.updated_files()[0];
        assert_eq!(record.backup_path, None);
        assert_eq!(record.total_episodes, 1);
    }

    #[test]
    fn test_update_backs_up_then_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        seed(&store, "dating", vec![episode("A", 5)]);
        let before = fs::read_to_string(store.path_for("dating")).unwrap();

        let mut updater =
            Updater::new(store.clone(), UpdaterOptions::default()).with_sync_time(sync_time());
        assert!(updater.update_series("dating", vec![episode("B", 6), episode("C", 7)]));

        let saved = store.load("dating").unwrap().unwrap();
        assert_eq!(keys(&saved.episodes), vec![("C", 7), ("B", 6), ("A", 5)]);

        let backup = updater.updated_files()[0].backup_path.clone().unwrap();
        assert_eq!(
            backup,
            dir.path()
                .join("backups")
                .join("dating_episodes_backup_20240922_060000.json")
        );
        assert_eq!(fs::read_to_string(backup).unwrap(), before);
    }

    #[test]
    fn test_backup_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        seed(&store, "dating", vec![episode("A", 1)]);

        let options = UpdaterOptions {
            backup_enabled: false,
            ..Default::default()
        };
        let mut updater = Updater::new(store, options);
        assert!(updater.update_series("dating", vec![episode("B", 2)]));
        assert!(!dir.path().join("backups").exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        seed(&store, "dating", vec![episode("A", 5)]);
        let before = fs::read_to_string(store.path_for("dating")).unwrap();

        let options = UpdaterOptions {
            dry_run: true,
            ..Default::default()
        };
        let mut updater = Updater::new(store.clone(), options).with_sync_time(sync_time());
        assert!(updater.update_series("dating", vec![episode("B", 6)]));
        assert!(updater.update_series("shalom-bayis", vec![episode("S", 1)]));

        assert_eq!(fs::read_to_string(store.path_for("dating")).unwrap(), before);
        assert!(!store.exists("shalom-bayis"));
        assert!(!dir.path().join("backups").exists());

        let summary = updater.summary();
        assert!(summary.dry_run);
        assert_eq!(summary.files_updated, 2);
        assert_eq!(summary.updated_files[0].total_episodes, 2);
        assert!(summary.updated_files[0].backup_path.is_some());
        assert_eq!(summary.updated_files[1].backup_path, None);
    }

    #[test]
    fn test_empty_batch_is_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        seed(&store, "dating", vec![episode("A", 1)]);
        let before = fs::read_to_string(store.path_for("dating")).unwrap();

        let mut updater = Updater::new(store.clone(), UpdaterOptions::default());
        assert!(updater.update_series("dating", Vec::new()));
        assert_eq!(fs::read_to_string(store.path_for("dating")).unwrap(), before);
        assert!(updater.updated_files().is_empty());
        assert!(!dir.path().join("backups").exists());
    }

    #[test]
    fn test_corrupt_store_skip_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(store.path_for("dating"), "{ broken").unwrap();

        let mut updater = Updater::new(store.clone(), UpdaterOptions::default());
        assert!(!updater.update_series("dating", vec![episode("A", 1)]));
        assert_eq!(fs::read_to_string(store.path_for("dating")).unwrap(), "{ broken");
        assert_eq!(updater.summary().failed_series, vec!["dating".to_string()]);
    }

    #[test]
    fn test_corrupt_store_reset_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(store.path_for("dating"), "{ broken").unwrap();

        let options = UpdaterOptions {
            corrupt_store_policy: CorruptStorePolicy::Reset,
            ..Default::default()
        };
        let mut updater = Updater::new(store.clone(), options).with_sync_time(sync_time());
        assert!(updater.update_series("dating", vec![episode("A", 1)]));

        let saved = store.load("dating").unwrap().unwrap();
        assert_eq!(keys(&saved.episodes), vec![("A", 1)]);
        let backup = updater.updated_files()[0].backup_path.clone().unwrap();
        assert_eq!(fs::read_to_string(backup).unwrap(), "{ broken");
    }

    #[test]
    fn test_save_failure_is_reported_per_series() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be
        fs::write(dir.path().join("data"), "").unwrap();
        let store = store_in(dir.path());

        let mut updater = Updater::new(store, UpdaterOptions::default());
        let batches = vec![
            ("dating".to_string(), vec![episode("A", 1)]),
            ("shalom-bayis".to_string(), Vec::new()),
        ];
        assert!(!updater.update_all(batches));

        let summary = updater.summary();
        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.files_updated, 0);
        assert_eq!(summary.failed_series, vec!["dating".to_string()]);
    }

    #[test]
    fn test_backup_failure_does_not_stop_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        seed(&store, "dating", vec![episode("A", 1)]);
        // A regular file where the backup directory should be
        fs::write(dir.path().join("backups"), "").unwrap();

        let mut updater = Updater::new(store.clone(), UpdaterOptions::default());
        assert!(updater.update_series("dating", vec![episode("B", 2)]));

        let record = &updater.updated_files()[0];
        assert_eq!(record.backup_path, None);
        assert_eq!(record.total_episodes, 2);

        let saved = store.load("dating").unwrap().unwrap();
        assert_eq!(keys(&saved.episodes), vec![("B", 2), ("A", 1)]);
        assert!(updater.summary().failed_series.is_empty());
    }

    #[test]
    fn test_empty_batch_on_corrupt_store_is_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(store.path_for("dating"), "{ broken").unwrap();

        let mut updater = Updater::new(store.clone(), UpdaterOptions::default());
        assert!(updater.update_series("dating", Vec::new()));
        assert_eq!(fs::read_to_string(store.path_for("dating")).unwrap(), "{ broken");

        let summary = updater.summary();
        assert!(summary.failed_series.is_empty());
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.files_updated, 0);
    }

    #[test]
    fn test_reset_policy_covers_undecodable_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(store.path_for("dating"), [0xff, 0xfe, 0x00, 0x7b]).unwrap();

        let options = UpdaterOptions {
            corrupt_store_policy: CorruptStorePolicy::Reset,
            ..Default::default()
        };
        let mut updater = Updater::new(store.clone(), options);
        assert!(updater.update_series("dating", vec![episode("A", 1)]));

        let saved = store.load("dating").unwrap().unwrap();
        assert_eq!(keys(&saved.episodes), vec![("A", 1)]);
    }

    #[test]
    fn test_record_failure_counts_series() {
        let dir = tempfile::tempdir().unwrap();
        let mut updater = Updater::new(store_in(dir.path()), UpdaterOptions::default());
        assert!(updater.update_series("dating", vec![episode("A", 1)]));
        updater.record_failure("shalom-bayis");

        let summary = updater.summary();
        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.files_updated, 1);
        assert_eq!(summary.failed_series, vec!["shalom-bayis".to_string()]);
    }
}
