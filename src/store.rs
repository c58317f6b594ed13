//! Series store files
//!
//! Every series is persisted as one JSON document `{ "episodes": [...] }`
//! named `<series>_episodes.json` inside the data directory. Backups of
//! overwritten documents go to a separate directory, created on first use.

use crate::episode::{Episode, EpisodeError};
use crate::staged_write;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while reading or writing store files
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read a store file
    #[error("Failed to read store file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The store file is not UTF-8 text
    #[error("Store file {path} is not valid UTF-8: {source}")]
    InvalidEncoding {
        path: PathBuf,
        source: std::str::Utf8Error,
    },

    /// The store file is not a valid store document
    #[error("Malformed store file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// An entry of the store file failed validation
    #[error("Invalid episode at index {index} in {path}: {source}")]
    InvalidEpisode {
        path: PathBuf,
        index: usize,
        source: EpisodeError,
    },

    /// Failed to create the data or backup directory
    #[error("Failed to create directory at {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to copy a store file into the backup directory
    #[error("Failed to back up {path}: {source}")]
    BackupFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a store file
    #[error("Failed to write store file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a store document
    #[error("Failed to serialize store document: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

impl StoreError {
    /// True if the file exists but its content is unusable.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidEncoding { .. }
                | StoreError::Malformed { .. }
                | StoreError::InvalidEpisode { .. }
        )
    }
}

/// The persisted document of one series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStore {
    #[serde(default)]
    pub episodes: Vec<Episode>,
    /// Other top-level fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SeriesStore {
    /// Parses a store document and validates every episode.
    ///
    /// A leading UTF-8 BOM is tolerated.
    pub fn from_json(path: &Path, content: &str) -> Result<Self, StoreError> {
        let store: SeriesStore = serde_json::from_str(content.trim_start_matches('\u{feff}'))
            .map_err(|e| StoreError::Malformed {
                path: path.to_path_buf(),
                source: e,
            })?;

        for (index, episode) in store.episodes.iter().enumerate() {
            episode
                .validate()
                .map_err(|source| StoreError::InvalidEpisode {
                    path: path.to_path_buf(),
                    index,
                    source,
                })?;
        }

        Ok(store)
    }
}

/// On-disk layout of series store files and their backups
#[derive(Debug, Clone)]
pub struct EpisodeStore {
    data_dir: PathBuf,
    backup_dir: PathBuf,
}

impl EpisodeStore {
    /// Creates a store rooted at the given directories.
    ///
    /// Nothing is created on disk until the first write.
    pub fn new(data_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// Path of the store file for a series
    pub fn path_for(&self, series: &str) -> PathBuf {
        self.data_dir.join(format!("{}_episodes.json", series))
    }

    /// Path a backup taken at `timestamp` would be written to
    pub fn backup_path_for(&self, series: &str, timestamp: DateTime<Local>) -> PathBuf {
        self.backup_dir.join(format!(
            "{}_episodes_backup_{}.json",
            series,
            timestamp.format("%Y%m%d_%H%M%S")
        ))
    }

    /// Returns true if a store file exists for the series.
    pub fn exists(&self, series: &str) -> bool {
        self.path_for(series).is_file()
    }

    /// Loads the store of a series.
    ///
    /// # Returns
    ///
    /// `None` if no file exists yet, the parsed document otherwise. Returns an
    /// error if the file exists but cannot be read or is not a valid store.
    pub fn load(&self, series: &str) -> Result<Option<SeriesStore>, StoreError> {
        let path = self.path_for(series);

        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path).map_err(|e| StoreError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        let content = std::str::from_utf8(&bytes).map_err(|e| StoreError::InvalidEncoding {
            path: path.clone(),
            source: e,
        })?;

        SeriesStore::from_json(&path, content).map(Some)
    }

    /// Copies the current store file of a series into the backup directory.
    pub fn backup(&self, series: &str, timestamp: DateTime<Local>) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.backup_dir).map_err(|e| StoreError::DirectoryCreationFailed {
            path: self.backup_dir.clone(),
            source: e,
        })?;

        let source = self.path_for(series);
        let backup_path = self.backup_path_for(series, timestamp);

        fs::copy(&source, &backup_path).map_err(|e| StoreError::BackupFailed {
            path: source.clone(),
            source: e,
        })?;

        debug!(series = %series, backup = %backup_path.display(), "created backup");
        Ok(backup_path)
    }

    /// Writes the store of a series, replacing any previous content.
    ///
    /// Output is pretty-printed UTF-8 without BOM.
    pub fn save(&self, series: &str, store: &SeriesStore) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.data_dir).map_err(|e| StoreError::DirectoryCreationFailed {
            path: self.data_dir.clone(),
            source: e,
        })?;

        let path = self.path_for(series);
        let content = serde_json::to_string_pretty(store)?;

        staged_write::write_atomically(&path, content.as_bytes()).map_err(|e| {
            StoreError::WriteFailed {
                path: path.clone(),
                source: e,
            }
        })?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::tests::episode;
    use chrono::TimeZone;

    fn store_in(dir: &Path) -> EpisodeStore {
        EpisodeStore::new(dir.join("data"), dir.join("backups"))
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load("dating").unwrap().is_none());
        assert!(!store.exists("dating"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let document = SeriesStore {
            episodes: vec![episode("b", 2), episode("a", 1)],
            extra: Map::new(),
        };

        let path = store.save("dating", &document).unwrap();
        assert_eq!(path, dir.path().join("data").join("dating_episodes.json"));

        let raw = fs::read(&path).unwrap();
        assert!(!raw.starts_with(&[0xEF, 0xBB, 0xBF]));

        let loaded = store.load("dating").unwrap().unwrap();
        assert_eq!(loaded, document);
    }

    #[test]
    fn test_load_tolerates_bom_and_keeps_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(
            store.path_for("dating"),
            "\u{feff}{ \"episodes\": [], \"updated\": \"2024-09-11\" }",
        )
        .unwrap();

        let loaded = store.load("dating").unwrap().unwrap();
        assert!(loaded.episodes.is_empty());
        assert_eq!(loaded.extra["updated"], "2024-09-11");
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(store.path_for("dating"), "{ \"episodes\": [ {").unwrap();

        let err = store.load("dating").unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_non_utf8_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(store.path_for("dating"), [0xff, 0xfe, 0x00, 0x7b]).unwrap();

        let err = store.load("dating").unwrap_err();
        assert!(matches!(err, StoreError::InvalidEncoding { .. }));
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_invalid_episode_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut bad = episode("a", 1);
        bad.title = String::new();
        let json = serde_json::to_string(&SeriesStore {
            episodes: vec![episode("b", 2), bad],
            extra: Map::new(),
        })
        .unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(store.path_for("dating"), json).unwrap();

        let err = store.load("dating").unwrap_err();
        assert!(matches!(err, StoreError::InvalidEpisode { index: 1, .. }));
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_backup_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let document = SeriesStore {
            episodes: vec![episode("a", 1)],
            extra: Map::new(),
        };
        store.save("dating", &document).unwrap();

        let timestamp = Local.with_ymd_and_hms(2024, 9, 11, 8, 30, 5).unwrap();
        let backup = store.backup("dating", timestamp).unwrap();

        assert_eq!(
            backup,
            dir.path()
                .join("backups")
                .join("dating_episodes_backup_20240911_083005.json")
        );
        assert_eq!(
            fs::read_to_string(&backup).unwrap(),
            fs::read_to_string(store.path_for("dating")).unwrap()
        );
    }

    #[test]
    fn test_backup_without_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(matches!(
            store.backup("dating", Local::now()),
            Err(StoreError::BackupFailed { .. })
        ));
    }
}
