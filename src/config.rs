//! Configuration loading
//!
//! The configuration is a JSON document read once per run. Catalog
//! credentials may be overridden through the environment, which always wins
//! over the file.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "episode_detector_config.json";

/// Environment variable overriding the catalog client id
pub const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";

/// Environment variable overriding the catalog client secret
pub const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

/// Upper bound the catalog accepts for a single episode page
pub const MAX_FETCH_LIMIT: usize = 50;

/// Errors that can occur while loading the configuration
///
/// All of these are fatal: no series is processed without a valid
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("Configuration file '{0}' not found")]
    NotFound(PathBuf),

    /// The configuration file could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON or has the wrong shape
    #[error("Invalid JSON in configuration file {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Client id or secret missing after applying the environment
    #[error(
        "Catalog credentials not found. Set SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET \
         or fill in the configuration file"
    )]
    MissingCredentials,

    /// No shows are configured
    #[error("No podcast shows configured")]
    NoShows,

    /// A series key cannot be used as a file name component
    #[error("Invalid series key '{0}'")]
    InvalidSeriesKey(String),

    /// The fetch limit is out of range
    #[error("fetch_limit must be between 1 and 50, got {0}")]
    InvalidFetchLimit(usize),
}

/// What the updater does with a series whose store file cannot be parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptStorePolicy {
    /// Leave the file untouched and report the series as failed
    #[default]
    Skip,
    /// Treat the file as empty, back it up and overwrite it
    Reset,
}

/// Catalog API credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CatalogCredentials {
    #[serde(alias = "clientId")]
    pub client_id: String,
    #[serde(alias = "clientSecret")]
    pub client_secret: String,
}

/// A configured show: the stable series key and the catalog show id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowEntry {
    pub series: String,
    pub show_id: String,
}

/// Tunable behaviour of the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Title substrings marking an item as a trailer
    #[serde(alias = "trailerKeywords")]
    pub trailer_keywords: Vec<String>,
    /// Items shorter than this are treated as trailers, when set
    #[serde(alias = "minEpisodeDurationMs")]
    pub min_episode_duration_ms: Option<u64>,
    /// Directory holding the per-series store files
    pub data_dir: PathBuf,
    /// Directory receiving backups of overwritten store files
    pub backup_dir: PathBuf,
    /// Number of episodes requested per show
    pub fetch_limit: usize,
    /// Catalog market the episodes are requested for
    pub market: String,
    /// Prefix for generated embed URLs
    pub embed_base_url: String,
    pub corrupt_store_policy: CorruptStorePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trailer_keywords: vec![
                "trailer".to_string(),
                "coming soon".to_string(),
                "preview".to_string(),
            ],
            min_episode_duration_ms: None,
            data_dir: PathBuf::from("data"),
            backup_dir: PathBuf::from("backups"),
            fetch_limit: MAX_FETCH_LIMIT,
            market: "US".to_string(),
            embed_base_url: crate::catalog::DEFAULT_EMBED_BASE_URL.to_string(),
            corrupt_store_policy: CorruptStorePolicy::default(),
        }
    }
}

/// The complete run configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(rename = "spotify", alias = "catalog", default)]
    pub credentials: CatalogCredentials,
    /// Shows in document order
    #[serde(deserialize_with = "deserialize_shows")]
    pub shows: Vec<ShowEntry>,
    #[serde(default)]
    pub settings: Settings,
}

impl Config {
    /// Loads the configuration from a file and applies the process environment.
    ///
    /// Credentials are only required when `require_credentials` is set; the
    /// offline mode runs without them.
    pub fn load(path: &Path, require_credentials: bool) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate(require_credentials)?;
        Ok(config)
    }

    /// Parses a configuration file without applying the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_json(&content).map_err(|e| ConfigError::InvalidJson {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parses a configuration document, tolerating a leading BOM.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content.trim_start_matches('\u{feff}'))
    }

    /// Overrides credentials with non-empty values from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup(CLIENT_ID_ENV).filter(|v| !v.is_empty()) {
            self.credentials.client_id = id;
        }
        if let Some(secret) = lookup(CLIENT_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.credentials.client_secret = secret;
        }
    }

    /// Checks everything that would otherwise fail halfway through a run.
    pub fn validate(&self, require_credentials: bool) -> Result<(), ConfigError> {
        if require_credentials
            && (self.credentials.client_id.is_empty() || self.credentials.client_secret.is_empty())
        {
            return Err(ConfigError::MissingCredentials);
        }

        if self.shows.is_empty() {
            return Err(ConfigError::NoShows);
        }

        for show in &self.shows {
            let key = &show.series;
            if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
                return Err(ConfigError::InvalidSeriesKey(key.clone()));
            }
        }

        let limit = self.settings.fetch_limit;
        if limit == 0 || limit > MAX_FETCH_LIMIT {
            return Err(ConfigError::InvalidFetchLimit(limit));
        }

        Ok(())
    }

    /// Looks up the catalog show id for a series key.
    pub fn show_id(&self, series: &str) -> Option<&str> {
        self.shows
            .iter()
            .find(|show| show.series == series)
            .map(|show| show.show_id.as_str())
    }
}

/// Resolves the configuration path when none was given explicitly.
///
/// Prefers the default file name in the working directory and falls back to
/// the platform configuration directory.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }

    directories::ProjectDirs::from("", "", "episode_sync")
        .map(|dirs| dirs.config_dir().join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

/// Reads the `shows` object into a list, keeping document order.
fn deserialize_shows<'de, D>(deserializer: D) -> Result<Vec<ShowEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ShowsVisitor;

    impl<'de> Visitor<'de> for ShowsVisitor {
        type Value = Vec<ShowEntry>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of series keys to show ids")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut shows = Vec::new();
            while let Some((series, show_id)) = map.next_entry::<String, String>()? {
                shows.push(ShowEntry { series, show_id });
            }
            Ok(shows)
        }
    }

    deserializer.deserialize_map(ShowsVisitor)
}
