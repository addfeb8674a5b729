// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::feed::SeriesDialect;
use crate::retry::RetryPolicy;

/// Directory under the archive root holding podshelf's own state
pub const STATE_DIR_NAME: &str = ".podshelf";

fn default_workers() -> usize {
    3
}

/// A subscribed feed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    /// Feed URL or path to a local RSS file
    pub url: String,
    /// Title to use for the feed's default series instead of the feed title
    #[serde(default)]
    pub series_name: Option<String>,
    /// How entries are assigned to series within the feed
    #[serde(default)]
    pub series_marker: SeriesDialect,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            series_name: None,
            series_marker: SeriesDialect::default(),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root directory of the archive
    pub archive_root: PathBuf,
    /// Location of the episode index (defaults below the archive root)
    #[serde(default)]
    pub index_path: Option<PathBuf>,
    /// Location of staged downloads (defaults below the archive root)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    /// Maximum number of concurrent feed fetches and episode pipelines
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum number of new episodes to schedule per feed and scan
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(rename = "feed", default)]
    pub feeds: Vec<FeedConfig>,
}

impl Config {
    /// Read and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("no [[feed]] entries configured".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if let Some(feed) = self.feeds.iter().find(|f| f.url.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "feed with empty url (series_name = {:?})",
                feed.series_name
            )));
        }
        Ok(())
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.archive_root.join(STATE_DIR_NAME).join("index.json"))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.archive_root.join(STATE_DIR_NAME).join("staging"))
    }
}
