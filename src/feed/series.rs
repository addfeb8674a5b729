// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Marker key of a feed's implicit series
pub const DEFAULT_SERIES_KEY: &str = "default";

/// Longest title prefix still accepted as a series name
const MAX_PREFIX_LENGTH: usize = 80;

/// Feed dialects understood when splitting a feed into series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeriesDialect {
    /// `<category domain="series">Name</category>` on the item
    #[default]
    Category,
    /// Item titles shaped like `Name: Episode title`
    TitlePrefix,
    /// No per-entry markers
    None,
}

/// The series an entry was assigned to by a marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesMarker {
    /// Normalized grouping key
    pub key: String,
    /// Display title of the series
    pub title: String,
    /// Replacement episode title when the marker was carved out of the title
    pub episode_title: Option<String>,
}

impl SeriesMarker {
    fn new(title: &str, episode_title: Option<String>) -> Self {
        Self {
            key: normalize_key(title),
            title: title.trim().to_string(),
            episode_title,
        }
    }
}

/// Derives a series marker for a single feed entry
pub trait SeriesMarkerExtractor: Send + Sync {
    fn extract(&self, item: &rss::Item) -> Option<SeriesMarker>;
}

/// Reads `<category domain="series">`
#[derive(Debug, Clone)]
pub struct CategoryMarker {
    domain: String,
}

impl Default for CategoryMarker {
    fn default() -> Self {
        Self {
            domain: "series".to_string(),
        }
    }
}

impl SeriesMarkerExtractor for CategoryMarker {
    fn extract(&self, item: &rss::Item) -> Option<SeriesMarker> {
        item.categories()
            .iter()
            .filter(|c| {
                c.domain()
                    .is_some_and(|d| d.trim().eq_ignore_ascii_case(&self.domain))
            })
            .map(|c| c.name().trim())
            .find(|name| !name.is_empty())
            .map(|name| SeriesMarker::new(name, None))
    }
}

/// Splits `Name: Episode title`
#[derive(Debug, Clone, Default)]
pub struct TitlePrefixMarker;

impl SeriesMarkerExtractor for TitlePrefixMarker {
    fn extract(&self, item: &rss::Item) -> Option<SeriesMarker> {
        let (prefix, rest) = item.title()?.split_once(": ")?;
        let prefix = prefix.trim();
        let rest = rest.trim();

        if prefix.is_empty() || rest.is_empty() || prefix.chars().count() > MAX_PREFIX_LENGTH {
            return None;
        }

        Some(SeriesMarker::new(prefix, Some(rest.to_string())))
    }
}

/// Never marks anything
#[derive(Debug, Clone, Default)]
pub struct NoMarker;

impl SeriesMarkerExtractor for NoMarker {
    fn extract(&self, _item: &rss::Item) -> Option<SeriesMarker> {
        None
    }
}

/// Build the extractor for a configured dialect
pub fn extractor_for(dialect: SeriesDialect) -> Box<dyn SeriesMarkerExtractor> {
    match dialect {
        SeriesDialect::Category => Box::new(CategoryMarker::default()),
        SeriesDialect::TitlePrefix => Box::new(TitlePrefixMarker),
        SeriesDialect::None => Box::new(NoMarker),
    }
}

/// Stable identifier of a series within a feed
pub fn derive_series_id(feed_url: &str, marker_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_url.as_bytes());
    hasher.update(b"\n");
    hasher.update(marker_key.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Lowercase and collapse whitespace so cosmetic changes keep the same series
pub fn normalize_key(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
