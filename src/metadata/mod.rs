// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod artwork;
mod text;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::feed::{EpisodeRecord, Feed, SeriesStream};
use crate::http::HttpClient;

pub use artwork::{Artwork, ImageFormat};
pub use text::html_to_text;

/// Metadata to embed into one episode's audio file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    pub series_title: String,
    pub episode_title: String,
    pub episode_guid: String,
    /// Web page of the episode, or of the feed when the episode has none
    pub episode_url: Option<Url>,
    pub feed_url: Option<Url>,
    pub episode_number: Option<u32>,
    pub season: Option<u32>,
    pub hosts: Vec<String>,
    pub guests: Vec<String>,
    /// Plain-text shownotes
    pub shownotes: Option<String>,
    pub publisher: Option<String>,
    pub copyright: Option<String>,
    pub categories: Vec<String>,
    pub publish_date: Option<DateTime<FixedOffset>>,
    pub artwork: Option<Artwork>,
}

impl TagSet {
    /// Hosts followed by guests, without duplicates
    pub fn artists(&self) -> Vec<String> {
        let mut artists: Vec<String> = Vec::with_capacity(self.hosts.len() + self.guests.len());
        for name in self.hosts.iter().chain(&self.guests) {
            if !artists.contains(name) {
                artists.push(name.clone());
            }
        }
        artists
    }
}

/// A resolved tag set and the problems found while building it
#[derive(Debug, Clone)]
pub struct ResolvedTags {
    pub tags: TagSet,
    pub warnings: Vec<String>,
}

/// Merges feed, series and episode metadata into a [`TagSet`]
///
/// Artwork downloads are cached per URL for the lifetime of the resolver, so
/// a series sharing one cover image fetches it once per scan, even when
/// several workers ask for it at the same time.
pub struct MetadataResolver<C> {
    client: C,
    artwork_cache: Mutex<HashMap<Url, ArtworkCell>>,
}

type ArtworkCell = Arc<OnceCell<Result<Artwork, String>>>;

impl<C: HttpClient> MetadataResolver<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            artwork_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build the tag set for `record`
    ///
    /// Never fails: missing or unusable artwork only adds a warning.
    pub async fn resolve(
        &self,
        record: &EpisodeRecord,
        series: &SeriesStream,
        feed: &Feed,
    ) -> ResolvedTags {
        let mut warnings = Vec::new();

        let hosts = if !record.hosts.is_empty() {
            record.hosts.clone()
        } else if !series.hosts.is_empty() {
            series.hosts.clone()
        } else {
            feed.author.iter().cloned().collect()
        };

        let shownotes = record
            .shownotes
            .as_deref()
            .map(html_to_text)
            .filter(|text| !text.is_empty())
            .or_else(|| {
                feed.description
                    .as_deref()
                    .map(html_to_text)
                    .filter(|text| !text.is_empty())
            });

        let artwork_url = record
            .artwork_url
            .as_ref()
            .or(series.artwork_url.as_ref())
            .or(feed.artwork_url.as_ref());

        let artwork = match artwork_url {
            Some(url) => match self.fetch_artwork(url).await {
                Ok(artwork) => Some(artwork),
                Err(reason) => {
                    warn!(episode = %record.title, %url, %reason, "continuing without artwork");
                    warnings.push(format!(
                        "Artwork for '{}' skipped: {reason}",
                        record.title
                    ));
                    None
                }
            },
            None => None,
        };

        let tags = TagSet {
            series_title: series.series_title.clone(),
            episode_title: record.title.clone(),
            episode_guid: record.episode_guid.clone(),
            episode_url: record.link.clone().or_else(|| feed.link.clone()),
            feed_url: Some(feed.url.clone()),
            episode_number: record.episode_number,
            season: record.season,
            hosts,
            guests: record.guests.clone(),
            shownotes,
            publisher: feed.author.clone(),
            copyright: feed.copyright.clone(),
            categories: feed.categories.clone(),
            publish_date: record.publish_date,
            artwork,
        };

        ResolvedTags { tags, warnings }
    }

    async fn fetch_artwork(&self, url: &Url) -> Result<Artwork, String> {
        let cell = self.artwork_cell(url)?;
        cell.get_or_init(|| async {
            debug!(%url, "fetching artwork");
            match self.client.get_bytes(url.as_str()).await {
                Ok(bytes) => Artwork::from_bytes(bytes.to_vec())
                    .ok_or_else(|| format!("{url} is not a JPEG or PNG image")),
                Err(e) => Err(e.to_string()),
            }
        })
        .await
        .clone()
    }

    fn artwork_cell(&self, url: &Url) -> Result<ArtworkCell, String> {
        let mut cache = self
            .artwork_cache
            .lock()
            .map_err(|_| "artwork cache is poisoned".to_string())?;
        Ok(Arc::clone(cache.entry(url.clone()).or_default()))
    }
}
