// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset};
use quick_xml::Reader;
use quick_xml::events::Event;
use rss::extension::ExtensionMap;
use tracing::{debug, warn};
use url::Url;

use crate::error::{EntryWarning, ParseError};

use super::series::{
    DEFAULT_SERIES_KEY, SeriesDialect, SeriesMarkerExtractor, derive_series_id, extractor_for,
    normalize_key,
};

/// A parsed podcast feed, split into its series
#[derive(Debug, Clone)]
pub struct Feed {
    pub url: Url,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<Url>,
    pub author: Option<String>,
    pub copyright: Option<String>,
    /// iTunes categories, or plain RSS categories when none are given
    pub categories: Vec<String>,
    pub artwork_url: Option<Url>,
    pub series: Vec<SeriesStream>,
}

impl Feed {
    /// Total number of episodes across all series
    pub fn episode_count(&self) -> usize {
        self.series.iter().map(|s| s.episodes.len()).sum()
    }
}

/// One logical series within a feed
#[derive(Debug, Clone)]
pub struct SeriesStream {
    pub series_id: String,
    pub series_title: String,
    pub artwork_url: Option<Url>,
    pub hosts: Vec<String>,
    /// Episodes ordered oldest first
    pub episodes: Vec<EpisodeRecord>,
}

impl SeriesStream {
    /// Whether any episode of the series carries a season number
    pub fn has_seasons(&self) -> bool {
        self.episodes.iter().any(|e| e.season.is_some())
    }
}

/// A normalized feed entry
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub episode_guid: String,
    pub series_id: String,
    pub season: Option<u32>,
    pub episode_number: Option<u32>,
    pub title: String,
    pub publish_date: Option<DateTime<FixedOffset>>,
    pub audio_url: Url,
    pub audio_mime: Option<String>,
    /// Length advertised by the enclosure; informational only
    pub audio_length: Option<u64>,
    /// Raw (possibly HTML) shownotes
    pub shownotes: Option<String>,
    pub artwork_url: Option<Url>,
    pub link: Option<Url>,
    pub hosts: Vec<String>,
    pub guests: Vec<String>,
    /// Position of the entry in the feed document
    pub feed_position: usize,
}

/// Per-feed parsing options
#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    /// Title of the default series instead of the feed title
    pub series_name: Option<String>,
    pub dialect: SeriesDialect,
}

/// A feed together with the entries that had to be skipped
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub feed: Feed,
    pub warnings: Vec<EntryWarning>,
}

/// Parse RSS feed XML bytes into a Feed
///
/// Documents with several `<channel>` blocks are split so that every channel
/// becomes its own series scope. Individual broken entries are skipped and
/// reported; only an unreadable document is an error.
pub fn parse_feed(
    xml_bytes: &[u8],
    feed_url: Url,
    options: &FeedOptions,
) -> Result<ParsedFeed, ParseError> {
    let feed_url_str = feed_url.to_string();
    let mut warnings = Vec::new();

    let channels = match split_channels(xml_bytes) {
        Some(documents) => {
            let mut channels = Vec::with_capacity(documents.len());
            let mut first_error = None;
            for document in documents {
                match rss::Channel::read_from(document.as_bytes()) {
                    Ok(channel) => channels.push(channel),
                    Err(e) => {
                        warn!(feed = %feed_url, error = %e, "skipping unreadable channel");
                        warnings.push(EntryWarning {
                            feed_url: feed_url_str.clone(),
                            entry: "<channel>".to_string(),
                            reason: e.to_string(),
                        });
                        first_error.get_or_insert(e);
                    }
                }
            }
            if channels.is_empty()
                && let Some(e) = first_error
            {
                return Err(e.into());
            }
            channels
        }
        None => vec![rss::Channel::read_from(xml_bytes)?],
    };

    let multi_channel = channels.len() > 1;
    let extractor = extractor_for(options.dialect);
    let first = &channels[0];

    let mut builder = SeriesBuilder::default();
    let mut seen_guids = HashSet::new();
    let mut position = 0;

    for channel in &channels {
        let (default_key, default_title) = if multi_channel {
            (
                normalize_key(channel.title()),
                channel.title().trim().to_string(),
            )
        } else {
            (
                DEFAULT_SERIES_KEY.to_string(),
                options
                    .series_name
                    .clone()
                    .unwrap_or_else(|| channel.title().trim().to_string()),
            )
        };
        let channel_hosts = channel_hosts(channel);
        let channel_artwork = channel_image(channel);

        if channel.items().is_empty() {
            builder.series_mut(&feed_url_str, &default_key, &default_title, || {
                (channel_artwork.clone(), channel_hosts.clone())
            });
        }

        for item in channel.items() {
            position += 1;
            let marker = extractor.extract(item);

            let mut record = match parse_episode(item, position) {
                Ok(record) => record,
                Err(reason) => {
                    let entry = item.title().unwrap_or("<untitled>").to_string();
                    warn!(feed = %feed_url, %entry, %reason, "skipping malformed entry");
                    warnings.push(EntryWarning {
                        feed_url: feed_url_str.clone(),
                        entry,
                        reason,
                    });
                    continue;
                }
            };

            if !seen_guids.insert(record.episode_guid.clone()) {
                warnings.push(EntryWarning {
                    feed_url: feed_url_str.clone(),
                    entry: record.title.clone(),
                    reason: format!("duplicate guid '{}'", record.episode_guid),
                });
                continue;
            }

            let series = match marker {
                Some(marker) => {
                    if let Some(title) = marker.episode_title {
                        record.title = title;
                    }
                    // Channels are separate shows, so equal markers stay apart
                    let key = if multi_channel {
                        format!("{default_key}::{}", marker.key)
                    } else {
                        marker.key
                    };
                    builder.series_mut(&feed_url_str, &key, &marker.title, || {
                        (None, channel_hosts.clone())
                    })
                }
                None => builder.series_mut(&feed_url_str, &default_key, &default_title, || {
                    (channel_artwork.clone(), channel_hosts.clone())
                }),
            };

            record.series_id = series.series_id.clone();
            series.episodes.push(record);
        }
    }

    if builder.series.is_empty() {
        let title = options
            .series_name
            .clone()
            .unwrap_or_else(|| first.title().trim().to_string());
        builder.series_mut(&feed_url_str, DEFAULT_SERIES_KEY, &title, || {
            (None, Vec::new())
        });
    }

    let mut series = builder.series;
    for stream in &mut series {
        sort_oldest_first(&mut stream.episodes);
    }

    let author = first
        .itunes_ext()
        .and_then(|ext| ext.author().map(String::from))
        .or_else(|| first.managing_editor().map(String::from))
        .filter(|s| !s.trim().is_empty());

    let feed = Feed {
        url: feed_url,
        title: first.title().trim().to_string(),
        description: Some(first.description().to_string()).filter(|s| !s.is_empty()),
        link: Url::parse(first.link()).ok(),
        author,
        copyright: first
            .copyright()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        categories: channel_categories(first),
        artwork_url: channel_image(first),
        series,
    };

    debug!(
        feed = %feed.url,
        series = feed.series.len(),
        episodes = feed.episode_count(),
        skipped = warnings.len(),
        "parsed feed"
    );

    Ok(ParsedFeed { feed, warnings })
}

/// Collects series in order of first appearance
#[derive(Default)]
struct SeriesBuilder {
    series: Vec<SeriesStream>,
    by_key: HashMap<String, usize>,
}

impl SeriesBuilder {
    fn series_mut(
        &mut self,
        feed_url: &str,
        key: &str,
        title: &str,
        context: impl FnOnce() -> (Option<Url>, Vec<String>),
    ) -> &mut SeriesStream {
        let index = match self.by_key.get(key) {
            Some(&index) => index,
            None => {
                let (artwork_url, hosts) = context();
                self.series.push(SeriesStream {
                    series_id: derive_series_id(feed_url, key),
                    series_title: title.to_string(),
                    artwork_url,
                    hosts,
                    episodes: Vec::new(),
                });
                self.by_key.insert(key.to_string(), self.series.len() - 1);
                self.series.len() - 1
            }
        };
        &mut self.series[index]
    }
}

/// Dated episodes by date, then undated ones; feeds list newest first so
/// document order is reversed for ties
fn sort_oldest_first(episodes: &mut [EpisodeRecord]) {
    episodes.sort_by_key(|e| {
        (
            e.publish_date.is_none(),
            e.publish_date,
            Reverse(e.feed_position),
        )
    });
}

fn parse_episode(item: &rss::Item, position: usize) -> Result<EpisodeRecord, String> {
    let title = item
        .title()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled Episode")
        .to_string();

    let enclosure = item
        .enclosure()
        .ok_or_else(|| "no enclosure (audio file)".to_string())?;

    let audio_url = Url::parse(enclosure.url().trim())
        .map_err(|e| format!("invalid enclosure URL '{}': {}", enclosure.url(), e))?;

    let publish_date = item.pub_date().and_then(|date_str| {
        DateTime::parse_from_rfc2822(date_str.trim())
            .ok()
            .or_else(|| parse_relaxed_date(date_str.trim()))
    });

    let episode_guid = item
        .guid()
        .map(|g| g.value().trim().to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| audio_url.to_string());

    let itunes = item.itunes_ext();

    let episode_number = itunes.and_then(|ext| ext.episode()).and_then(|raw| {
        let parsed = raw.trim().parse().ok();
        if parsed.is_none() {
            debug!(episode = %title, raw, "ignoring non-numeric episode number");
        }
        parsed
    });
    let season = itunes
        .and_then(|ext| ext.season())
        .and_then(|raw| raw.trim().parse().ok());

    let shownotes = item
        .content()
        .or_else(|| item.description())
        .or_else(|| itunes.and_then(|ext| ext.summary()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let mut hosts = persons(item.extensions(), "host");
    let guests = persons(item.extensions(), "guest");
    if hosts.is_empty()
        && let Some(author) = itunes.and_then(|ext| ext.author())
    {
        hosts = split_names(author);
    }

    Ok(EpisodeRecord {
        episode_guid,
        series_id: String::new(),
        season,
        episode_number,
        title,
        publish_date,
        audio_url,
        audio_mime: Some(enclosure.mime_type().trim().to_string()).filter(|s| !s.is_empty()),
        audio_length: enclosure.length().trim().parse().ok().filter(|&l| l > 0),
        shownotes,
        artwork_url: itunes
            .and_then(|ext| ext.image())
            .and_then(|url| Url::parse(url.trim()).ok()),
        link: item.link().and_then(|l| Url::parse(l.trim()).ok()),
        hosts,
        guests,
        feed_position: position,
    })
}

fn channel_image(channel: &rss::Channel) -> Option<Url> {
    channel
        .image()
        .and_then(|img| Url::parse(img.url().trim()).ok())
        .or_else(|| {
            channel
                .itunes_ext()
                .and_then(|ext| ext.image())
                .and_then(|url| Url::parse(url.trim()).ok())
        })
}

fn channel_categories(channel: &rss::Channel) -> Vec<String> {
    let itunes: Vec<&str> = channel
        .itunes_ext()
        .map(|ext| ext.categories().iter().map(|c| c.text()).collect())
        .unwrap_or_default();
    let names = if itunes.is_empty() {
        channel.categories().iter().map(|c| c.name()).collect()
    } else {
        itunes
    };

    let mut categories: Vec<String> = Vec::new();
    for name in names.into_iter().map(str::trim).filter(|n| !n.is_empty()) {
        if !categories.iter().any(|c| c == name) {
            categories.push(name.to_string());
        }
    }
    categories
}

fn channel_hosts(channel: &rss::Channel) -> Vec<String> {
    let hosts = persons(channel.extensions(), "host");
    if !hosts.is_empty() {
        return hosts;
    }
    channel
        .itunes_ext()
        .and_then(|ext| ext.author())
        .map(split_names)
        .unwrap_or_default()
}

/// Names from `<podcast:person>` elements with the given role ("host" when unset)
fn persons(extensions: &ExtensionMap, role: &str) -> Vec<String> {
    extensions
        .get("podcast")
        .and_then(|ns| ns.get("person"))
        .map(|people| {
            people
                .iter()
                .filter(|p| match p.attrs().get("role") {
                    Some(r) => r.trim().eq_ignore_ascii_case(role),
                    None => role == "host",
                })
                .filter_map(|p| p.value())
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn split_names(raw: &str) -> Vec<String> {
    raw.split([',', '&'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt);
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
}

/// Split a document holding several `<channel>` blocks into one document per
/// channel, each wrapped in the original root element
///
/// Only channels that are direct children of the root count; markup inside
/// CDATA sections or comments is ignored. Returns `None` for the common
/// single-channel case and for documents the reader rejects.
fn split_channels(xml_bytes: &[u8]) -> Option<Vec<String>> {
    let text = std::str::from_utf8(xml_bytes).ok()?;
    let mut reader = Reader::from_str(text);

    let mut depth = 0usize;
    let mut root: Option<(&str, String)> = None;
    let mut channel_start = None;
    let mut blocks = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().ok()?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                if depth == 0 {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    root = Some((&text[start..end], name));
                } else if depth == 1 && e.name().as_ref() == b"channel" {
                    channel_start = Some(start);
                }
                depth += 1;
            }
            Event::Empty(e) if depth == 1 && e.name().as_ref() == b"channel" => {
                blocks.push(&text[start..end]);
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 1
                    && e.name().as_ref() == b"channel"
                    && let Some(open) = channel_start.take()
                {
                    blocks.push(&text[open..end]);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if blocks.len() < 2 {
        return None;
    }

    let (root_open, root_name) = root?;
    Some(
        blocks
            .into_iter()
            .map(|block| format!("{root_open}{block}</{root_name}>"))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd" xmlns:podcast="https://podcastindex.org/namespace/1.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast for unit testing</description>
    <link>https://example.com</link>
    <copyright>2024 Test Network</copyright>
    <itunes:author>Test Author</itunes:author>
    <itunes:image href="https://example.com/image.jpg"/>
    <itunes:category text="Technology"><itunes:category text="Podcasting"/></itunes:category>
    <itunes:category text="Comedy"/>
    <item>
      <title>Episode 2</title>
      <pubDate>Mon, 08 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/ep2.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Episode 1</title>
      <description>First episode</description>
      <content:encoded><![CDATA[<p>First <b>episode</b></p>]]></content:encoded>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <guid>ep1-guid</guid>
      <enclosure url="https://example.com/ep1.mp3" length="1234567" type="audio/mpeg"/>
      <itunes:episode>1</itunes:episode>
      <itunes:season>1</itunes:season>
      <itunes:image href="https://example.com/ep1.jpg"/>
      <podcast:person role="host">Alice</podcast:person>
      <podcast:person role="guest">Bob</podcast:person>
    </item>
  </channel>
</rss>"#;

    fn feed_url() -> Url {
        Url::parse("https://example.com/feed.xml").unwrap()
    }

    fn parse(xml: &str, options: &FeedOptions) -> ParsedFeed {
        parse_feed(xml.as_bytes(), feed_url(), options).unwrap()
    }

    fn feed_with_items(items: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Network</title>
    <description>Test</description>
    {items}
  </channel>
</rss>"#
        )
    }

    #[test]
    fn parse_feed_extracts_podcast_metadata() {
        let parsed = parse(SAMPLE_FEED, &FeedOptions::default());
        let feed = parsed.feed;

        assert_eq!(feed.title, "Test Podcast");
        assert_eq!(
            feed.description,
            Some("A test podcast for unit testing".to_string())
        );
        assert_eq!(feed.author, Some("Test Author".to_string()));
        assert_eq!(feed.copyright.as_deref(), Some("2024 Test Network"));
        assert_eq!(feed.categories, vec!["Technology", "Comedy"]);
        assert_eq!(feed.link, Some(Url::parse("https://example.com").unwrap()));
        assert_eq!(
            feed.artwork_url,
            Some(Url::parse("https://example.com/image.jpg").unwrap())
        );
        assert_eq!(feed.url, feed_url());
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn single_channel_yields_one_default_series() {
        let feed = parse(SAMPLE_FEED, &FeedOptions::default()).feed;

        assert_eq!(feed.series.len(), 1);
        let series = &feed.series[0];
        assert_eq!(series.series_title, "Test Podcast");
        assert_eq!(
            series.series_id,
            derive_series_id("https://example.com/feed.xml", DEFAULT_SERIES_KEY)
        );
        assert_eq!(series.hosts, vec!["Test Author".to_string()]);
        assert!(
            series
                .episodes
                .iter()
                .all(|e| e.series_id == series.series_id)
        );
    }

    #[test]
    fn series_name_override_renames_default_series() {
        let options = FeedOptions {
            series_name: Some("Renamed".to_string()),
            ..Default::default()
        };
        let feed = parse(SAMPLE_FEED, &options).feed;
        assert_eq!(feed.series[0].series_title, "Renamed");
    }

    #[test]
    fn parse_feed_extracts_episode_fields() {
        let feed = parse(SAMPLE_FEED, &FeedOptions::default()).feed;
        let ep1 = &feed.series[0].episodes[0];

        assert_eq!(ep1.title, "Episode 1");
        assert_eq!(ep1.episode_guid, "ep1-guid");
        assert_eq!(ep1.episode_number, Some(1));
        assert_eq!(ep1.season, Some(1));
        assert_eq!(ep1.audio_length, Some(1234567));
        assert_eq!(ep1.audio_mime.as_deref(), Some("audio/mpeg"));
        assert_eq!(
            ep1.shownotes.as_deref(),
            Some("<p>First <b>episode</b></p>")
        );
        assert_eq!(
            ep1.artwork_url,
            Some(Url::parse("https://example.com/ep1.jpg").unwrap())
        );
        assert_eq!(ep1.hosts, vec!["Alice".to_string()]);
        assert_eq!(ep1.guests, vec!["Bob".to_string()]);
    }

    #[test]
    fn parse_feed_handles_missing_optional_fields() {
        let feed = parse(SAMPLE_FEED, &FeedOptions::default()).feed;
        let ep2 = &feed.series[0].episodes[1];

        assert_eq!(ep2.title, "Episode 2");
        assert_eq!(ep2.episode_guid, "https://example.com/ep2.mp3");
        assert!(ep2.episode_number.is_none());
        assert!(ep2.season.is_none());
        assert!(ep2.shownotes.is_none());
        assert!(ep2.hosts.is_empty());
    }

    #[test]
    fn episodes_are_ordered_oldest_first() {
        let feed = parse(SAMPLE_FEED, &FeedOptions::default()).feed;
        let titles: Vec<_> = feed.series[0]
            .episodes
            .iter()
            .map(|e| e.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Episode 1", "Episode 2"]);
    }

    #[test]
    fn undated_episodes_follow_dated_in_reverse_document_order() {
        let xml = feed_with_items(
            r#"
    <item><title>Newest undated</title><guid>c</guid><enclosure url="https://example.com/c.mp3" type="audio/mpeg"/></item>
    <item><title>Older undated</title><guid>b</guid><enclosure url="https://example.com/b.mp3" type="audio/mpeg"/></item>
    <item><title>Dated</title><guid>a</guid><pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate><enclosure url="https://example.com/a.mp3" type="audio/mpeg"/></item>"#,
        );
        let feed = parse(&xml, &FeedOptions::default()).feed;
        let guids: Vec<_> = feed.series[0]
            .episodes
            .iter()
            .map(|e| e.episode_guid.as_str())
            .collect();
        assert_eq!(guids, vec!["a", "b", "c"]);
    }

    #[test]
    fn malformed_entries_are_skipped_with_warnings() {
        let xml = feed_with_items(
            r#"
    <item><title>No Audio</title><guid>x</guid></item>
    <item><title>Bad URL</title><guid>y</guid><enclosure url="not a url" type="audio/mpeg"/></item>
    <item><title>Good</title><guid>z</guid><enclosure url="https://example.com/z.mp3" type="audio/mpeg"/></item>"#,
        );
        let parsed = parse(&xml, &FeedOptions::default());

        assert_eq!(parsed.feed.episode_count(), 1);
        assert_eq!(parsed.warnings.len(), 2);
        assert_eq!(parsed.warnings[0].entry, "No Audio");
        assert_eq!(parsed.warnings[1].entry, "Bad URL");
    }

    #[test]
    fn duplicate_guids_within_a_feed_are_dropped() {
        let xml = feed_with_items(
            r#"
    <item><title>First</title><guid>same</guid><enclosure url="https://example.com/1.mp3" type="audio/mpeg"/></item>
    <item><title>Second</title><guid>same</guid><enclosure url="https://example.com/2.mp3" type="audio/mpeg"/></item>"#,
        );
        let parsed = parse(&xml, &FeedOptions::default());

        assert_eq!(parsed.feed.episode_count(), 1);
        assert_eq!(parsed.feed.series[0].episodes[0].title, "First");
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn non_numeric_episode_numbers_are_absent() {
        let xml = feed_with_items(
            r#"
    <item><title>Trailer</title><guid>t</guid><itunes:episode>trailer</itunes:episode><itunes:season>two</itunes:season><enclosure url="https://example.com/t.mp3" type="audio/mpeg"/></item>"#,
        );
        let feed = parse(&xml, &FeedOptions::default()).feed;
        let ep = &feed.series[0].episodes[0];
        assert!(ep.episode_number.is_none());
        assert!(ep.season.is_none());
    }

    #[test]
    fn category_markers_split_series() {
        let xml = feed_with_items(
            r#"
    <item><title>X one</title><guid>A</guid><category domain="series">Series X</category><itunes:episode>1</itunes:episode><enclosure url="https://example.com/a.mp3" type="audio/mpeg"/></item>
    <item><title>Y one</title><guid>B</guid><category domain="series">Series Y</category><itunes:episode>1</itunes:episode><enclosure url="https://example.com/b.mp3" type="audio/mpeg"/></item>
    <item><title>Main</title><guid>C</guid><category>Technology</category><enclosure url="https://example.com/c.mp3" type="audio/mpeg"/></item>"#,
        );
        let feed = parse(&xml, &FeedOptions::default()).feed;

        let titles: Vec<_> = feed.series.iter().map(|s| s.series_title.as_str()).collect();
        assert_eq!(titles, vec!["Series X", "Series Y", "Network"]);

        let ids: HashSet<_> = feed.series.iter().map(|s| s.series_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(feed.series[0].episodes[0].series_id, feed.series[0].series_id);
    }

    #[test]
    fn series_ids_do_not_depend_on_entry_order() {
        let x = r#"<item><title>X</title><guid>A</guid><category domain="series">Series X</category><enclosure url="https://example.com/a.mp3" type="audio/mpeg"/></item>"#;
        let y = r#"<item><title>Y</title><guid>B</guid><category domain="series">Series Y</category><enclosure url="https://example.com/b.mp3" type="audio/mpeg"/></item>"#;

        let forward = parse(&feed_with_items(&format!("{x}{y}")), &FeedOptions::default()).feed;
        let reversed = parse(&feed_with_items(&format!("{y}{x}")), &FeedOptions::default()).feed;

        let id_of = |feed: &Feed, title: &str| {
            feed.series
                .iter()
                .find(|s| s.series_title == title)
                .map(|s| s.series_id.clone())
                .unwrap()
        };

        assert_eq!(id_of(&forward, "Series X"), id_of(&reversed, "Series X"));
        assert_eq!(id_of(&forward, "Series Y"), id_of(&reversed, "Series Y"));
    }

    #[test]
    fn title_prefix_dialect_splits_and_retitles() {
        let xml = feed_with_items(
            r#"
    <item><title>Bonus: Cake</title><guid>A</guid><enclosure url="https://example.com/a.mp3" type="audio/mpeg"/></item>
    <item><title>Regular show</title><guid>B</guid><enclosure url="https://example.com/b.mp3" type="audio/mpeg"/></item>"#,
        );
        let options = FeedOptions {
            dialect: SeriesDialect::TitlePrefix,
            ..Default::default()
        };
        let feed = parse(&xml, &options).feed;

        assert_eq!(feed.series.len(), 2);
        assert_eq!(feed.series[0].series_title, "Bonus");
        assert_eq!(feed.series[0].episodes[0].title, "Cake");
        assert_eq!(feed.series[1].series_title, "Network");
    }

    #[test]
    fn multiple_channels_become_separate_series() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Morning Show</title>
    <description>a</description>
    <image><url>https://example.com/morning.jpg</url><title>m</title><link>https://example.com</link></image>
    <item><title>Ep</title><guid>m1</guid><enclosure url="https://example.com/m1.mp3" type="audio/mpeg"/></item>
  </channel>
  <channel>
    <title>Evening Show</title>
    <description>b</description>
    <item><title>Ep</title><guid>e1</guid><enclosure url="https://example.com/e1.mp3" type="audio/mpeg"/></item>
  </channel>
</rss>"#;
        let feed = parse(xml, &FeedOptions::default()).feed;

        assert_eq!(feed.title, "Morning Show");
        assert_eq!(feed.series.len(), 2);
        assert_eq!(feed.series[0].series_title, "Morning Show");
        assert_eq!(
            feed.series[0].artwork_url,
            Some(Url::parse("https://example.com/morning.jpg").unwrap())
        );
        assert_eq!(feed.series[1].series_title, "Evening Show");
        assert_ne!(feed.series[0].series_id, feed.series[1].series_id);
    }

    #[test]
    fn plain_categories_are_used_without_itunes_ones() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Plain</title>
    <description>x</description>
    <category>News</category>
    <category> News </category>
    <category>Politics</category>
  </channel>
</rss>"#;
        let feed = parse(xml, &FeedOptions::default()).feed;
        assert_eq!(feed.categories, vec!["News", "Politics"]);
        assert_eq!(feed.copyright, None);
    }

    #[test]
    fn empty_feed_still_yields_default_series() {
        let feed = parse(&feed_with_items(""), &FeedOptions::default()).feed;
        assert_eq!(feed.series.len(), 1);
        assert!(feed.series[0].episodes.is_empty());
    }

    #[test]
    fn unparseable_document_is_an_error() {
        let result = parse_feed(
            b"<html><body>Not a feed</body></html>",
            feed_url(),
            &FeedOptions::default(),
        );
        assert!(matches!(result, Err(ParseError::Rss(_))));
    }

    #[test]
    fn relaxed_dates_are_accepted() {
        assert!(parse_relaxed_date("2024-01-15T10:00:00+01:00").is_some());
        assert!(parse_relaxed_date("15 Jan 2024 10:00:00 +0000").is_some());
        assert!(parse_relaxed_date("sometime last week").is_none());
    }

    #[test]
    fn split_channels_ignores_single_channel_documents() {
        assert!(split_channels(SAMPLE_FEED.as_bytes()).is_none());
    }

    #[test]
    fn channel_markup_inside_cdata_is_not_a_channel() {
        let xml = feed_with_items(
            r#"<item><title>Ep</title><guid>g1</guid>
            <description><![CDATA[<channel><title>Fake</title></channel><channel></channel>]]></description>
            <enclosure url="https://example.com/g1.mp3" type="audio/mpeg"/></item>
            <!-- <channel><title>Also fake</title></channel> -->"#,
        );
        assert!(split_channels(xml.as_bytes()).is_none());

        let feed = parse(&xml, &FeedOptions::default()).feed;
        assert_eq!(feed.series.len(), 1);
        assert_eq!(feed.series[0].series_title, "Network");
        assert_eq!(feed.episode_count(), 1);
    }

    #[test]
    fn split_channels_keeps_root_element_and_namespaces() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel><title>A</title><description><![CDATA[</channel>]]></description></channel>
  <channel><title>B</title></channel>
</rss>"#;
        let documents = split_channels(xml.as_bytes()).unwrap();

        assert_eq!(documents.len(), 2);
        assert!(documents[0].starts_with("<rss version=\"2.0\" xmlns:itunes="));
        assert!(documents[0].contains("<![CDATA[</channel>]]></description></channel></rss>"));
        assert!(documents[1].ends_with("<channel><title>B</title></channel></rss>"));
    }

    #[test]
    fn equal_markers_in_different_channels_stay_separate() {
        let channel = |title: &str, guid: &str| {
            format!(
                r#"<channel><title>{title}</title><description>x</description>
                <item><title>Ep</title><guid>{guid}</guid>
                <category domain="series">Interviews</category>
                <enclosure url="https://example.com/{guid}.mp3" type="audio/mpeg"/></item>
                </channel>"#
            )
        };
        let xml = format!(
            r#"<?xml version="1.0"?><rss version="2.0">{}{}</rss>"#,
            channel("Morning Show", "m1"),
            channel("Evening Show", "e1")
        );
        let feed = parse(&xml, &FeedOptions::default()).feed;

        let interviews: Vec<&SeriesStream> = feed
            .series
            .iter()
            .filter(|series| series.series_title == "Interviews")
            .collect();
        assert_eq!(interviews.len(), 2);
        assert_ne!(interviews[0].series_id, interviews[1].series_id);
        assert_eq!(interviews[0].episodes.len(), 1);
        assert_eq!(interviews[1].episodes.len(), 1);
    }
}
