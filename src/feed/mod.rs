mod fetch;
mod parse;
mod series;

pub use fetch::{FeedFetcher, HttpFeedFetcher, feed_url_for, fetch_feed_bytes, is_url, read_feed_file};
pub use parse::{EpisodeRecord, Feed, FeedOptions, ParsedFeed, SeriesStream, parse_feed};
pub use series::{
    CategoryMarker, DEFAULT_SERIES_KEY, NoMarker, SeriesDialect, SeriesMarker,
    SeriesMarkerExtractor, TitlePrefixMarker, derive_series_id, extractor_for,
};
