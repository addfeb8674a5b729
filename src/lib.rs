// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod archive;
pub mod config;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod index;
pub mod metadata;
pub mod progress;
pub mod retry;
pub mod scan;
pub mod tagging;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use archive::{ArchivePlacer, Placement};
pub use config::{Config, FeedConfig};
pub use error::{
    ConfigError, DownloadError, EntryWarning, EpisodeError, FeedError, FetchError, HttpError,
    IndexError, ParseError, PlacementError, ScanError, TagWriteError,
};
pub use feed::{
    EpisodeRecord, Feed, FeedFetcher, FeedOptions, HttpFeedFetcher, ParsedFeed, SeriesDialect,
    SeriesStream, parse_feed,
};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use index::{EpisodeIndex, IndexEntry, JsonFileIndex, MemoryIndex, RecordOutcome};
pub use metadata::{MetadataResolver, TagSet};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use retry::RetryPolicy;
pub use scan::{EpisodeStage, ScanOptions, ScanReport, ScanSummary, ScanWarning, Scanner};
pub use tagging::{LoftyTagWriter, TagWriter};
