// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the HTTP transport
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error {status} for {url}")]
    Status { url: String, status: u16 },
}

/// A feed (or any other resource) could not be retrieved
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to fetch {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("Failed to read feed file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The feed document itself could not be understood
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to parse RSS feed: {0}")]
    Rss(#[from] rss::Error),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// A single feed entry was skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Skipped entry '{entry}' in {feed_url}: {reason}")]
pub struct EntryWarning {
    pub feed_url: String,
    pub entry: String,
    pub reason: String,
}

/// Errors that abort processing of a single feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Errors that can occur during episode downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Server rejected resume range for {url}")]
    RangeNotSatisfiable { url: String },

    #[error("Server resumed {url} at byte {returned}, requested {requested}")]
    RangeMismatch {
        url: String,
        requested: u64,
        returned: u64,
    },

    #[error("Failed to open staging file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to staging file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read staging file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Downloaded {actual} bytes from {url}, expected {expected}")]
    LengthMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("Empty response body from {url}")]
    EmptyBody { url: String },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Whether the staged bytes can no longer be trusted and must be discarded
    pub fn invalidates_partial(&self) -> bool {
        matches!(
            self,
            Self::LengthMismatch { .. }
                | Self::EmptyBody { .. }
                | Self::RangeNotSatisfiable { .. }
                | Self::RangeMismatch { .. }
        )
    }
}

/// Errors that can occur while embedding tags into an audio file
#[derive(Error, Debug)]
pub enum TagWriteError {
    #[error("Unrecognized audio container {path}: {source}")]
    UnsupportedFormat {
        path: PathBuf,
        #[source]
        source: lofty::error::LoftyError,
    },

    #[error("Corrupt audio container {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: lofty::error::LoftyError,
    },

    #[error("Failed to save tags to {path}: {source}")]
    SaveFailed {
        path: PathBuf,
        #[source]
        source: lofty::error::LoftyError,
    },

    #[error("No writable tag for {path}")]
    NoWritableTag { path: PathBuf },

    #[error("Tag writer task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Errors that can occur while moving a file into the archive
#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stage {from} at {to}: {source}")]
    StageFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} into place at {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by an episode index backend
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to read index {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write index {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize index: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Index backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors that abandon a single episode for the current scan
#[derive(Error, Debug)]
pub enum EpisodeError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    TagWrite(#[from] TagWriteError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("Failed to claim staging files {path}: {source}")]
    ClaimFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur when loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that abort a whole scan
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Failed to prepare staging directory {path}: {source}")]
    StagingUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
