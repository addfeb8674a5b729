// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::scan::{EpisodeStage, ScanSummary};

/// Events emitted during a scan for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Feed is being fetched
    FetchingFeed { url: String },

    /// Feed has been parsed and diffed against the index
    FeedParsed {
        url: String,
        feed_title: String,
        series_count: usize,
        total_episodes: usize,
        new_episodes: usize,
    },

    /// Feed could not be fetched or parsed
    FeedFailed { url: String, error: String },

    /// Leftover temporary files from interrupted runs were removed
    StaleFilesCleanedUp { count: usize },

    /// An episode pipeline moved to a new stage
    StageChanged {
        /// Identifies the worker slot (0 to workers-1)
        download_id: usize,
        episode_title: String,
        stage: EpisodeStage,
    },

    /// A download is starting
    DownloadStarting {
        /// Identifies the worker slot (0 to workers-1)
        download_id: usize,
        episode_title: String,
        /// Index of this episode in the work list
        episode_index: usize,
        /// Total number of episodes in the work list
        total_to_download: usize,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
        /// Bytes already present from an earlier, interrupted attempt
        resumed_from: u64,
    },

    /// Download progress update
    DownloadProgress {
        download_id: usize,
        episode_title: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// A download completed and was validated
    DownloadCompleted {
        download_id: usize,
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// An episode reached the archive and the index
    EpisodeArchived {
        download_id: usize,
        episode_title: String,
        path: PathBuf,
    },

    /// An episode was abandoned for this scan
    EpisodeFailed {
        download_id: usize,
        episode_title: String,
        error: String,
    },

    /// A non-fatal problem worth surfacing
    Warning { message: String },

    /// Scan finished
    ScanCompleted { summary: ScanSummary },
}

/// Trait for reporting progress events during a scan.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

/// Keeps every event it receives
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
