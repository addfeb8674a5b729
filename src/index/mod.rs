// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent record of processed episodes.
//!
//! The index is the only authority on whether an episode is done. Backends
//! must make [`EpisodeIndex::record_done`] an atomic check-and-set per guid.

mod file;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

pub use file::JsonFileIndex;
pub use memory::MemoryIndex;

/// A processed episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub episode_guid: String,
    pub series_id: String,
    pub feed_url: String,
    pub processed_at: DateTime<Utc>,
    /// Path of the archived file, relative to the archive root
    pub archive_path: PathBuf,
    /// Hash of the downloaded audio before tagging
    pub content_hash: String,
}

/// Result of trying to mark an episode as done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyExists,
}

#[async_trait]
pub trait EpisodeIndex: Send + Sync {
    async fn contains(&self, guid: &str) -> Result<bool, IndexError>;

    async fn get(&self, guid: &str) -> Result<Option<IndexEntry>, IndexError>;

    /// Insert `entry` unless its guid is already present
    async fn record_done(&self, entry: IndexEntry) -> Result<RecordOutcome, IndexError>;
}
