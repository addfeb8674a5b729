// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::IndexError;

use super::{EpisodeIndex, IndexEntry, RecordOutcome};

/// Index held in memory only
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: Mutex<HashMap<String, IndexEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// All entries, in no particular order
    pub async fn entries(&self) -> Vec<IndexEntry> {
        self.entries.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl EpisodeIndex for MemoryIndex {
    async fn contains(&self, guid: &str) -> Result<bool, IndexError> {
        Ok(self.entries.lock().await.contains_key(guid))
    }

    async fn get(&self, guid: &str) -> Result<Option<IndexEntry>, IndexError> {
        Ok(self.entries.lock().await.get(guid).cloned())
    }

    async fn record_done(&self, entry: IndexEntry) -> Result<RecordOutcome, IndexError> {
        match self.entries.lock().await.entry(entry.episode_guid.clone()) {
            Entry::Occupied(_) => Ok(RecordOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(RecordOutcome::Recorded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn entry(guid: &str) -> IndexEntry {
        IndexEntry {
            episode_guid: guid.to_string(),
            series_id: "series".to_string(),
            feed_url: "https://example.com/feed.xml".to_string(),
            processed_at: Utc::now(),
            archive_path: PathBuf::from("Show/1 - Pilot.mp3"),
            content_hash: "sha256:00".to_string(),
        }
    }

    #[tokio::test]
    async fn record_then_contains() {
        let index = MemoryIndex::new();
        assert!(!index.contains("a").await.unwrap());

        let outcome = index.record_done(entry("a")).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Recorded);
        assert!(index.contains("a").await.unwrap());
        assert_eq!(index.get("a").await.unwrap().unwrap().episode_guid, "a");
        assert!(index.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_record_reports_already_exists() {
        let index = MemoryIndex::new();
        index.record_done(entry("a")).await.unwrap();

        let mut changed = entry("a");
        changed.archive_path = PathBuf::from("elsewhere.mp3");
        let outcome = index.record_done(changed).await.unwrap();

        assert_eq!(outcome, RecordOutcome::AlreadyExists);
        assert_eq!(
            index.get("a").await.unwrap().unwrap().archive_path,
            PathBuf::from("Show/1 - Pilot.mp3")
        );
    }

    #[tokio::test]
    async fn concurrent_claims_have_a_single_winner() {
        let index = Arc::new(MemoryIndex::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let index = index.clone();
            handles.push(tokio::spawn(
                async move { index.record_done(entry("race")).await },
            ));
        }

        let mut recorded = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == RecordOutcome::Recorded {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 1);
        assert_eq!(index.len().await, 1);
    }
}
