// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::IndexError;

use super::{EpisodeIndex, IndexEntry, RecordOutcome};

const INDEX_VERSION: u32 = 1;

/// On-disk layout of the index file
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: Vec<IndexEntry>,
}

/// Index persisted as a JSON flat file
///
/// Every successful `record_done` rewrites the file through a temporary file
/// and a rename, so a crash leaves either the old or the new index behind.
/// Updates are serialized by an internal lock; share one handle between
/// concurrent workers.
#[derive(Debug)]
pub struct JsonFileIndex {
    path: PathBuf,
    entries: Mutex<HashMap<String, IndexEntry>>,
}

impl JsonFileIndex {
    /// Open the index at `path`, starting empty if it does not exist yet
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => {
                let file: IndexFile =
                    serde_json::from_str(&content).map_err(|e| IndexError::Corrupt {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                file.entries
                    .into_iter()
                    .map(|entry| (entry.episode_guid.clone(), entry))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(IndexError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        debug!(path = %path.display(), entries = entries.len(), "opened episode index");

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &HashMap<String, IndexEntry>) -> Result<(), IndexError> {
        let mut sorted: Vec<IndexEntry> = entries.values().cloned().collect();
        sorted.sort_by(|a, b| {
            a.processed_at
                .cmp(&b.processed_at)
                .then_with(|| a.episode_guid.cmp(&b.episode_guid))
        });

        let json = serde_json::to_string_pretty(&IndexFile {
            version: INDEX_VERSION,
            entries: sorted,
        })?;

        let write_failed = |e| IndexError::WriteFailed {
            path: self.path.clone(),
            source: e,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(write_failed)?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, json).await.map_err(write_failed)?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(write_failed(e));
        }
        Ok(())
    }
}

#[async_trait]
impl EpisodeIndex for JsonFileIndex {
    async fn contains(&self, guid: &str) -> Result<bool, IndexError> {
        Ok(self.entries.lock().await.contains_key(guid))
    }

    async fn get(&self, guid: &str) -> Result<Option<IndexEntry>, IndexError> {
        Ok(self.entries.lock().await.get(guid).cloned())
    }

    async fn record_done(&self, entry: IndexEntry) -> Result<RecordOutcome, IndexError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&entry.episode_guid) {
            return Ok(RecordOutcome::AlreadyExists);
        }

        let guid = entry.episode_guid.clone();
        entries.insert(guid.clone(), entry);

        if let Err(e) = self.persist(&entries).await {
            error!(%guid, error = %e, "failed to persist episode index");
            entries.remove(&guid);
            return Err(e);
        }
        Ok(RecordOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn entry(guid: &str) -> IndexEntry {
        IndexEntry {
            episode_guid: guid.to_string(),
            series_id: "0123456789abcdef".to_string(),
            feed_url: "https://example.com/feed.xml".to_string(),
            processed_at: Utc::now(),
            archive_path: PathBuf::from(format!("Show/{guid}.mp3")),
            content_hash: "sha256:abc".to_string(),
        }
    }

    #[tokio::test]
    async fn open_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let index = JsonFileIndex::open(&dir.path().join("index.json")).unwrap();
        assert!(!index.contains("a").await.unwrap());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("index.json");

        let index = JsonFileIndex::open(&path).unwrap();
        index.record_done(entry("a")).await.unwrap();
        index.record_done(entry("b")).await.unwrap();
        drop(index);

        let reopened = JsonFileIndex::open(&path).unwrap();
        assert!(reopened.contains("a").await.unwrap());
        assert!(reopened.contains("b").await.unwrap());
        assert_eq!(
            reopened.get("a").await.unwrap().unwrap().archive_path,
            PathBuf::from("Show/a.mp3")
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn duplicate_record_is_rejected() {
        let dir = tempdir().unwrap();
        let index = JsonFileIndex::open(&dir.path().join("index.json")).unwrap();

        assert_eq!(
            index.record_done(entry("a")).await.unwrap(),
            RecordOutcome::Recorded
        );
        assert_eq!(
            index.record_done(entry("a")).await.unwrap(),
            RecordOutcome::AlreadyExists
        );
    }

    #[test]
    fn open_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            JsonFileIndex::open(&path),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn failed_persist_rolls_back_entry() {
        let dir = tempdir().unwrap();
        // A directory where the index file should be makes the rename fail
        let path = dir.path().join("index.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let index = JsonFileIndex {
            path: path.clone(),
            entries: Mutex::new(HashMap::new()),
        };

        let result = index.record_done(entry("a")).await;
        assert!(matches!(result, Err(IndexError::WriteFailed { .. })));
        assert!(!index.contains("a").await.unwrap());
    }
}
