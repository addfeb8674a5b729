// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::episode::{SeasonLayout, relative_archive_path, with_guid_suffix};
use crate::error::IndexError;
use crate::feed::{EpisodeRecord, Feed, SeriesStream};
use crate::index::EpisodeIndex;

use super::ScanWarning;

/// One new episode scheduled for this scan
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub record: EpisodeRecord,
    pub feed: Arc<Feed>,
    series_index: usize,
    /// Destination below the archive root
    pub relative_path: PathBuf,
}

impl WorkItem {
    pub fn series(&self) -> &SeriesStream {
        &self.feed.series[self.series_index]
    }
}

/// What planning decided for one feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedPlan {
    pub total_episodes: usize,
    /// Episodes not yet in the index
    pub new_episodes: usize,
    pub scheduled: usize,
    /// Already indexed, or scheduled earlier in this scan
    pub skipped: usize,
    /// New, but beyond the per-scan limit
    pub deferred: usize,
}

struct Candidate<'a> {
    series_index: usize,
    layout: SeasonLayout,
    ordinal: usize,
    record: &'a EpisodeRecord,
}

/// Builds the scan's work list feed by feed
///
/// A guid is scheduled at most once per scan, and no two work items share a
/// destination path.
#[derive(Default)]
pub struct Planner {
    seen_guids: HashSet<String>,
    claimed_paths: HashSet<String>,
    items: Vec<WorkItem>,
    warnings: Vec<ScanWarning>,
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff a parsed feed against the index and schedule its new episodes
    ///
    /// With a `limit`, only the oldest new episodes of the feed are scheduled.
    pub async fn add_feed(
        &mut self,
        feed: Feed,
        index: &dyn EpisodeIndex,
        limit: Option<usize>,
    ) -> Result<FeedPlan, IndexError> {
        let feed = Arc::new(feed);
        let mut plan = FeedPlan {
            total_episodes: feed.episode_count(),
            ..FeedPlan::default()
        };

        let mut candidates = Vec::new();
        for (series_index, series) in feed.series.iter().enumerate() {
            let layout = SeasonLayout::for_series(series);
            for (position, record) in series.episodes.iter().enumerate() {
                if !self.seen_guids.insert(record.episode_guid.clone()) {
                    debug!(guid = %record.episode_guid, "guid already seen in this scan");
                    plan.skipped += 1;
                    continue;
                }
                if index.contains(&record.episode_guid).await? {
                    plan.skipped += 1;
                    continue;
                }
                candidates.push(Candidate {
                    series_index,
                    layout,
                    ordinal: position + 1,
                    record,
                });
            }
        }

        plan.new_episodes = candidates.len();
        candidates.sort_by_key(|c| {
            (
                c.record.publish_date.is_none(),
                c.record.publish_date,
                Reverse(c.record.feed_position),
            )
        });
        if let Some(limit) = limit {
            plan.deferred = candidates.len().saturating_sub(limit);
            candidates.truncate(limit);
        }
        plan.scheduled = candidates.len();

        for candidate in candidates {
            let series = &feed.series[candidate.series_index];
            let planned = relative_archive_path(
                &series.series_title,
                candidate.layout,
                candidate.record,
                candidate.ordinal,
            );
            let relative_path = self.claim(planned, &candidate.record.episode_guid);

            self.items.push(WorkItem {
                record: candidate.record.clone(),
                feed: Arc::clone(&feed),
                series_index: candidate.series_index,
                relative_path,
            });
        }

        Ok(plan)
    }

    /// Reserve a destination, suffixing it if another item already holds it
    fn claim(&mut self, planned: PathBuf, guid: &str) -> PathBuf {
        if self.claimed_paths.insert(claim_key(&planned)) {
            return planned;
        }

        let suffixed = with_guid_suffix(&planned, guid);
        warn!(
            %guid,
            planned = %planned.display(),
            placed = %suffixed.display(),
            "two episodes share an archive path, adding guid suffix"
        );
        self.claimed_paths.insert(claim_key(&suffixed));
        self.warnings.push(ScanWarning::PathCollision {
            guid: guid.to_string(),
            planned,
            placed: suffixed.clone(),
        });
        suffixed
    }

    pub fn finish(self) -> (Vec<WorkItem>, Vec<ScanWarning>) {
        (self.items, self.warnings)
    }
}

/// Paths differing only in case collide on some filesystems
fn claim_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}
