// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One pass over all subscribed feeds.
//!
//! A scan runs in two phases. Feeds are fetched and parsed concurrently, then
//! diffed against the index into a work list. The work list is drained by a
//! bounded pool of workers, each taking one episode through download,
//! metadata resolution, tagging, placement and indexing.

mod pipeline;
mod plan;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchivePlacer, STALE_TEMP_AGE};
use crate::config::{Config, FeedConfig, STATE_DIR_NAME};
use crate::episode::{DownloadContext, Downloader};
use crate::error::{EntryWarning, FeedError, IndexError, ScanError};
use crate::feed::{FeedFetcher, FeedOptions, HttpFeedFetcher, ParsedFeed, feed_url_for, parse_feed};
use crate::http::HttpClient;
use crate::index::EpisodeIndex;
use crate::metadata::MetadataResolver;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::retry::RetryPolicy;
use crate::tagging::{LoftyTagWriter, TagWriter};

use pipeline::{EpisodeOutcome, Pipeline};

pub use pipeline::EpisodeStage;
pub use plan::{FeedPlan, Planner, WorkItem};

/// Options for a scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub archive_root: PathBuf,
    /// Where downloads are staged between attempts and scans
    pub staging_dir: PathBuf,
    /// Maximum number of concurrent feed fetches and episode pipelines
    pub workers: usize,
    /// Maximum number of new episodes to schedule per feed (None = all)
    pub limit: Option<usize>,
    pub retry: RetryPolicy,
}

impl ScanOptions {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        let archive_root = archive_root.into();
        Self {
            staging_dir: archive_root.join(STATE_DIR_NAME).join("staging"),
            archive_root,
            workers: 3,
            limit: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            archive_root: config.archive_root.clone(),
            staging_dir: config.staging_dir(),
            workers: config.workers,
            limit: config.limit,
            retry: config.retry,
        }
    }
}

/// Something worth telling the user that did not stop an episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanWarning {
    /// A feed entry or channel was skipped
    Entry(EntryWarning),
    /// An episode was archived under a guid-suffixed name
    PathCollision {
        guid: String,
        planned: PathBuf,
        placed: PathBuf,
    },
    /// An episode was tagged without cover art
    Artwork { guid: String, message: String },
    /// Stale temporary files could not be swept
    Cleanup { message: String },
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry(warning) => write!(f, "{warning}"),
            Self::PathCollision {
                guid,
                planned,
                placed,
            } => write!(
                f,
                "{} was taken, archived {guid} as {}",
                planned.display(),
                placed.display()
            ),
            Self::Artwork { message, .. } => f.write_str(message),
            Self::Cleanup { message } => write!(f, "Cleanup failed: {message}"),
        }
    }
}

/// Outcome of fetching and planning one feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    Processed {
        title: String,
        series_count: usize,
        plan: FeedPlan,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReport {
    pub source: String,
    pub outcome: FeedOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedEpisode {
    pub guid: String,
    pub title: String,
    /// Path relative to the archive root
    pub path: PathBuf,
    pub collided: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEpisode {
    pub guid: String,
    pub title: String,
    pub error: String,
}

/// Counters for one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub feeds_processed: usize,
    pub feeds_failed: usize,
    /// Episodes found across all parsed feeds
    pub episodes_discovered: usize,
    /// Already indexed or seen earlier in the scan
    pub episodes_skipped: usize,
    /// New episodes left for a later scan by the limit
    pub episodes_deferred: usize,
    pub episodes_succeeded: usize,
    pub episodes_failed: usize,
    pub episodes_cancelled: usize,
    pub warnings: usize,
}

impl ScanSummary {
    /// True when episodes were attempted and none of them made it
    pub fn all_failed(&self) -> bool {
        self.episodes_failed > 0 && self.episodes_succeeded == 0
    }
}

/// Everything a scan did
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub summary: ScanSummary,
    pub feeds: Vec<FeedReport>,
    pub archived: Vec<ArchivedEpisode>,
    pub failed: Vec<FailedEpisode>,
    pub warnings: Vec<ScanWarning>,
}

/// Runs scans against one archive and index
pub struct Scanner<C> {
    client: Arc<C>,
    index: Arc<dyn EpisodeIndex>,
    fetcher: Arc<dyn FeedFetcher>,
    tag_writer: Arc<dyn TagWriter>,
    reporter: SharedProgressReporter,
    cancel: CancellationToken,
    options: ScanOptions,
}

impl<C: HttpClient + 'static> Scanner<C> {
    /// Scanner fetching feeds and audio through `client` and tagging with lofty
    pub fn new(client: C, index: Arc<dyn EpisodeIndex>, options: ScanOptions) -> Self {
        let client = Arc::new(client);
        let fetcher = Arc::new(HttpFeedFetcher::new(Arc::clone(&client), options.retry));
        Self {
            client,
            index,
            fetcher,
            tag_writer: Arc::new(LoftyTagWriter),
            reporter: NoopReporter::shared(),
            cancel: CancellationToken::new(),
            options,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn FeedFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_tag_writer(mut self, tag_writer: Arc<dyn TagWriter>) -> Self {
        self.tag_writer = tag_writer;
        self
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the scan when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one scan over `feeds`
    ///
    /// Feed and episode failures are recorded in the report. Only an index
    /// failure (or an unusable staging directory) aborts the scan.
    pub async fn scan(&self, feeds: &[FeedConfig]) -> Result<ScanReport, ScanError> {
        let mut report = ScanReport::default();
        let placer = ArchivePlacer::new(&self.options.archive_root);

        match placer.sweep_stale_temps(STALE_TEMP_AGE).await {
            Ok(0) => {}
            Ok(count) => {
                info!(count, "removed stale temporary files");
                self.reporter
                    .report(ProgressEvent::StaleFilesCleanedUp { count });
            }
            Err(e) => self.warn(&mut report, ScanWarning::Cleanup {
                message: e.to_string(),
            }),
        }

        let work = self.plan(feeds, &mut report).await?;

        tokio::fs::create_dir_all(&self.options.staging_dir)
            .await
            .map_err(|e| ScanError::StagingUnavailable {
                path: self.options.staging_dir.clone(),
                source: e,
            })?;

        let index_error = self.execute(work, placer, &mut report).await;

        report.summary.warnings = report.warnings.len();
        if let Some(e) = index_error {
            error!(error = %e, "scan aborted");
            return Err(ScanError::Index(e));
        }

        let summary = &report.summary;
        info!(
            feeds_processed = summary.feeds_processed,
            feeds_failed = summary.feeds_failed,
            discovered = summary.episodes_discovered,
            succeeded = summary.episodes_succeeded,
            failed = summary.episodes_failed,
            skipped = summary.episodes_skipped,
            deferred = summary.episodes_deferred,
            cancelled = summary.episodes_cancelled,
            warnings = summary.warnings,
            "scan finished"
        );
        self.reporter.report(ProgressEvent::ScanCompleted {
            summary: report.summary.clone(),
        });

        Ok(report)
    }

    /// Phase one: fetch and parse all feeds, then build the work list
    async fn plan(
        &self,
        feeds: &[FeedConfig],
        report: &mut ScanReport,
    ) -> Result<Vec<WorkItem>, IndexError> {
        let workers = self.options.workers.max(1);
        let mut loaded: Vec<(usize, Result<ParsedFeed, FeedError>)> =
            futures::stream::iter(feeds.iter().enumerate())
                .map(|(position, feed)| async move { (position, self.load_feed(feed).await) })
                .buffer_unordered(workers)
                .collect()
                .await;
        loaded.sort_by_key(|(position, _)| *position);

        let mut planner = Planner::new();
        for ((_, result), feed_config) in loaded.into_iter().zip(feeds) {
            let source = feed_config.url.clone();
            let parsed = match result {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(feed = %source, error = %e, "feed failed");
                    self.reporter.report(ProgressEvent::FeedFailed {
                        url: source.clone(),
                        error: e.to_string(),
                    });
                    report.summary.feeds_failed += 1;
                    report.feeds.push(FeedReport {
                        source,
                        outcome: FeedOutcome::Failed {
                            error: e.to_string(),
                        },
                    });
                    continue;
                }
            };

            for warning in parsed.warnings {
                self.warn(report, ScanWarning::Entry(warning));
            }

            let title = parsed.feed.title.clone();
            let series_count = parsed.feed.series.len();
            let plan = planner
                .add_feed(parsed.feed, self.index.as_ref(), self.options.limit)
                .await?;

            debug!(feed = %source, ?plan, "planned feed");
            self.reporter.report(ProgressEvent::FeedParsed {
                url: source.clone(),
                feed_title: title.clone(),
                series_count,
                total_episodes: plan.total_episodes,
                new_episodes: plan.new_episodes,
            });

            let summary = &mut report.summary;
            summary.feeds_processed += 1;
            summary.episodes_discovered += plan.total_episodes;
            summary.episodes_skipped += plan.skipped;
            summary.episodes_deferred += plan.deferred;
            report.feeds.push(FeedReport {
                source,
                outcome: FeedOutcome::Processed {
                    title,
                    series_count,
                    plan,
                },
            });
        }

        let (items, warnings) = planner.finish();
        for warning in warnings {
            self.warn(report, warning);
        }
        Ok(items)
    }

    async fn load_feed(&self, feed: &FeedConfig) -> Result<ParsedFeed, FeedError> {
        self.reporter.report(ProgressEvent::FetchingFeed {
            url: feed.url.clone(),
        });

        let bytes = self.fetcher.fetch(&feed.url).await?;
        let url = feed_url_for(&feed.url)?;
        let options = FeedOptions {
            series_name: feed.series_name.clone(),
            dialect: feed.series_marker,
        };
        Ok(parse_feed(&bytes, url, &options)?)
    }

    /// Phase two: drain the work list with a bounded worker pool
    ///
    /// Returns the first index error, after all started workers finished.
    async fn execute(
        &self,
        work: Vec<WorkItem>,
        placer: ArchivePlacer,
        report: &mut ScanReport,
    ) -> Option<IndexError> {
        if work.is_empty() {
            return None;
        }

        // Cancelled on index failure without touching the caller's token
        let cancel = self.cancel.child_token();
        let pipeline = Arc::new(Pipeline {
            downloader: Downloader::new(
                Arc::clone(&self.client),
                self.options.retry,
                cancel.clone(),
                self.reporter.clone(),
            ),
            resolver: MetadataResolver::new(Arc::clone(&self.client)),
            tag_writer: Arc::clone(&self.tag_writer),
            placer,
            index: Arc::clone(&self.index),
            reporter: self.reporter.clone(),
            staging_dir: self.options.staging_dir.clone(),
            cancel: cancel.clone(),
        });

        // The slot pool limits concurrency and hands out stable slot IDs
        let workers = self.options.workers.max(1);
        let (slot_tx, mut slot_rx) = tokio::sync::mpsc::channel(workers);
        for slot in 0..workers {
            let _ = slot_tx.try_send(slot);
        }

        let total_to_download = work.len();
        let mut handles = Vec::with_capacity(total_to_download);
        let mut not_started = 0;

        for (episode_index, item) in work.into_iter().enumerate() {
            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                slot = slot_rx.recv() => slot,
            };
            let Some(download_id) = slot else {
                not_started = total_to_download - episode_index;
                break;
            };

            let pipeline = Arc::clone(&pipeline);
            let slot_tx = slot_tx.clone();
            let title = item.record.title.clone();
            let guid = item.record.episode_guid.clone();

            let handle = tokio::spawn(async move {
                let context = DownloadContext {
                    download_id,
                    episode_index,
                    total_to_download,
                };
                let result = pipeline.run(item, context).await;

                // Return slot to the pool when done
                let _ = slot_tx.send(download_id).await;
                result
            });
            handles.push((guid, title, handle));
        }

        report.summary.episodes_cancelled += not_started;
        let mut index_error = None;

        for (guid, title, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(%guid, error = %e, "episode worker panicked");
                    report.summary.episodes_failed += 1;
                    report.failed.push(FailedEpisode {
                        guid,
                        title,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            for warning in result.warnings {
                self.warn(report, warning);
            }

            match result.outcome {
                EpisodeOutcome::Archived(archived) => {
                    report.summary.episodes_succeeded += 1;
                    report.archived.push(archived);
                }
                EpisodeOutcome::Failed(failed) => {
                    report.summary.episodes_failed += 1;
                    report.failed.push(failed);
                }
                EpisodeOutcome::Cancelled => report.summary.episodes_cancelled += 1,
                EpisodeOutcome::AlreadyRecorded | EpisodeOutcome::InUse => {
                    report.summary.episodes_skipped += 1
                }
                EpisodeOutcome::IndexFailed(e) => {
                    cancel.cancel();
                    if index_error.is_none() {
                        index_error = Some(e);
                    }
                }
            }
        }

        index_error
    }

    fn warn(&self, report: &mut ScanReport, warning: ScanWarning) {
        self.reporter.report(ProgressEvent::Warning {
            message: warning.to_string(),
        });
        report.warnings.push(warning);
    }
}
