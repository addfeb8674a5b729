// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::ArchivePlacer;
use crate::episode::{DownloadContext, Downloader, StagingClaim, staging_paths};
use crate::error::{DownloadError, EpisodeError, IndexError};
use crate::http::HttpClient;
use crate::index::{EpisodeIndex, IndexEntry, RecordOutcome};
use crate::metadata::MetadataResolver;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::tagging::{TagWriter, write_tags_blocking};

use super::plan::WorkItem;
use super::{ArchivedEpisode, FailedEpisode, ScanWarning};

/// Progress of one episode through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EpisodeStage {
    Discovered,
    Downloading,
    Downloaded,
    Tagging,
    Tagged,
    Placed,
    Indexed,
}

impl fmt::Display for EpisodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Tagging => "tagging",
            Self::Tagged => "tagged",
            Self::Placed => "placed",
            Self::Indexed => "indexed",
        };
        f.write_str(name)
    }
}

/// How a single episode's run ended
#[derive(Debug)]
pub(crate) enum EpisodeOutcome {
    Archived(ArchivedEpisode),
    Failed(FailedEpisode),
    Cancelled,
    /// Another writer recorded the guid first
    AlreadyRecorded,
    /// Another scan is archiving the same episode right now
    InUse,
    IndexFailed(IndexError),
}

#[derive(Debug)]
pub(crate) struct PipelineResult {
    pub outcome: EpisodeOutcome,
    pub warnings: Vec<ScanWarning>,
}

/// Everything an episode run needs, shared by all workers of one scan
pub(crate) struct Pipeline<C> {
    pub downloader: Downloader<Arc<C>>,
    pub resolver: MetadataResolver<Arc<C>>,
    pub tag_writer: Arc<dyn TagWriter>,
    pub placer: ArchivePlacer,
    pub index: Arc<dyn EpisodeIndex>,
    pub reporter: SharedProgressReporter,
    pub staging_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl<C: HttpClient> Pipeline<C> {
    /// Drive one work item from download to index entry
    ///
    /// Stages run strictly in order. Any failure before the index entry is
    /// written leaves the episode to be discovered again by the next scan.
    /// The episode's staging files are claimed for the whole run.
    pub async fn run(&self, item: WorkItem, context: DownloadContext) -> PipelineResult {
        let mut warnings = Vec::new();
        let outcome = self.process(&item, &context, &mut warnings).await;

        if let EpisodeOutcome::Failed(ref failed) = outcome {
            warn!(guid = %failed.guid, title = %failed.title, error = %failed.error, "episode failed");
            self.reporter.report(ProgressEvent::EpisodeFailed {
                download_id: context.download_id,
                episode_title: failed.title.clone(),
                error: failed.error.clone(),
            });
        }

        PipelineResult { outcome, warnings }
    }

    async fn process(
        &self,
        item: &WorkItem,
        context: &DownloadContext,
        warnings: &mut Vec<ScanWarning>,
    ) -> EpisodeOutcome {
        let record = &item.record;
        let fail = |error: EpisodeError| {
            EpisodeOutcome::Failed(FailedEpisode {
                guid: record.episode_guid.clone(),
                title: record.title.clone(),
                error: error.to_string(),
            })
        };

        if self.cancel.is_cancelled() {
            return EpisodeOutcome::Cancelled;
        }

        let paths = staging_paths(&self.staging_dir, record);
        let _claim = match StagingClaim::acquire(&paths).await {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                debug!(guid = %record.episode_guid, "episode is being archived by another scan");
                return EpisodeOutcome::InUse;
            }
            Err(e) => {
                return fail(EpisodeError::ClaimFailed {
                    path: paths.lock.clone(),
                    source: e,
                });
            }
        };

        // A scan that held the claim before us may have finished the episode
        match self.index.contains(&record.episode_guid).await {
            Ok(false) => {}
            Ok(true) => return EpisodeOutcome::AlreadyRecorded,
            Err(e) => {
                error!(guid = %record.episode_guid, error = %e, "failed to read index");
                self.cancel.cancel();
                return EpisodeOutcome::IndexFailed(e);
            }
        }

        self.stage(context, record.title.as_str(), EpisodeStage::Downloading);
        let staged = match self.downloader.download(record, &paths, context).await {
            Ok(staged) => staged,
            Err(DownloadError::Cancelled) => {
                debug!(guid = %record.episode_guid, "download cancelled");
                return EpisodeOutcome::Cancelled;
            }
            Err(e) => return fail(e.into()),
        };
        self.stage(context, &record.title, EpisodeStage::Downloaded);

        let resolved = self
            .resolver
            .resolve(record, item.series(), &item.feed)
            .await;
        for message in resolved.warnings {
            warnings.push(ScanWarning::Artwork {
                guid: record.episode_guid.clone(),
                message,
            });
        }

        self.stage(context, &record.title, EpisodeStage::Tagging);
        if let Err(e) =
            write_tags_blocking(Arc::clone(&self.tag_writer), staged.path.clone(), resolved.tags)
                .await
        {
            // Tagged bytes are never resumed from
            let _ = tokio::fs::remove_file(&staged.path).await;
            return fail(e.into());
        }
        self.stage(context, &record.title, EpisodeStage::Tagged);

        let placement = match self
            .placer
            .place(&staged.path, &item.relative_path, &record.episode_guid)
            .await
        {
            Ok(placement) => placement,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staged.path).await;
                return fail(e.into());
            }
        };
        if placement.collided {
            warnings.push(ScanWarning::PathCollision {
                guid: record.episode_guid.clone(),
                planned: item.relative_path.clone(),
                placed: placement.relative.clone(),
            });
        }
        self.stage(context, &record.title, EpisodeStage::Placed);

        let entry = IndexEntry {
            episode_guid: record.episode_guid.clone(),
            series_id: record.series_id.clone(),
            feed_url: item.feed.url.to_string(),
            processed_at: Utc::now(),
            archive_path: placement.relative.clone(),
            content_hash: staged.content_hash,
        };

        match self.index.record_done(entry).await {
            Ok(RecordOutcome::Recorded) => {
                self.stage(context, &record.title, EpisodeStage::Indexed);
                info!(
                    guid = %record.episode_guid,
                    path = %placement.relative.display(),
                    "archived episode"
                );
                self.reporter.report(ProgressEvent::EpisodeArchived {
                    download_id: context.download_id,
                    episode_title: record.title.clone(),
                    path: placement.path.clone(),
                });
                EpisodeOutcome::Archived(ArchivedEpisode {
                    guid: record.episode_guid.clone(),
                    title: record.title.clone(),
                    path: placement.relative,
                    collided: placement.collided,
                })
            }
            Ok(RecordOutcome::AlreadyExists) => {
                warn!(guid = %record.episode_guid, "episode was recorded concurrently, removing duplicate");
                self.placer.discard(&placement).await;
                EpisodeOutcome::AlreadyRecorded
            }
            Err(e) => {
                error!(guid = %record.episode_guid, error = %e, "failed to record episode");
                // Without a working index no further episode can finish
                self.cancel.cancel();
                self.placer.discard(&placement).await;
                EpisodeOutcome::IndexFailed(e)
            }
        }
    }

    fn stage(&self, context: &DownloadContext, title: &str, stage: EpisodeStage) {
        debug!(slot = context.download_id, episode = %title, %stage, "stage changed");
        self.reporter.report(ProgressEvent::StageChanged {
            download_id: context.download_id,
            episode_title: title.to_string(),
            stage,
        });
    }
}
