// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lofty::config::WriteOptions;
use lofty::error::{ErrorKind, LoftyError};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagItem};
use tracing::debug;

use crate::error::TagWriteError;
use crate::metadata::{ImageFormat, TagSet};

const PODCAST_GENRE: &str = "Podcast";

/// Embeds a [`TagSet`] into an audio file in place
pub trait TagWriter: Send + Sync {
    fn write_tags(&self, path: &Path, tags: &TagSet) -> Result<(), TagWriteError>;
}

/// Tag writer backed by lofty
///
/// Writes into the container's primary tag format (ID3v2 for MP3 and WAV,
/// MP4 atoms for M4A, Vorbis comments for Ogg and FLAC). Audio frames are
/// left untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagWriter;

impl TagWriter for LoftyTagWriter {
    fn write_tags(&self, path: &Path, tags: &TagSet) -> Result<(), TagWriteError> {
        let mut tagged_file = Probe::open(path)
            .map_err(|e| read_error(path, e))?
            .guess_file_type()
            .map_err(|e| read_error(path, e.into()))?
            .read()
            .map_err(|e| read_error(path, e))?;

        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .tag_mut(tag_type)
            .ok_or_else(|| TagWriteError::NoWritableTag {
                path: path.to_path_buf(),
            })?;

        apply_tags(tag, tags);

        tagged_file
            .save_to_path(path, WriteOptions::default())
            .map_err(|e| TagWriteError::SaveFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        debug!(path = %path.display(), ?tag_type, "wrote tags");
        Ok(())
    }
}

fn read_error(path: &Path, error: LoftyError) -> TagWriteError {
    match error.kind() {
        ErrorKind::UnknownFormat => TagWriteError::UnsupportedFormat {
            path: path.to_path_buf(),
            source: error,
        },
        _ => TagWriteError::Corrupt {
            path: path.to_path_buf(),
            source: error,
        },
    }
}

fn apply_tags(tag: &mut Tag, tags: &TagSet) {
    tag.set_album(tags.series_title.clone());
    tag.set_title(tags.episode_title.clone());
    tag.insert_text(ItemKey::FlagPodcast, "1".to_string());

    if tags.categories.is_empty() {
        tag.set_genre(PODCAST_GENRE.to_string());
    } else {
        let categories = tags.categories.join(", ");
        tag.set_genre(format!("{categories}, {PODCAST_GENRE}"));
        tag.insert_text(ItemKey::PodcastSeriesCategory, categories);
    }

    if !tags.episode_guid.is_empty() {
        tag.insert_text(ItemKey::PodcastGlobalUniqueId, tags.episode_guid.clone());
    }
    // ID3v2 stores the episode page as a URL frame but the feed URL as text
    if let Some(ref url) = tags.episode_url {
        tag.insert(TagItem::new(
            ItemKey::AudioFileUrl,
            ItemValue::Locator(url.to_string()),
        ));
    }
    if let Some(ref url) = tags.feed_url {
        tag.insert_text(ItemKey::PodcastUrl, url.to_string());
    }
    if let Some(ref copyright) = tags.copyright {
        tag.insert_text(ItemKey::CopyrightMessage, copyright.clone());
    }

    if let Some(number) = tags.episode_number {
        tag.set_track(number);
    }
    if let Some(season) = tags.season {
        tag.set_disk(season);
    }

    let artists = tags.artists();
    if !artists.is_empty() {
        tag.set_artist(artists.join("; "));
    }
    if !tags.hosts.is_empty() {
        tag.insert_text(ItemKey::AlbumArtist, tags.hosts.join("; "));
    }
    if let Some(ref publisher) = tags.publisher {
        tag.insert_text(ItemKey::Publisher, publisher.clone());
    }
    if let Some(date) = tags.publish_date {
        tag.insert_text(
            ItemKey::RecordingDate,
            date.format("%Y-%m-%d").to_string(),
        );
    }
    if let Some(ref shownotes) = tags.shownotes {
        tag.set_comment(shownotes.clone());
        tag.insert_text(ItemKey::PodcastDescription, shownotes.clone());
    }

    if let Some(ref artwork) = tags.artwork {
        let mime = match artwork.format {
            ImageFormat::Jpeg => MimeType::Jpeg,
            ImageFormat::Png => MimeType::Png,
        };
        tag.remove_picture_type(PictureType::CoverFront);
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(mime),
            None,
            artwork.data.clone(),
        ));
    }
}

/// Run a tag writer on the blocking pool
pub async fn write_tags_blocking(
    writer: Arc<dyn TagWriter>,
    path: PathBuf,
    tags: TagSet,
) -> Result<(), TagWriteError> {
    tokio::task::spawn_blocking(move || writer.write_tags(&path, &tags)).await?
}
