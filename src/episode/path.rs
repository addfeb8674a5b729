// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::feed::{EpisodeRecord, SeriesStream};

/// Maximum length (in characters) of a single path component
const MAX_COMPONENT_LENGTH: usize = 100;

/// Directory for unseasoned episodes of a seasoned series
pub const SPECIALS_DIR: &str = "Specials";

/// Whether a series gets per-season directories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonLayout {
    /// No episode has a season: files live directly in the series directory
    Flat,
    /// `Season NN` directories, unseasoned episodes under `Specials`
    Seasoned,
}

impl SeasonLayout {
    pub fn for_series(series: &SeriesStream) -> Self {
        if series.has_seasons() {
            Self::Seasoned
        } else {
            Self::Flat
        }
    }
}

/// Identifier placed before the title in the file name
///
/// Episode number if known, else the publish date, else the 1-based position
/// of the episode in its series.
pub fn episode_label(record: &EpisodeRecord, ordinal: usize) -> String {
    match (record.episode_number, record.publish_date) {
        (Some(number), _) => number.to_string(),
        (None, Some(date)) => date.format("%Y-%m-%d").to_string(),
        (None, None) => format!("undated-{ordinal}"),
    }
}

/// Season directory for an episode, if the layout uses one
pub fn season_dir(layout: SeasonLayout, record: &EpisodeRecord) -> Option<String> {
    match layout {
        SeasonLayout::Flat => None,
        SeasonLayout::Seasoned => Some(match record.season {
            Some(season) => format!("Season {season:02}"),
            None => SPECIALS_DIR.to_string(),
        }),
    }
}

/// Path of an episode relative to the archive root
///
/// Shape: `<series>/<season dir?>/<label> - <title>.<ext>`
pub fn relative_archive_path(
    series_title: &str,
    layout: SeasonLayout,
    record: &EpisodeRecord,
    ordinal: usize,
) -> PathBuf {
    let mut path = PathBuf::from(sanitize_component(series_title, "Untitled Podcast"));
    if let Some(dir) = season_dir(layout, record) {
        path.push(dir);
    }

    path.push(format!(
        "{} - {}.{}",
        episode_label(record, ordinal),
        sanitize_component(&record.title, "Untitled Episode"),
        get_audio_extension(record)
    ));
    path
}

/// Hex SHA-256 of an episode guid
pub fn guid_digest(guid: &str) -> String {
    format!("{:x}", Sha256::digest(guid.as_bytes()))
}

/// Short guid-derived tag used to disambiguate colliding paths
pub fn guid_tag(guid: &str) -> String {
    guid_digest(guid)[..8].to_string()
}

/// `dir/1 - Title.mp3` becomes `dir/1 - Title [1a2b3c4d].mp3`
pub fn with_guid_suffix(path: &Path, guid: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem} [{}].{}", guid_tag(guid), ext.to_string_lossy()),
        None => format!("{stem} [{}]", guid_tag(guid)),
    };
    path.with_file_name(name)
}

/// Get the audio file extension from an episode's enclosure
///
/// Attempts to extract from URL path or MIME type, defaults to "mp3"
pub fn get_audio_extension(record: &EpisodeRecord) -> String {
    if let Some(ext) = record
        .audio_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|filename| filename.rsplit_once('.').map(|(_, ext)| ext))
        .filter(|ext| is_valid_audio_extension(ext))
    {
        return ext.to_lowercase();
    }

    if let Some(ref mime) = record.audio_mime
        && let Some(ext) = mime_to_extension(mime)
    {
        return ext.to_string();
    }

    "mp3".to_string()
}

/// Make a single path component safe on common filesystems
fn sanitize_component(raw: &str, fallback: &str) -> String {
    let options = sanitize_filename::Options {
        truncate: false,
        windows: true,
        replacement: " ",
    };
    let sanitized = sanitize_filename::sanitize_with_options(raw, options);
    let collapsed = collapse_whitespace(&sanitized);
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == '-' || c.is_whitespace());
    let truncated = truncate_at_boundary(trimmed, MAX_COMPONENT_LENGTH);

    if truncated.is_empty() {
        fallback.to_string()
    } else {
        truncated
    }
}

/// Collapse runs of whitespace into single spaces
fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_space = false;

    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                result.push(' ');
                last_was_space = true;
            }
        } else {
            result.push(c);
            last_was_space = false;
        }
    }

    result
}

/// Truncate string at a word boundary
fn truncate_at_boundary(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }

    let truncated: String = s.chars().take(max_len).collect();
    if let Some(pos) = truncated.rfind(' ')
        && truncated[..pos].chars().count() > max_len / 2
    {
        return truncated[..pos].trim_end().to_string();
    }

    truncated.trim_end().to_string()
}

fn is_valid_audio_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "opus" | "wav" | "flac"
    )
}

fn mime_to_extension(mime: &str) -> Option<&'static str> {
    match mime.to_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}
