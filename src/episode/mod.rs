mod download;
mod path;

pub use download::{
    DownloadContext, Downloader, StagedDownload, StagingClaim, StagingPaths, staging_paths,
};
pub use path::{
    SPECIALS_DIR, SeasonLayout, episode_label, get_audio_extension, guid_tag,
    relative_archive_path, season_dir, with_guid_suffix,
};
