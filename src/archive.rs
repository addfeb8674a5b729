// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::episode::{guid_tag, with_guid_suffix};
use crate::error::PlacementError;

const TEMP_PREFIX: &str = ".podshelf-";
const TEMP_SUFFIX: &str = ".tmp";
const COMPARE_BUFFER_SIZE: usize = 64 * 1024;

/// Temporary files younger than this may belong to a scan still running
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

static NEXT_PLACER: AtomicU64 = AtomicU64::new(0);

/// Where an episode ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Absolute path of the archived file
    pub path: PathBuf,
    /// Path relative to the archive root
    pub relative: PathBuf,
    /// Whether the planned path was taken and a guid suffix was added
    pub collided: bool,
    /// Whether an identical file was already at the path and was kept
    pub reused_existing: bool,
}

/// Moves tagged files into the archive without ever exposing partial files
///
/// Every placer names its temporary files with its own token, so placers of
/// overlapping scans never share a temporary file.
#[derive(Debug, Clone)]
pub struct ArchivePlacer {
    root: PathBuf,
    token: String,
}

impl ArchivePlacer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let serial = NEXT_PLACER.fetch_add(1, Ordering::Relaxed);
        Self {
            root: root.into(),
            token: format!("{:x}-{serial:x}", std::process::id()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Place `staged` at `relative` below the archive root
    ///
    /// The file is first moved to a hidden temporary file in the destination
    /// directory, then linked to its final name. An existing file at the final
    /// name is never replaced; the episode goes to a guid-suffixed name
    /// instead, which belongs to that guid alone.
    pub async fn place(
        &self,
        staged: &Path,
        relative: &Path,
        guid: &str,
    ) -> Result<Placement, PlacementError> {
        let target = self.root.join(relative);
        let dir = target.parent().unwrap_or(self.root.as_path()).to_path_buf();

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PlacementError::CreateDirectoryFailed {
                path: dir.clone(),
                source: e,
            })?;

        let temp = dir.join(self.temp_file_name(guid));
        if let Err(e) = stage_into(staged, &temp).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PlacementError::StageFailed {
                from: staged.to_path_buf(),
                to: temp,
                source: e,
            });
        }

        let result = self.link_into_place(&temp, &target, relative, guid).await;
        let _ = tokio::fs::remove_file(&temp).await;
        result
    }

    async fn link_into_place(
        &self,
        temp: &Path,
        target: &Path,
        relative: &Path,
        guid: &str,
    ) -> Result<Placement, PlacementError> {
        let taken = match tokio::fs::hard_link(temp, target).await {
            Ok(()) => {
                debug!(path = %target.display(), "placed episode");
                return Ok(Placement {
                    path: target.to_path_buf(),
                    relative: relative.to_path_buf(),
                    collided: false,
                    reused_existing: false,
                });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => true,
            Err(e) => {
                // No hard links on this filesystem
                debug!(error = %e, "hard link failed, falling back to rename");
                tokio::fs::try_exists(target).await.unwrap_or(true)
            }
        };

        if !taken {
            rename(temp, target).await?;
            return Ok(Placement {
                path: target.to_path_buf(),
                relative: relative.to_path_buf(),
                collided: false,
                reused_existing: false,
            });
        }

        if same_contents(temp, target).await {
            debug!(path = %target.display(), "identical file already in place");
            return Ok(Placement {
                path: target.to_path_buf(),
                relative: relative.to_path_buf(),
                collided: false,
                reused_existing: true,
            });
        }

        let suffixed = with_guid_suffix(target, guid);
        warn!(
            planned = %target.display(),
            placed = %suffixed.display(),
            "archive path already taken, adding guid suffix"
        );
        rename(temp, &suffixed).await?;

        Ok(Placement {
            relative: with_guid_suffix(relative, guid),
            path: suffixed,
            collided: true,
            reused_existing: false,
        })
    }

    /// Remove a file placed by [`ArchivePlacer::place`]
    ///
    /// A reused file was not written by this placement and is left alone.
    pub async fn discard(&self, placement: &Placement) {
        if placement.reused_existing {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&placement.path).await {
            warn!(path = %placement.path.display(), error = %e, "failed to remove placed file");
        }
    }

    /// Delete temporary files left behind by interrupted placements
    ///
    /// Only files last modified at least `older_than` ago are removed. The
    /// walk runs on the blocking pool. Returns how many files were removed.
    pub async fn sweep_stale_temps(&self, older_than: Duration) -> Result<usize, PlacementError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || sweep_dir_tree(&root, older_than))
            .await
            .map_err(|e| PlacementError::ReadDirectoryFailed {
                path: self.root.clone(),
                source: std::io::Error::other(e),
            })?
    }

    fn temp_file_name(&self, guid: &str) -> String {
        format!("{TEMP_PREFIX}{}-{}{TEMP_SUFFIX}", guid_tag(guid), self.token)
    }
}

fn sweep_dir_tree(root: &Path, older_than: Duration) -> Result<usize, PlacementError> {
    if !root.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| PlacementError::ReadDirectoryFailed {
            path: dir.clone(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| PlacementError::ReadDirectoryFailed {
                path: dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !is_temp_file(&path) {
                continue;
            }

            // A modification time in the future counts as fresh
            let stale = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= older_than);
            if stale && std::fs::remove_file(&path).is_ok() {
                debug!(path = %path.display(), "removed stale temporary file");
                removed += 1;
            }
        }
    }

    Ok(removed)
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX))
}

/// Move `from` to `to`, copying when they live on different filesystems
async fn stage_into(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

async fn rename(from: &Path, to: &Path) -> Result<(), PlacementError> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| PlacementError::RenameFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: e,
        })
}

/// Byte-for-byte comparison, false on any read error
async fn same_contents(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (tokio::fs::metadata(a).await, tokio::fs::metadata(b).await)
    else {
        return false;
    };
    if !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return false;
    }

    let (Ok(mut file_a), Ok(mut file_b)) =
        (tokio::fs::File::open(a).await, tokio::fs::File::open(b).await)
    else {
        return false;
    };

    let mut buf_a = vec![0u8; COMPARE_BUFFER_SIZE];
    let mut buf_b = vec![0u8; COMPARE_BUFFER_SIZE];
    loop {
        let Ok(read) = file_a.read(&mut buf_a).await else {
            return false;
        };
        if read == 0 {
            return true;
        }
        if file_b.read_exact(&mut buf_b[..read]).await.is_err() || buf_a[..read] != buf_b[..read]
        {
            return false;
        }
    }
}
