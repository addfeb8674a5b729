// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use fs2::FileExt;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::feed::EpisodeRecord;
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::retry::RetryPolicy;

use super::path::guid_digest;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Context for tracking a download in concurrent scenarios
#[derive(Debug, Clone)]
pub struct DownloadContext {
    /// Slot ID (0 to workers-1) for progress bar management
    pub download_id: usize,
    /// Index of this episode in the work list
    pub episode_index: usize,
    /// Total number of episodes in the work list
    pub total_to_download: usize,
}

/// A fully downloaded and validated staging file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDownload {
    pub path: PathBuf,
    pub bytes: u64,
    /// `sha256:<hex>` over the downloaded bytes
    pub content_hash: String,
}

/// Files one work item owns inside the staging directory
///
/// Bytes arrive in `partial`, which is only ever appended to. Once the
/// download validates it is renamed to `staged`, and only `staged` is handed
/// to the tag writer, so a resumed download never sees tagged bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    pub partial: PathBuf,
    pub staged: PathBuf,
    pub lock: PathBuf,
}

pub fn staging_paths(staging_dir: &Path, record: &EpisodeRecord) -> StagingPaths {
    let digest = guid_digest(&record.episode_guid);
    let stem = format!("{}-{}", record.series_id, &digest[..16]);
    StagingPaths {
        partial: staging_dir.join(format!("{stem}.partial")),
        staged: staging_dir.join(format!("{stem}.staged")),
        lock: staging_dir.join(format!("{stem}.lock")),
    }
}

/// Exclusive ownership of one episode's staging files
///
/// Backed by an advisory lock on the `.lock` file, which the operating
/// system drops together with the claim or the process. Lock files stay on
/// disk; unlinking one could hand the same episode to two holders.
#[derive(Debug)]
pub struct StagingClaim {
    _file: std::fs::File,
}

impl StagingClaim {
    /// Try to claim the staging files, returning `None` while another scan holds them
    pub async fn acquire(paths: &StagingPaths) -> std::io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&paths.lock)
            .await?
            .into_std()
            .await;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Streams episode audio into staging files, resuming where possible
pub struct Downloader<C> {
    client: C,
    retry: RetryPolicy,
    cancel: CancellationToken,
    reporter: SharedProgressReporter,
}

impl<C: HttpClient> Downloader<C> {
    pub fn new(
        client: C,
        retry: RetryPolicy,
        cancel: CancellationToken,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            client,
            retry,
            cancel,
            reporter,
        }
    }

    /// Download an episode's audio and hand it over as `paths.staged`
    ///
    /// An existing `partial` file is treated as the prefix of an earlier
    /// attempt and continued with a range request. Transport failures keep
    /// the partial file for the next attempt; validation failures discard it.
    /// A leftover `staged` file may already carry tags and is never reused.
    /// Callers must hold the [`StagingClaim`] for `paths`.
    pub async fn download(
        &self,
        record: &EpisodeRecord,
        paths: &StagingPaths,
        context: &DownloadContext,
    ) -> Result<StagedDownload, DownloadError> {
        let url = record.audio_url.as_str();
        let mut attempt = 1;

        if tokio::fs::remove_file(&paths.staged).await.is_ok() {
            debug!(path = %paths.staged.display(), "discarded leftover staged file");
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let error = match self.attempt(record, &paths.partial, context).await {
                Ok((bytes, content_hash)) => {
                    tokio::fs::rename(&paths.partial, &paths.staged)
                        .await
                        .map_err(|e| DownloadError::FileWriteFailed {
                            path: paths.staged.clone(),
                            source: e,
                        })?;
                    self.reporter.report(ProgressEvent::DownloadCompleted {
                        download_id: context.download_id,
                        episode_title: record.title.clone(),
                        bytes_downloaded: bytes,
                    });
                    return Ok(StagedDownload {
                        path: paths.staged.clone(),
                        bytes,
                        content_hash,
                    });
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => e,
            };

            if error.invalidates_partial() {
                let _ = tokio::fs::remove_file(&paths.partial).await;
            }

            if is_permanent(&error) {
                return Err(error);
            }

            if !self.retry.allows_retry(attempt) {
                return Err(DownloadError::RetriesExhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.retry.backoff(attempt);
            warn!(%url, attempt, ?delay, error = %error, "download attempt failed, retrying");

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// One request into `staging`, returning the byte count and content hash
    async fn attempt(
        &self,
        record: &EpisodeRecord,
        staging: &Path,
        context: &DownloadContext,
    ) -> Result<(u64, String), DownloadError> {
        let url = record.audio_url.as_str();
        let offset = match tokio::fs::metadata(staging).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let response =
            self.client
                .get_stream(url, offset)
                .await
                .map_err(|e| DownloadError::HttpFailed {
                    url: url.to_string(),
                    source: e,
                })?;

        let resuming = match response.status {
            206 if offset > 0 => {
                if let Some(returned) = response.range_start
                    && returned != offset
                {
                    return Err(DownloadError::RangeMismatch {
                        url: url.to_string(),
                        requested: offset,
                        returned,
                    });
                }
                true
            }
            416 if offset > 0 => {
                return Err(DownloadError::RangeNotSatisfiable {
                    url: url.to_string(),
                });
            }
            status if status >= 400 => {
                return Err(DownloadError::HttpStatus {
                    url: url.to_string(),
                    status,
                });
            }
            _ => false,
        };

        let (mut file, mut hasher, start) = if resuming {
            debug!(%url, offset, "resuming partial download");
            let hasher = hash_existing(staging).await?;
            let file = OpenOptions::new()
                .append(true)
                .open(staging)
                .await
                .map_err(|e| DownloadError::FileCreateFailed {
                    path: staging.to_path_buf(),
                    source: e,
                })?;
            (file, hasher, offset)
        } else {
            let file =
                File::create(staging)
                    .await
                    .map_err(|e| DownloadError::FileCreateFailed {
                        path: staging.to_path_buf(),
                        source: e,
                    })?;
            (file, Sha256::new(), 0)
        };

        let expected = if resuming {
            response
                .total_length
                .or(response.content_length.map(|len| len + start))
        } else {
            response.content_length
        };

        self.reporter.report(ProgressEvent::DownloadStarting {
            download_id: context.download_id,
            episode_title: record.title.clone(),
            episode_index: context.episode_index,
            total_to_download: context.total_to_download,
            content_length: expected,
            resumed_from: start,
        });

        let mut bytes_downloaded = start;
        let mut stream = response.body;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = file.flush().await;
                    return Err(DownloadError::Cancelled);
                }
                next = stream.next() => next,
            };

            let Some(chunk_result) = next else {
                break;
            };

            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = file.flush().await;
                    return Err(DownloadError::StreamFailed {
                        url: url.to_string(),
                        source: e,
                    });
                }
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::FileWriteFailed {
                    path: staging.to_path_buf(),
                    source: e,
                })?;
            hasher.update(&chunk);
            bytes_downloaded += chunk.len() as u64;

            self.reporter.report(ProgressEvent::DownloadProgress {
                download_id: context.download_id,
                episode_title: record.title.clone(),
                bytes_downloaded,
                total_bytes: expected,
            });
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: staging.to_path_buf(),
                source: e,
            })?;
        file.sync_all()
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: staging.to_path_buf(),
                source: e,
            })?;

        if bytes_downloaded == 0 {
            return Err(DownloadError::EmptyBody {
                url: url.to_string(),
            });
        }

        if let Some(expected) = expected
            && expected != bytes_downloaded
        {
            return Err(DownloadError::LengthMismatch {
                url: url.to_string(),
                expected,
                actual: bytes_downloaded,
            });
        }

        Ok((bytes_downloaded, format!("sha256:{:x}", hasher.finalize())))
    }
}

/// Client errors other than timeouts and throttling will not improve on retry
fn is_permanent(error: &DownloadError) -> bool {
    matches!(
        error,
        DownloadError::HttpStatus { status, .. }
            if (400..500).contains(status) && *status != 408 && *status != 429
    )
}

/// Seed a hasher with the bytes already on disk
async fn hash_existing(path: &Path) -> Result<Sha256, DownloadError> {
    let read_failed = |e| DownloadError::FileReadFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).await.map_err(read_failed)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).await.map_err(read_failed)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::http::{ByteStream, HttpResponse};
    use crate::progress::NoopReporter;
    use crate::test_support::{MockHttpClient, record};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use tempfile::tempdir;

    const URL: &str = "https://example.com/ep.mp3";

    fn context() -> DownloadContext {
        DownloadContext {
            download_id: 0,
            episode_index: 0,
            total_to_download: 1,
        }
    }

    fn downloader<C: HttpClient>(client: C, attempts: u32) -> Downloader<C> {
        Downloader::new(
            client,
            RetryPolicy::immediate(attempts),
            CancellationToken::new(),
            NoopReporter::shared(),
        )
    }

    fn paths_in(dir: &Path) -> StagingPaths {
        staging_paths(dir, &record("ep", "Episode"))
    }

    fn episode() -> EpisodeRecord {
        let mut r = record("ep", "Episode");
        r.audio_url = url::Url::parse(URL).unwrap();
        r
    }

    fn sha256_of(data: &[u8]) -> String {
        format!("sha256:{:x}", Sha256::digest(data))
    }

    /// Replays scripted responses, one per request
    struct ScriptedClient {
        responses: Mutex<Vec<Scripted>>,
        offsets: Mutex<Vec<u64>>,
    }

    struct Scripted {
        status: u16,
        content_length: Option<u64>,
        range_start: Option<u64>,
        chunks: Vec<Result<Vec<u8>, ()>>,
    }

    impl Scripted {
        fn ok(status: u16, content_length: Option<u64>, chunks: Vec<Result<Vec<u8>, ()>>) -> Self {
            Self {
                status,
                content_length,
                range_start: None,
                chunks,
            }
        }
    }

    impl ScriptedClient {
        fn new(mut responses: Vec<Scripted>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                offsets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn get_bytes(&self, _url: &str) -> Result<Bytes, HttpError> {
            unimplemented!("audio is streamed")
        }

        async fn get_stream(&self, _url: &str, offset: u64) -> Result<HttpResponse, HttpError> {
            self.offsets.lock().unwrap().push(offset);
            let scripted = self.responses.lock().unwrap().pop().expect("unexpected request");
            let items: Vec<Result<Bytes, std::io::Error>> = scripted
                .chunks
                .into_iter()
                .map(|chunk| {
                    chunk
                        .map(Bytes::from)
                        .map_err(|_| std::io::Error::other("connection reset"))
                })
                .collect();
            let body: ByteStream = Box::pin(futures::stream::iter(items));
            Ok(HttpResponse {
                status: scripted.status,
                content_length: scripted.content_length,
                range_start: scripted.range_start,
                total_length: None,
                body,
            })
        }
    }

    #[test]
    fn staging_paths_are_unique_per_guid() {
        let dir = Path::new("/staging");
        let a = staging_paths(dir, &record("a", "A"));
        let b = staging_paths(dir, &record("b", "B"));
        assert_ne!(a.partial, b.partial);
        assert!(a.partial.to_string_lossy().ends_with(".partial"));
        assert!(a.staged.to_string_lossy().ends_with(".staged"));
        assert_eq!(a.partial.file_stem(), a.lock.file_stem());
    }

    #[tokio::test]
    async fn download_hands_over_staged_file_and_hash() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let client = MockHttpClient::new().with(URL, b"test audio content".to_vec());

        let staged = downloader(client, 1)
            .download(&episode(), &paths, &context())
            .await
            .unwrap();

        assert_eq!(staged.path, paths.staged);
        assert_eq!(staged.bytes, 18);
        assert_eq!(staged.content_hash, sha256_of(b"test audio content"));
        assert_eq!(std::fs::read(&paths.staged).unwrap(), b"test audio content");
        assert!(!paths.partial.exists());
    }

    #[tokio::test]
    async fn download_resumes_existing_partial() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.partial, b"test audio").unwrap();

        let client = MockHttpClient::new().with(URL, b"test audio content".to_vec());
        let d = downloader(client, 1);
        let staged = d.download(&episode(), &paths, &context()).await.unwrap();

        assert_eq!(d.client.requests(), vec![(URL.to_string(), 10)]);
        assert_eq!(staged.bytes, 18);
        assert_eq!(staged.content_hash, sha256_of(b"test audio content"));
        assert_eq!(std::fs::read(&paths.staged).unwrap(), b"test audio content");
    }

    #[tokio::test]
    async fn leftover_tagged_file_is_never_resumed() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        // A run that died after tagging left only the staged file behind
        std::fs::write(&paths.staged, b"ID3tagged").unwrap();

        let client = MockHttpClient::new().with(URL, b"test audio content".to_vec());
        let d = downloader(client, 1);
        let staged = d.download(&episode(), &paths, &context()).await.unwrap();

        assert_eq!(d.client.requests(), vec![(URL.to_string(), 0)]);
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"test audio content");
        assert_eq!(staged.content_hash, sha256_of(b"test audio content"));
    }

    #[tokio::test]
    async fn download_restarts_when_range_is_ignored() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.partial, b"stale bytes from another file").unwrap();

        let client = ScriptedClient::new(vec![Scripted::ok(
            200,
            Some(5),
            vec![Ok(b"fresh".to_vec())],
        )]);

        let staged = downloader(client, 1)
            .download(&record("ep", "Episode"), &paths, &context())
            .await
            .unwrap();

        assert_eq!(staged.bytes, 5);
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn misaligned_resume_discards_partial_and_restarts() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.partial, b"hello").unwrap();

        let client = ScriptedClient::new(vec![
            Scripted {
                status: 206,
                content_length: Some(7),
                range_start: Some(3),
                chunks: vec![Ok(b"loworld".to_vec())],
            },
            Scripted::ok(200, Some(10), vec![Ok(b"helloworld".to_vec())]),
        ]);

        let d = downloader(client, 2);
        let staged = d
            .download(&record("ep", "Episode"), &paths, &context())
            .await
            .unwrap();

        assert_eq!(*d.client.offsets.lock().unwrap(), vec![5, 0]);
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"helloworld");
        assert_eq!(staged.content_hash, sha256_of(b"helloworld"));
    }

    #[tokio::test]
    async fn interrupted_stream_is_resumed_on_retry() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());

        let client = ScriptedClient::new(vec![
            Scripted::ok(200, Some(10), vec![Ok(b"hello".to_vec()), Err(())]),
            Scripted {
                status: 206,
                content_length: Some(5),
                range_start: Some(5),
                chunks: vec![Ok(b"world".to_vec())],
            },
        ]);

        let d = downloader(client, 2);
        let staged = d
            .download(&record("ep", "Episode"), &paths, &context())
            .await
            .unwrap();

        assert_eq!(*d.client.offsets.lock().unwrap(), vec![0, 5]);
        assert_eq!(staged.bytes, 10);
        assert_eq!(staged.content_hash, sha256_of(b"helloworld"));
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"helloworld");
    }

    #[tokio::test]
    async fn length_mismatch_discards_partial_and_retries() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());

        let client = ScriptedClient::new(vec![
            Scripted::ok(200, Some(100), vec![Ok(b"short".to_vec())]),
            Scripted::ok(200, Some(5), vec![Ok(b"whole".to_vec())]),
        ]);

        let d = downloader(client, 2);
        let staged = d
            .download(&record("ep", "Episode"), &paths, &context())
            .await
            .unwrap();

        // The truncated partial was discarded, so the retry started over
        assert_eq!(*d.client.offsets.lock().unwrap(), vec![0, 0]);
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"whole");
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());

        let mismatch = || Scripted::ok(200, Some(100), vec![Ok(b"short".to_vec())]);
        let client = ScriptedClient::new(vec![mismatch(), mismatch()]);

        let result = downloader(client, 2)
            .download(&record("ep", "Episode"), &paths, &context())
            .await;

        match result.unwrap_err() {
            DownloadError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, DownloadError::LengthMismatch { .. }));
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
        assert!(!paths.partial.exists());
        assert!(!paths.staged.exists());
    }

    #[tokio::test]
    async fn download_fails_on_http_error() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());

        let d = downloader(MockHttpClient::new(), 3);
        let result = d
            .download(&record("missing", "Missing"), &paths, &context())
            .await;

        match result.unwrap_err() {
            DownloadError::HttpStatus { status, .. } => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got {other:?}"),
        }
        // Not found is permanent, no retries
        assert_eq!(d.client.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let client = ScriptedClient::new(vec![Scripted::ok(200, None, vec![])]);

        let result = downloader(client, 1)
            .download(&record("ep", "Episode"), &paths, &context())
            .await;

        match result.unwrap_err() {
            DownloadError::RetriesExhausted { last, .. } => {
                assert!(matches!(*last, DownloadError::EmptyBody { .. }))
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_download_does_not_start() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let d = Downloader::new(
            MockHttpClient::new().with(URL, b"data".to_vec()),
            RetryPolicy::once(),
            cancel,
            NoopReporter::shared(),
        );
        let result = d.download(&episode(), &paths, &context()).await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(d.client.requests().is_empty());
    }

    #[tokio::test]
    async fn staging_claim_is_exclusive_until_dropped() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());

        let first = StagingClaim::acquire(&paths).await.unwrap();
        assert!(first.is_some());
        assert!(StagingClaim::acquire(&paths).await.unwrap().is_none());

        drop(first);
        assert!(StagingClaim::acquire(&paths).await.unwrap().is_some());
    }
}
