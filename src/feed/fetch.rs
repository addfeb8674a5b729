// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::{FetchError, ParseError};
use crate::http::HttpClient;
use crate::retry::RetryPolicy;

/// Retrieves raw feed bytes
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Bytes, FetchError>;
}

/// Fetches feeds over HTTP (with retries) or from local files
#[derive(Clone)]
pub struct HttpFeedFetcher<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C: HttpClient> HttpFeedFetcher<C> {
    pub fn new(client: C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl<C: HttpClient> FeedFetcher for HttpFeedFetcher<C> {
    async fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
        if is_url(source) {
            self.retry
                .run(|_| fetch_feed_bytes(&self.client, source))
                .await
        } else {
            read_feed_file(Path::new(source)).await.map(Bytes::from)
        }
    }
}

/// Fetch raw feed bytes from a URL (without parsing)
pub async fn fetch_feed_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FetchError> {
    client
        .get_bytes(url)
        .await
        .map_err(|e| FetchError::Http {
            url: url.to_string(),
            source: e,
        })
}

/// Read raw feed bytes from a local file (without parsing)
pub async fn read_feed_file(path: &Path) -> Result<Vec<u8>, FetchError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| FetchError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })
}

/// The URL identifying a feed source, turning local paths into file:// URLs
pub fn feed_url_for(source: &str) -> Result<Url, ParseError> {
    if is_url(source) {
        return Ok(Url::parse(source)?);
    }

    let path = Path::new(source);
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match Url::from_file_path(&absolute) {
        Ok(url) => Ok(url),
        Err(()) => Ok(Url::parse(&format!("file://{}", absolute.display()))?),
    }
}

/// Determine if a string is a URL or a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
